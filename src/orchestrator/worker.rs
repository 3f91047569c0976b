//! Shared orchestrator state and the worker loop.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::event::{OrchestratorEvent, ProgressThrottle};
use super::job::{Job, JobId, JobState};
use super::queue::JobQueue;
use crate::download::filename::resolve_destination;
use crate::download::{
    Transfer, TransferControl, TransferOutcome, TransferProgress, TransferRequest,
};
use crate::inventory::{DownloadHistory, NewLocalFile};

/// Failure reason for jobs cut short by `stop()`.
pub const SHUTDOWN_REASON: &str = "interrupted by shutdown";

/// Per-job handles the control surface uses to reach a running transfer.
#[derive(Debug)]
pub(super) struct JobControl {
    pub cancel: CancellationToken,
    pub pause: watch::Sender<bool>,
    /// History row of this run, once created.
    pub history_id: Option<i64>,
}

/// Everything guarded by the single queue lock.
#[derive(Debug, Default)]
pub(super) struct Book {
    pub queue: JobQueue,
    pub jobs: HashMap<JobId, Job>,
    /// Remote identities of queued and active jobs.
    pub by_remote: HashMap<i64, JobId>,
    /// Jobs a worker currently owns.
    pub in_flight: usize,
}

/// Worker tasks of a started orchestrator.
#[derive(Debug)]
pub(super) struct Running {
    pub stop: CancellationToken,
    pub handles: Vec<JoinHandle<()>>,
    pub next_index: usize,
}

pub(super) struct Inner {
    pub book: Mutex<Book>,
    pub controls: DashMap<JobId, JobControl>,
    pub events: broadcast::Sender<OrchestratorEvent>,
    pub work_ready: Notify,
    pub idle: Notify,
    pub desired_workers: AtomicUsize,
    pub live_workers: AtomicUsize,
    pub next_id: AtomicU64,
    pub running: Mutex<Option<Running>>,
    pub transfer: Transfer,
    pub history: Option<Arc<dyn DownloadHistory>>,
    pub download_dir: PathBuf,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

enum Pickup {
    Job(Box<Job>, TransferControl),
    Retire,
    Stop,
}

enum Finish {
    Completed(TransferOutcome),
    Failed(String),
    Cancelled,
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl Inner {
    pub(super) fn emit(&self, event: OrchestratorEvent) {
        // Err only means nobody is listening.
        let _ = self.events.send(event);
    }

    pub(super) fn book(&self) -> MutexGuard<'_, Book> {
        lock(&self.book)
    }

    pub(super) fn is_idle(&self) -> bool {
        let book = self.book();
        book.queue.is_empty() && book.in_flight == 0
    }

    /// Spawns one worker for `running`.
    pub(super) fn spawn_worker(self: &Arc<Self>, running: &mut Running) {
        let index = running.next_index;
        running.next_index += 1;
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(self);
        let stop = running.stop.clone();
        running
            .handles
            .push(tokio::spawn(async move { inner.worker_loop(index, stop).await }));
    }

    /// Claims one excess worker slot; true means the caller should exit.
    fn try_retire(&self) -> bool {
        self.live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live > self.desired_workers.load(Ordering::SeqCst)).then(|| live - 1)
            })
            .is_ok()
    }

    fn release_worker(&self) {
        let _ = self
            .live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| live.checked_sub(1));
    }

    async fn worker_loop(self: Arc<Self>, index: usize, stop: CancellationToken) {
        debug!(worker = index, "worker started");
        loop {
            match self.next_job(&stop).await {
                Pickup::Job(job, control) => self.execute(*job, control).await,
                Pickup::Retire => {
                    info!(worker = index, "worker retired");
                    return;
                }
                Pickup::Stop => {
                    self.release_worker();
                    debug!(worker = index, "worker stopped");
                    return;
                }
            }
        }
    }

    /// Waits for the next queued job, waking at least every poll interval.
    async fn next_job(&self, stop: &CancellationToken) -> Pickup {
        loop {
            let notified = self.work_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if stop.is_cancelled() {
                return Pickup::Stop;
            }
            if self.try_retire() {
                return Pickup::Retire;
            }
            if let Some((job, control)) = self.pick_next(stop) {
                return Pickup::Job(Box::new(job), control);
            }

            tokio::select! {
                () = stop.cancelled() => return Pickup::Stop,
                () = &mut notified => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Pops the most urgent job and marks it downloading.
    fn pick_next(&self, stop: &CancellationToken) -> Option<(Job, TransferControl)> {
        let mut book = self.book();
        while let Some(id) = book.queue.pop() {
            let Some(job) = book.jobs.get_mut(&id) else {
                continue;
            };
            if job.state != JobState::Queued {
                continue;
            }
            job.state = JobState::Downloading;
            job.started_at = Some(Utc::now());
            let snapshot = job.clone();
            book.in_flight += 1;

            let cancel = stop.child_token();
            let (pause, paused) = watch::channel(false);
            self.controls.insert(
                id,
                JobControl {
                    cancel: cancel.clone(),
                    pause,
                    history_id: None,
                },
            );
            // Under the lock, so no pause or cancel event can precede it.
            self.emit(OrchestratorEvent::JobStarted { job_id: id });
            return Some((snapshot, TransferControl::new(cancel, paused)));
        }
        None
    }

    #[instrument(skip(self, job, control), fields(job_id = %job.id, url = %job.spec.url))]
    async fn execute(self: &Arc<Self>, job: Job, control: TransferControl) {
        let id = job.id;
        info!("job started");
        let history_id = self.history_start(id, job.spec.remote_file_id).await;

        let request = TransferRequest {
            url: job.spec.url.clone(),
            destination: resolve_destination(
                &self.download_dir,
                job.spec.category.as_deref(),
                Some(&job.spec.display_name),
                &job.spec.url,
                job.spec.file_type.as_deref(),
            ),
            file_type: job.spec.file_type.clone(),
        };

        let progress_inner = Arc::clone(self);
        let mut throttle = ProgressThrottle::default();
        let on_progress = move |progress: TransferProgress| {
            progress_inner.record_progress(id, progress, &mut throttle);
        };

        let result = AssertUnwindSafe(self.transfer.run(&request, &control, on_progress))
            .catch_unwind()
            .await;
        let finish = match result {
            Ok(Ok(outcome)) => Finish::Completed(outcome),
            Ok(Err(failure)) if failure.is_cancelled() => {
                if self.status(id) == Some(JobState::Cancelled) {
                    Finish::Cancelled
                } else {
                    Finish::Failed(SHUTDOWN_REASON.to_string())
                }
            }
            Ok(Err(failure)) => Finish::Failed(failure.to_string()),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(panic = %message, "job panicked; marking failed");
                Finish::Failed(format!("worker panicked: {message}"))
            }
        };

        if let Some(history_id) = history_id {
            self.history_finish(history_id, &job, &finish).await;
        }
        self.finish(id, finish);
    }

    fn status(&self, id: JobId) -> Option<JobState> {
        self.book().jobs.get(&id).map(|job| job.state)
    }

    fn record_progress(
        &self,
        id: JobId,
        progress: TransferProgress,
        throttle: &mut ProgressThrottle,
    ) {
        let fraction = progress.fraction();
        {
            let mut book = self.book();
            let Some(job) = book.jobs.get_mut(&id) else {
                return;
            };
            job.bytes_written = progress.bytes_written;
            if let Some(fraction) = fraction {
                job.progress = job.progress.max(fraction);
            }
        }
        if throttle.should_emit(fraction, progress.bytes_written) {
            self.emit(OrchestratorEvent::JobProgress {
                job_id: id,
                fraction,
                bytes: progress.bytes_written,
            });
        }
    }

    /// Applies the terminal state, releases the job's identity and wakes waiters.
    fn finish(&self, id: JobId, finish: Finish) {
        let event = {
            let mut book = self.book();
            book.in_flight = book.in_flight.saturating_sub(1);
            let Some(job) = book.jobs.get_mut(&id) else {
                return;
            };
            job.finished_at = Some(Utc::now());
            let remote_file_id = job.spec.remote_file_id;
            let event = match finish {
                Finish::Completed(outcome) => {
                    job.state = JobState::Completed;
                    job.progress = 1.0;
                    job.bytes_written = outcome.bytes;
                    job.local_path = Some(outcome.path.clone());
                    info!(
                        job_id = %id,
                        path = %outcome.path.display(),
                        bytes = outcome.bytes,
                        "job completed"
                    );
                    OrchestratorEvent::JobCompleted {
                        job_id: id,
                        path: outcome.path,
                    }
                }
                Finish::Failed(reason) => {
                    job.state = JobState::Failed;
                    job.last_error = Some(reason.clone());
                    warn!(job_id = %id, reason = %reason, "job failed");
                    OrchestratorEvent::JobFailed { job_id: id, reason }
                }
                Finish::Cancelled => {
                    job.state = JobState::Cancelled;
                    info!(job_id = %id, "job cancelled");
                    OrchestratorEvent::JobCancelled { job_id: id }
                }
            };
            if book.by_remote.get(&remote_file_id) == Some(&id) {
                book.by_remote.remove(&remote_file_id);
            }
            event
        };
        self.controls.remove(&id);
        self.emit(event);
        self.idle.notify_waiters();
    }

    /// Fails jobs whose worker was aborted before it could finish them, and
    /// records the failure in the history rows those workers opened.
    pub(super) async fn fail_abandoned(&self) {
        let abandoned: Vec<JobId> = {
            let mut book = self.book();
            let ids: Vec<JobId> = book
                .jobs
                .values()
                .filter(|job| job.state.is_active())
                .map(|job| job.id)
                .collect();
            for id in &ids {
                if let Some(job) = book.jobs.get_mut(id) {
                    job.state = JobState::Failed;
                    job.last_error = Some(SHUTDOWN_REASON.to_string());
                    job.finished_at = Some(Utc::now());
                    let remote_file_id = job.spec.remote_file_id;
                    book.by_remote.remove(&remote_file_id);
                }
            }
            book.in_flight = 0;
            ids
        };
        let mut open_rows = Vec::new();
        for id in abandoned {
            if let Some((_, control)) = self.controls.remove(&id) {
                open_rows.extend(control.history_id);
            }
            warn!(job_id = %id, "job abandoned by an aborted worker");
            self.emit(OrchestratorEvent::JobFailed {
                job_id: id,
                reason: SHUTDOWN_REASON.to_string(),
            });
        }
        self.idle.notify_waiters();

        let Some(history) = self.history.as_ref() else {
            return;
        };
        for history_id in open_rows {
            if let Err(e) = history.mark_failed(history_id, SHUTDOWN_REASON).await {
                warn!(history_id, error = %e, "could not record abandoned download");
            }
        }
    }

    async fn history_start(&self, job_id: JobId, remote_file_id: i64) -> Option<i64> {
        let history = self.history.as_ref()?;
        let history_id = match history.create(remote_file_id).await {
            Ok(id) => id,
            Err(e) => {
                warn!(remote_file_id, error = %e, "could not create history row");
                return None;
            }
        };
        // Lets `stop()` close the row if this worker is aborted.
        if let Some(mut control) = self.controls.get_mut(&job_id) {
            control.history_id = Some(history_id);
        }
        if let Err(e) = history.mark_started(history_id).await {
            warn!(history_id, error = %e, "could not mark history row started");
        }
        Some(history_id)
    }

    async fn history_finish(&self, history_id: i64, job: &Job, finish: &Finish) {
        let Some(history) = self.history.as_ref() else {
            return;
        };
        let result = match finish {
            Finish::Completed(outcome) => {
                let path =
                    std::path::absolute(&outcome.path).unwrap_or_else(|_| outcome.path.clone());
                let local = NewLocalFile {
                    path: path.to_string_lossy().into_owned(),
                    size: i64::try_from(outcome.bytes).unwrap_or(i64::MAX),
                    file_type: job
                        .spec
                        .file_type
                        .clone()
                        .or_else(|| Some(outcome.validation.file_type.clone())),
                };
                history.mark_completed(history_id, &local).await.map(|_| ())
            }
            Finish::Failed(reason) => history.mark_failed(history_id, reason).await,
            Finish::Cancelled => history.mark_cancelled(history_id).await,
        };
        if let Err(e) = result {
            warn!(history_id, error = %e, "could not record download outcome");
        }
    }
}
