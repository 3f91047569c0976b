//! Download orchestration: a priority job queue drained by a worker pool.
//!
//! [`DownloadOrchestrator`] owns the queue, the job records and the worker
//! tasks. Callers [`enqueue`](DownloadOrchestrator::enqueue) [`JobSpec`]s,
//! steer them with cancel/pause/resume/reprioritize, and watch progress via
//! [`subscribe`](DownloadOrchestrator::subscribe). Each worker pops the most
//! urgent job (lowest priority value, FIFO within a priority) and runs a
//! [`Transfer`] for it outside of any lock.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use docsync_core::download::{ClientOptions, HttpClient};
//! use docsync_core::orchestrator::{DownloadOrchestrator, JobSpec, OrchestratorConfig};
//! use docsync_core::validator::FileValidator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(&ClientOptions::default())?;
//! let orchestrator = DownloadOrchestrator::new(
//!     OrchestratorConfig::default(),
//!     client,
//!     Arc::new(FileValidator::default()),
//!     None,
//! )?;
//! orchestrator.start();
//! orchestrator.enqueue(
//!     JobSpec {
//!         remote_file_id: 1,
//!         url: "https://example.com/a.pdf".to_string(),
//!         display_name: "a.pdf".to_string(),
//!         size_hint: None,
//!         file_type: Some("pdf".to_string()),
//!         category: None,
//!     },
//!     10,
//! )?;
//! orchestrator.wait_idle().await;
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod job;
mod queue;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use error::OrchestratorError;
pub use event::{EVENT_CHANNEL_CAPACITY, OrchestratorEvent};
pub use job::{DEFAULT_PRIORITY, Job, JobId, JobSpec, JobState};
pub use queue::JobQueue;
pub use worker::SHUTDOWN_REASON;

use crate::config::{self, ConfigError, Settings};
use crate::download::{HttpClient, RateLimiter, RetryPolicy, Transfer};
use crate::inventory::DownloadHistory;
use crate::validator::FileValidator;
use worker::{Book, Inner, Running, lock};

/// Default wake-up interval for idle workers.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on how long `stop()` waits for workers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `stop()` waits for an aborted worker to unwind.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Worker pool size, `1..=100`.
    pub max_workers: usize,
    /// Aggregate bandwidth cap; `0` = unlimited.
    pub rate_limit_bytes_per_sec: u64,
    /// Retries after the first attempt.
    pub retry_count: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Root of downloaded files.
    pub download_dir: PathBuf,
    /// Longest an idle worker sleeps before re-checking the queue.
    pub poll_interval: Duration,
    /// Bound on `stop()`.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            rate_limit_bytes_per_sec: 0,
            retry_count: 3,
            retry_delay: Duration::from_secs(5),
            download_dir: PathBuf::from("downloads"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl OrchestratorConfig {
    /// Builds a config from the download section of `settings`.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the settings are out of range.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            max_workers: settings.download.concurrent_downloads,
            rate_limit_bytes_per_sec: settings.download.rate_limit_bytes_per_sec(),
            retry_count: settings.download.retry_count,
            retry_delay: Duration::from_secs(settings.download.retry_delay_secs),
            download_dir: settings.download.directory.clone(),
            ..Self::default()
        })
    }

    /// Checks the worker count.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a worker count outside `1..=100`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        config::validate_workers(self.max_workers)
    }
}

/// Priority download queue with a live-reconfigurable worker pool.
///
/// Cloning is cheap; clones share one queue and one pool.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("workers", &self.worker_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Creates a stopped orchestrator.
    ///
    /// `history`, when given, receives one row per started job.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Config`] for an invalid worker count.
    pub fn new(
        config: OrchestratorConfig,
        client: HttpClient,
        validator: Arc<FileValidator>,
        history: Option<Arc<dyn DownloadHistory>>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_bytes_per_sec));
        let policy = RetryPolicy::new(config.retry_count, config.retry_delay);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                book: std::sync::Mutex::new(Book::default()),
                controls: DashMap::new(),
                events,
                work_ready: Notify::new(),
                idle: Notify::new(),
                desired_workers: AtomicUsize::new(config.max_workers),
                live_workers: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                running: std::sync::Mutex::new(None),
                transfer: Transfer::new(client, limiter, policy, validator),
                history,
                download_dir: config.download_dir,
                poll_interval: config.poll_interval,
                shutdown_timeout: config.shutdown_timeout,
            }),
        })
    }

    // ==================== Queue Operations ====================

    /// Queues a download.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::DuplicateJob`] if the remote file is already
    ///   queued or downloading.
    /// - [`OrchestratorError::InvalidSpec`] if the URL does not parse as http(s).
    #[instrument(skip(self, spec), fields(remote_file_id = spec.remote_file_id, url = %spec.url))]
    pub fn enqueue(&self, spec: JobSpec, priority: i32) -> Result<JobId, OrchestratorError> {
        check_url(&spec)?;
        let id = {
            let mut book = self.inner.book();
            if let Some(existing) = book.by_remote.get(&spec.remote_file_id) {
                return Err(OrchestratorError::DuplicateJob {
                    remote_file_id: spec.remote_file_id,
                    existing: *existing,
                });
            }
            let id = JobId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
            book.by_remote.insert(spec.remote_file_id, id);
            book.jobs.insert(id, Job::new(id, spec, priority));
            book.queue.push(id, priority);
            self.inner.emit(OrchestratorEvent::JobQueued { job_id: id });
            id
        };
        debug!(job_id = %id, priority, "job queued");
        self.inner.work_ready.notify_waiters();
        Ok(id)
    }

    /// Changes the priority of a queued job.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownJob`], or
    /// [`OrchestratorError::InvalidState`] once a worker has picked it up.
    pub fn reprioritize(&self, job_id: JobId, priority: i32) -> Result<(), OrchestratorError> {
        let mut book = self.inner.book();
        let job = book
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestratorError::UnknownJob(job_id))?;
        if job.state != JobState::Queued {
            return Err(OrchestratorError::invalid_state(
                job_id,
                job.state,
                "reprioritize",
            ));
        }
        job.priority = priority;
        book.queue.reprioritize(job_id, priority);
        debug!(job_id = %job_id, priority, "job reprioritized");
        Ok(())
    }

    /// Drops a queued job entirely. Active jobs must be cancelled instead.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownJob`] or [`OrchestratorError::InvalidState`].
    pub fn remove_from_queue(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        {
            let mut book = self.inner.book();
            let job = book
                .jobs
                .get(&job_id)
                .ok_or(OrchestratorError::UnknownJob(job_id))?;
            if job.state != JobState::Queued {
                return Err(OrchestratorError::invalid_state(
                    job_id,
                    job.state,
                    "remove",
                ));
            }
            let remote_file_id = job.spec.remote_file_id;
            book.queue.remove(job_id);
            book.jobs.remove(&job_id);
            book.by_remote.remove(&remote_file_id);
        }
        debug!(job_id = %job_id, "job removed from queue");
        self.inner.emit(OrchestratorEvent::JobCancelled { job_id });
        self.inner.idle.notify_waiters();
        Ok(())
    }

    /// Cancels a queued, downloading or paused job.
    ///
    /// A queued job is cancelled at once. An active transfer notices at its
    /// next chunk boundary; the `JobCancelled` event follows when it exits.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownJob`], or
    /// [`OrchestratorError::InvalidState`] for a finished job.
    pub fn cancel(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        let was_queued = {
            let mut book = self.inner.book();
            let job = book
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestratorError::UnknownJob(job_id))?;
            match job.state {
                JobState::Queued => {
                    job.state = JobState::Cancelled;
                    job.finished_at = Some(chrono::Utc::now());
                    let remote_file_id = job.spec.remote_file_id;
                    book.queue.remove(job_id);
                    book.by_remote.remove(&remote_file_id);
                    true
                }
                JobState::Downloading | JobState::Paused => {
                    job.state = JobState::Cancelled;
                    false
                }
                state => {
                    return Err(OrchestratorError::invalid_state(job_id, state, "cancel"));
                }
            }
        };

        if was_queued {
            info!(job_id = %job_id, "queued job cancelled");
            self.inner.emit(OrchestratorEvent::JobCancelled { job_id });
            self.inner.idle.notify_waiters();
        } else if let Some(control) = self.inner.controls.get(&job_id) {
            debug!(job_id = %job_id, "cancelling active transfer");
            control.cancel.cancel();
        }
        Ok(())
    }

    /// Holds a downloading job at its next chunk boundary.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownJob`], or
    /// [`OrchestratorError::InvalidState`] unless the job is downloading.
    pub fn pause(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        self.set_paused(job_id, true)
    }

    /// Lets a paused job continue.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownJob`], or
    /// [`OrchestratorError::InvalidState`] unless the job is paused.
    pub fn resume(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        self.set_paused(job_id, false)
    }

    fn set_paused(&self, job_id: JobId, paused: bool) -> Result<(), OrchestratorError> {
        let (from, to, operation) = if paused {
            (JobState::Downloading, JobState::Paused, "pause")
        } else {
            (JobState::Paused, JobState::Downloading, "resume")
        };
        {
            let mut book = self.inner.book();
            let job = book
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestratorError::UnknownJob(job_id))?;
            if job.state != from {
                return Err(OrchestratorError::invalid_state(job_id, job.state, operation));
            }
            job.state = to;
            // Sent under the book lock so a concurrent finish cannot interleave.
            if let Some(control) = self.inner.controls.get(&job_id) {
                control.pause.send_replace(paused);
            }
        }
        debug!(job_id = %job_id, paused, "pause state changed");
        self.inner.emit(if paused {
            OrchestratorEvent::JobPaused { job_id }
        } else {
            OrchestratorEvent::JobResumed { job_id }
        });
        Ok(())
    }

    // ==================== Worker Pool ====================

    /// Spawns the worker pool. Does nothing if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = lock(&self.inner.running);
        if running.is_some() {
            debug!("orchestrator already running");
            return;
        }
        let mut pool = Running {
            stop: CancellationToken::new(),
            handles: Vec::new(),
            next_index: 0,
        };
        let workers = self.inner.desired_workers.load(Ordering::SeqCst);
        for _ in 0..workers {
            self.inner.spawn_worker(&mut pool);
        }
        *running = Some(pool);
        info!(workers, "orchestrator started");
    }

    /// Signals every worker to stop and waits for them, bounded by the
    /// shutdown timeout.
    ///
    /// Active transfers end `Failed` with [`SHUTDOWN_REASON`]; queued jobs stay
    /// queued for the next `start()`. Workers still running at the deadline are
    /// aborted, and their jobs' history rows are marked failed.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(pool) = lock(&self.inner.running).take() else {
            debug!("orchestrator not running");
            return;
        };
        pool.stop.cancel();

        let deadline = tokio::time::Instant::now() + self.inner.shutdown_timeout;
        for mut handle in pool.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(error = %e, "worker task panicked"),
                Err(_) => {
                    warn!("worker did not stop before the shutdown timeout; aborting");
                    handle.abort();
                    // The aborted task must be gone before its job is failed.
                    if tokio::time::timeout(ABORT_GRACE, handle).await.is_err() {
                        warn!("aborted worker did not unwind in time");
                    }
                }
            }
        }
        self.inner.live_workers.store(0, Ordering::SeqCst);
        self.inner.fail_abandoned().await;
        info!("orchestrator stopped");
    }

    /// Applies a new pool size and bandwidth cap without restarting.
    ///
    /// Extra workers exit after their current job; new ones start at once.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Config`] for a worker count outside `1..=100`.
    #[instrument(skip(self))]
    pub fn reconfigure(
        &self,
        max_workers: usize,
        rate_limit_bytes_per_sec: u64,
    ) -> Result<(), OrchestratorError> {
        config::validate_workers(max_workers)?;
        self.inner
            .transfer
            .limiter()
            .set_limit(rate_limit_bytes_per_sec);
        let previous = self
            .inner
            .desired_workers
            .swap(max_workers, Ordering::SeqCst);

        let mut running = lock(&self.inner.running);
        if let Some(pool) = running.as_mut() {
            pool.handles.retain(|handle| !handle.is_finished());
            let live = self.inner.live_workers.load(Ordering::SeqCst);
            for _ in live..max_workers {
                self.inner.spawn_worker(pool);
            }
            if max_workers < previous {
                // Idle workers re-check the target and retire.
                self.inner.work_ready.notify_waiters();
            }
        }
        info!(max_workers, rate_limit_bytes_per_sec, "orchestrator reconfigured");
        Ok(())
    }

    // ==================== Status ====================

    /// Queued jobs in the order workers will take them.
    #[must_use]
    pub fn list_queue(&self) -> Vec<Job> {
        let book = self.inner.book();
        book.queue
            .ordered_ids()
            .into_iter()
            .filter_map(|id| book.jobs.get(&id).cloned())
            .collect()
    }

    /// Downloading and paused jobs.
    #[must_use]
    pub fn list_active(&self) -> Vec<Job> {
        self.collect_jobs(|job| job.state.is_active())
    }

    /// Completed, failed and cancelled jobs still on record.
    #[must_use]
    pub fn list_finished(&self) -> Vec<Job> {
        self.collect_jobs(|job| job.state.is_terminal())
    }

    fn collect_jobs(&self, keep: impl Fn(&Job) -> bool) -> Vec<Job> {
        let book = self.inner.book();
        let mut jobs: Vec<Job> = book.jobs.values().filter(|job| keep(job)).cloned().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Snapshot of one job.
    #[must_use]
    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.inner.book().jobs.get(&job_id).cloned()
    }

    /// Current state of a job.
    #[must_use]
    pub fn status_of(&self, job_id: JobId) -> Option<JobState> {
        self.inner.book().jobs.get(&job_id).map(|job| job.state)
    }

    /// Completed fraction of a job.
    #[must_use]
    pub fn progress_of(&self, job_id: JobId) -> Option<f64> {
        self.inner.book().jobs.get(&job_id).map(|job| job.progress)
    }

    /// Workers currently alive.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.live_workers.load(Ordering::SeqCst)
    }

    /// True between `start()` and `stop()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    /// True when nothing is queued or active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Shared bandwidth limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.inner.transfer.limiter()
    }

    /// Receives job events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Drops finished job records. Returns how many were dropped.
    pub fn clear_finished(&self) -> usize {
        let mut book = self.inner.book();
        let before = book.jobs.len();
        book.jobs.retain(|_, job| !job.state.is_terminal());
        before - book.jobs.len()
    }

    /// Resolves once no job is queued or active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

fn check_url(spec: &JobSpec) -> Result<(), OrchestratorError> {
    let invalid = |reason: String| OrchestratorError::InvalidSpec {
        remote_file_id: spec.remote_file_id,
        reason,
    };
    let url = url::Url::parse(&spec.url).map_err(|e| invalid(format!("{}: {e}", spec.url)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(invalid(format!("unsupported scheme {scheme}"))),
    }
}
