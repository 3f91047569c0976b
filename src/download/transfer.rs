//! One HTTP GET-to-file operation with retry, rate limiting and validation.
//!
//! A [`Transfer`] streams the response body into `<destination>.part` in
//! [`CHUNK_SIZE`] pieces. Before each piece it checks the cancellation token,
//! waits while the job is paused, and acquires bandwidth from the shared
//! [`RateLimiter`]. A failed attempt deletes its partial file; the next attempt
//! (if the [`RetryPolicy`] allows one) starts over from byte zero. On success
//! the partial file is renamed into place and handed to the [`FileValidator`].

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::constants::CHUNK_SIZE;
use super::error::{DownloadError, TransferFailure};
use super::filename::partial_path;
use super::rate_limiter::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy};
use crate::validator::{FileValidator, ValidationOutcome};

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Source URL.
    pub url: String,
    /// Final path of the file (parent directories are created).
    pub destination: PathBuf,
    /// Validator key; the destination extension decides when `None`.
    pub file_type: Option<String>,
}

/// Cooperative controls a transfer polls at chunk boundaries.
#[derive(Debug, Clone)]
pub struct TransferControl {
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl TransferControl {
    /// Controls driven by a cancellation token and a pause flag.
    #[must_use]
    pub fn new(cancel: CancellationToken, paused: watch::Receiver<bool>) -> Self {
        Self { cancel, paused }
    }

    /// Controls that can be cancelled but never pause.
    #[must_use]
    pub fn cancellable(cancel: CancellationToken) -> Self {
        let (_tx, paused) = watch::channel(false);
        Self { cancel, paused }
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Blocks while paused. Returns `false` if cancelled while waiting.
    async fn wait_while_paused(&self) -> bool {
        if !*self.paused.borrow() {
            return true;
        }
        debug!("transfer paused at chunk boundary");
        let mut paused = self.paused.clone();
        // An Err here means the sender is gone; nothing can resume us, so carry on.
        let resumed = async move { paused.wait_for(|p| !*p).await.is_ok() };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            _ = resumed => {
                debug!("transfer resumed");
                true
            }
        }
    }
}

/// Bytes written so far in the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes written to disk in this attempt.
    pub bytes_written: u64,
    /// Content-Length of the response, when the server sent one.
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`, or `None` when the size is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_written as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not started.
    Pending,
    /// Request sent, waiting for response headers.
    Connecting,
    /// Writing body chunks.
    Streaming,
    /// File written and validated.
    Completed,
    /// Gave up.
    Failed,
}

/// A finished, validated download.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Final path on disk.
    pub path: PathBuf,
    /// File size in bytes.
    pub bytes: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Validator report for the file.
    pub validation: ValidationOutcome,
}

/// Executes downloads against a shared client, limiter and validator.
#[derive(Debug, Clone)]
pub struct Transfer {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    validator: Arc<FileValidator>,
}

impl Transfer {
    /// Creates a transfer executor.
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        validator: Arc<FileValidator>,
    ) -> Self {
        Self {
            client,
            limiter,
            policy,
            validator,
        }
    }

    /// The shared bandwidth limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Retry policy applied to each transfer.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Downloads `request.url` to `request.destination`.
    ///
    /// `on_progress` is called after every chunk write.
    ///
    /// # Errors
    ///
    /// [`TransferFailure`] wrapping the last attempt's [`DownloadError`]:
    /// retry budget exhausted, a permanent HTTP status, cancellation, or a
    /// failed content check (the file stays on disk in that case).
    #[instrument(skip(self, control, on_progress), fields(url = %request.url, dest = %request.destination.display()))]
    pub async fn run<F>(
        &self,
        request: &TransferRequest,
        control: &TransferControl,
        mut on_progress: F,
    ) -> Result<TransferOutcome, TransferFailure>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let mut state = TransferState::Pending;

        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferFailure::new(0, DownloadError::io(parent, e)))?;
        }

        let mut attempt: u32 = 1;
        let bytes = loop {
            if control.is_cancelled() {
                advance(&mut state, TransferState::Failed);
                return Err(TransferFailure::new(
                    attempt - 1,
                    DownloadError::cancelled(&request.url),
                ));
            }

            match self
                .attempt(request, control, &mut state, &mut on_progress)
                .await
            {
                Ok(bytes) => break bytes,
                Err(error) => match self.policy.should_retry(&error, attempt) {
                    RetryDecision::Retry { delay, attempt: next } => {
                        warn!(
                            attempt,
                            error = %error,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "attempt failed; retry scheduled"
                        );
                        tokio::select! {
                            biased;
                            () = control.cancel.cancelled() => {
                                advance(&mut state, TransferState::Failed);
                                return Err(TransferFailure::new(attempt, DownloadError::cancelled(&request.url)));
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(attempt, reason = %reason, "giving up");
                        advance(&mut state, TransferState::Failed);
                        return Err(TransferFailure::new(attempt, error));
                    }
                },
            }
        };

        let validation = self.validate(request).await;
        if !validation.valid {
            warn!(reason = validation.reason(), "downloaded file failed validation; keeping it");
            advance(&mut state, TransferState::Failed);
            return Err(TransferFailure::new(
                attempt,
                DownloadError::validation(&request.destination, validation.reason()),
            ));
        }

        advance(&mut state, TransferState::Completed);
        info!(bytes, attempts = attempt, "download complete");
        Ok(TransferOutcome {
            path: request.destination.clone(),
            bytes,
            attempts: attempt,
            validation,
        })
    }

    /// One GET-to-file attempt. The partial file never survives a failure.
    async fn attempt<F>(
        &self,
        request: &TransferRequest,
        control: &TransferControl,
        state: &mut TransferState,
        on_progress: &mut F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let url = request.url.as_str();
        advance(state, TransferState::Connecting);

        let response = tokio::select! {
            biased;
            () = control.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            response = self.client.get(url) => response?,
        };
        let total = response.content_length();

        let partial = partial_path(&request.destination);
        let file = File::create(&partial)
            .await
            .map_err(|e| DownloadError::io(&partial, e))?;

        advance(state, TransferState::Streaming);
        let result = self
            .stream_to_file(file, response, url, &partial, total, control, on_progress)
            .await;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %partial.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(error);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &request.destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::io(&request.destination, e));
        }
        Ok(bytes)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_to_file<F>(
        &self,
        file: File,
        response: reqwest::Response,
        url: &str,
        partial: &std::path::Path,
        total: Option<u64>,
        control: &TransferControl,
        on_progress: &mut F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = control.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
                next = stream.next() => next,
            };
            let Some(chunk_result) = next else {
                break;
            };
            let chunk = chunk_result.map_err(|e| DownloadError::from_reqwest(url, e))?;

            for piece in chunk.chunks(CHUNK_SIZE) {
                if control.is_cancelled() || !control.wait_while_paused().await {
                    return Err(DownloadError::cancelled(url));
                }
                tokio::select! {
                    biased;
                    () = control.cancel.cancelled() => return Err(DownloadError::cancelled(url)),
                    () = self.limiter.acquire(piece.len()) => {}
                }

                writer
                    .write_all(piece)
                    .await
                    .map_err(|e| DownloadError::io(partial, e))?;
                bytes_written += piece.len() as u64;
                on_progress(TransferProgress {
                    bytes_written,
                    total,
                });
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(partial, e))?;
        debug!(bytes_written, "body streamed");
        Ok(bytes_written)
    }

    async fn validate(&self, request: &TransferRequest) -> ValidationOutcome {
        let validator = Arc::clone(&self.validator);
        let path = request.destination.clone();
        let file_type = request.file_type.clone();
        let outcome =
            tokio::task::spawn_blocking(move || validator.validate(&path, file_type.as_deref()))
                .await;
        match outcome {
            Ok(outcome) => outcome,
            Err(join_error) => ValidationOutcome::invalid(
                request.file_type.as_deref().unwrap_or("unknown"),
                format!("validator crashed: {join_error}"),
            ),
        }
    }
}

fn advance(state: &mut TransferState, next: TransferState) {
    if *state != next {
        debug!(from = ?*state, to = ?next, "transfer state");
        *state = next;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction_known_total() {
        let progress = TransferProgress {
            bytes_written: 256,
            total: Some(1024),
        };
        assert_eq!(progress.fraction(), Some(0.25));
    }

    #[test]
    fn test_progress_fraction_unknown_total() {
        let progress = TransferProgress {
            bytes_written: 256,
            total: None,
        };
        assert_eq!(progress.fraction(), None);
    }

    #[test]
    fn test_progress_fraction_clamped_and_empty() {
        let over = TransferProgress {
            bytes_written: 2048,
            total: Some(1024),
        };
        assert_eq!(over.fraction(), Some(1.0));
        let empty = TransferProgress {
            bytes_written: 0,
            total: Some(0),
        };
        assert_eq!(empty.fraction(), Some(1.0));
    }

    #[test]
    fn test_advance_updates_state() {
        let mut state = TransferState::Pending;
        advance(&mut state, TransferState::Connecting);
        assert_eq!(state, TransferState::Connecting);
        advance(&mut state, TransferState::Connecting);
        assert_eq!(state, TransferState::Connecting);
    }

    #[tokio::test]
    async fn test_control_pause_then_resume() {
        let (tx, rx) = watch::channel(true);
        let control = TransferControl::new(CancellationToken::new(), rx);
        let waiter = tokio::spawn(async move { control.wait_while_paused().await });
        tokio::task::yield_now().await;
        tx.send(false).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_control_cancel_while_paused() {
        let (_tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let control = TransferControl::new(cancel.clone(), rx);
        let waiter = tokio::spawn(async move { control.wait_while_paused().await });
        cancel.cancel();
        assert!(!waiter.await.unwrap());
    }
}
