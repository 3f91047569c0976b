//! Notifications broadcast to orchestrator subscribers.

use std::path::PathBuf;

use serde::Serialize;

use super::job::JobId;

/// Capacity of the event channel; slow subscribers lose the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One job lifecycle notification.
///
/// Events for one job arrive in causal order; events for different jobs may
/// interleave.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// Job accepted into the queue.
    JobQueued {
        /// Job id.
        job_id: JobId,
    },
    /// A worker started the transfer.
    JobStarted {
        /// Job id.
        job_id: JobId,
    },
    /// Bytes arrived. `fraction` is `None` when the size is unknown.
    JobProgress {
        /// Job id.
        job_id: JobId,
        /// Completed fraction.
        fraction: Option<f64>,
        /// Bytes written by the current attempt.
        bytes: u64,
    },
    /// Transfer is holding at a chunk boundary.
    JobPaused {
        /// Job id.
        job_id: JobId,
    },
    /// Transfer continues.
    JobResumed {
        /// Job id.
        job_id: JobId,
    },
    /// File written and validated.
    JobCompleted {
        /// Job id.
        job_id: JobId,
        /// Final path.
        path: PathBuf,
    },
    /// Transfer gave up.
    JobFailed {
        /// Job id.
        job_id: JobId,
        /// Human-readable cause.
        reason: String,
    },
    /// Job was cancelled or removed.
    JobCancelled {
        /// Job id.
        job_id: JobId,
    },
}

impl OrchestratorEvent {
    /// The job this event is about.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobQueued { job_id }
            | Self::JobStarted { job_id }
            | Self::JobProgress { job_id, .. }
            | Self::JobPaused { job_id }
            | Self::JobResumed { job_id }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id } => *job_id,
        }
    }

    /// True for completed, failed and cancelled events.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobCompleted { .. } | Self::JobFailed { .. } | Self::JobCancelled { .. }
        )
    }
}

/// Decides which progress updates are worth an event: whole-percent steps
/// when the size is known, otherwise every [`UNKNOWN_SIZE_STEP`] bytes.
#[derive(Debug, Default)]
pub(crate) struct ProgressThrottle {
    last_percent: Option<u32>,
    last_bytes: u64,
}

/// Byte step between progress events for transfers of unknown size.
pub(crate) const UNKNOWN_SIZE_STEP: u64 = 256 * 1024;

impl ProgressThrottle {
    pub(crate) fn should_emit(&mut self, fraction: Option<f64>, bytes: u64) -> bool {
        match fraction {
            Some(fraction) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
                if self.last_percent.is_none_or(|last| percent > last) {
                    self.last_percent = Some(percent);
                    true
                } else {
                    false
                }
            }
            None => {
                if bytes < self.last_bytes {
                    // A retry restarted the body.
                    self.last_bytes = 0;
                }
                if bytes - self.last_bytes >= UNKNOWN_SIZE_STEP {
                    self.last_bytes = bytes;
                    true
                } else {
                    false
                }
            }
        }
    }
}
