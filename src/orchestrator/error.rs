//! Error types for orchestrator operations.

use thiserror::Error;

use super::job::{JobId, JobState};
use crate::config::ConfigError;

/// Errors returned by the orchestrator's control surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The remote file is already queued or downloading.
    #[error("remote file {remote_file_id} is already queued as job {existing}")]
    DuplicateJob {
        /// Remote identity of the rejected spec.
        remote_file_id: i64,
        /// Job currently holding that identity.
        existing: JobId,
    },

    /// The job spec cannot be downloaded as given.
    #[error("invalid job for remote file {remote_file_id}: {reason}")]
    InvalidSpec {
        /// Remote identity of the rejected spec.
        remote_file_id: i64,
        /// What is wrong with it.
        reason: String,
    },

    /// No job with this id.
    #[error("job {0} not found")]
    UnknownJob(JobId),

    /// The operation does not apply in the job's current state.
    #[error("cannot {operation} job {job_id} while it is {state}")]
    InvalidState {
        /// Target job.
        job_id: JobId,
        /// State the job was in.
        state: JobState,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// Worker count or rate limit out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    pub(crate) fn invalid_state(job_id: JobId, state: JobState, operation: &'static str) -> Self {
        Self::InvalidState {
            job_id,
            state,
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_job_message() {
        let err = OrchestratorError::DuplicateJob {
            remote_file_id: 7,
            existing: JobId(3),
        };
        assert_eq!(err.to_string(), "remote file 7 is already queued as job 3");
    }

    #[test]
    fn test_invalid_state_message() {
        let err = OrchestratorError::invalid_state(JobId(2), JobState::Downloading, "reprioritize");
        assert_eq!(err.to_string(), "cannot reprioritize job 2 while it is downloading");
    }
}
