//! Job identity, request and lifecycle state.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Priority given to jobs when the caller has no preference. Lower runs first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Orchestrator-assigned job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    /// Remote inventory row; the job's identity while queued or active.
    pub remote_file_id: i64,
    /// Source URL.
    pub url: String,
    /// Name shown to the operator and used for the file name.
    pub display_name: String,
    /// Expected size in bytes, if known.
    pub size_hint: Option<u64>,
    /// Validator key.
    pub file_type: Option<String>,
    /// Subdirectory under the download directory.
    pub category: Option<String>,
}

/// Job lifecycle.
///
/// `Queued -> Downloading -> {Completed | Failed}`, with `Downloading <-> Paused`
/// and `Cancelled` reachable from `Queued`, `Downloading` or `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Queued,
    /// A worker is transferring it.
    Downloading,
    /// Held at a chunk boundary; keeps its worker.
    Paused,
    /// File written and validated.
    Completed,
    /// Gave up; `last_error` says why.
    Failed,
    /// Cancelled by the operator.
    Cancelled,
}

impl JobState {
    /// True for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True while a worker owns the job.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Paused)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    /// Job id.
    pub id: JobId,
    /// What is being downloaded.
    pub spec: JobSpec,
    /// Lower runs first.
    pub priority: i32,
    /// Current state.
    pub state: JobState,
    /// Completed fraction in `0.0..=1.0`; never decreases while downloading.
    pub progress: f64,
    /// Bytes written by the current attempt.
    pub bytes_written: u64,
    /// Failure reason once `Failed`.
    pub last_error: Option<String>,
    /// Written file once `Completed`.
    pub local_path: Option<PathBuf>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When a worker picked it up.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(id: JobId, spec: JobSpec, priority: i32) -> Self {
        Self {
            id,
            spec,
            priority,
            state: JobState::Queued,
            progress: 0.0,
            bytes_written: 0,
            last_error: None,
            local_path: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Remote identity used for duplicate detection.
    #[must_use]
    pub fn remote_file_id(&self) -> i64 {
        self.spec.remote_file_id
    }
}
