//! Retry decisions for failed transfer attempts.
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - connect/read failures and timeouts, 408 and 5xx
//! - [`FailureType::RateLimited`] - HTTP 429, waits at least as long as Retry-After asks
//! - [`FailureType::Permanent`] - other 4xx, invalid URL, local IO, failed validation
//! - [`FailureType::Cancelled`] - the job was cancelled; never retried
//!
//! The [`RetryPolicy`] then decides whether another attempt is allowed. The
//! delay between attempts is fixed (`retry_delay` from configuration) rather
//! than exponential.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use docsync_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(5));
//! let error = DownloadError::http_status("https://example.com/file.pdf", 503);
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! # let _ = classify_error(&error);
//! ```

use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::DownloadError;
use super::constants::{DEFAULT_RETRY_DELAY, MAX_RETRY_AFTER};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// Failure that won't succeed regardless of retries.
    Permanent,

    /// Server asked us to slow down (HTTP 429).
    RateLimited,

    /// The transfer was cancelled by the operator or by shutdown.
    Cancelled,
}

/// Decision on whether to retry a failed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the download after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the download.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Fixed-delay retry configuration.
///
/// A transfer makes at most `max_retries + 1` attempts and waits `delay`
/// between them. A Retry-After header longer than `delay` stretches the wait,
/// capped at `max_retry_after`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries with `delay` between attempts.
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            max_retry_after: MAX_RETRY_AFTER,
        }
    }

    /// Caps how long a server-provided Retry-After may stretch the wait.
    #[must_use]
    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    /// Number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Configured delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed with `error`.
    #[instrument(skip(self, error), fields(max_attempts = self.max_attempts()))]
    pub fn should_retry(&self, error: &DownloadError, attempt: u32) -> RetryDecision {
        let failure_type = classify_error(error);
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Cancelled => {
                return RetryDecision::DoNotRetry {
                    reason: "cancelled".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, max = self.max_attempts(), "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts()),
            };
        }

        let delay = match error {
            DownloadError::HttpStatus {
                retry_after: Some(requested),
                ..
            } if *requested > self.delay => {
                if *requested > self.max_retry_after {
                    warn!(
                        requested_secs = requested.as_secs(),
                        cap_secs = self.max_retry_after.as_secs(),
                        "Retry-After exceeds cap"
                    );
                }
                (*requested).min(self.max_retry_after).max(self.delay)
            }
            _ => self.delay,
        };

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network, Timeout | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | Other HTTP status | Permanent |
/// | Io, InvalidUrl, Validation | Permanent |
/// | Cancelled | Cancelled |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } | DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Validation { .. } => FailureType::Permanent,
        DownloadError::Cancelled { .. } => FailureType::Cancelled,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Returns `None` for negative, past, or unparseable values.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        return datetime.duration_since(std::time::SystemTime::now()).ok();
    }

    debug!(value = header_value, "unparseable Retry-After value, ignoring");
    None
}
