//! Aggregate bandwidth limiting shared by all active transfers.
//!
//! [`RateLimiter`] is a token bucket measured in bytes. Tokens refill
//! continuously at `bytes_per_sec`, computed from the time elapsed since the
//! previous refill, and the bucket never holds more than one burst (one chunk
//! by default). A limit of `0` disables limiting entirely.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use docsync_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(512 * 1024));
//!
//! let shared = Arc::clone(&limiter);
//! tokio::spawn(async move {
//!     shared.acquire(8192).await;
//!     // ... write the chunk
//! });
//!
//! // Takes effect for the next refill; running transfers keep going.
//! limiter.set_limit(0);
//! # }
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::constants::CHUNK_SIZE;

/// Longest single sleep inside `acquire`.
///
/// Waiters re-check the bucket at least this often, so a new limit applies to
/// them without restarting the transfer.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(250);

/// Floor for computed waits so float rounding cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Token bucket shared across all concurrent transfers.
///
/// All state lives behind one `std::sync::Mutex` that is only held for
/// arithmetic; callers sleep with the lock released.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// Refill rate; 0 means unlimited.
    bytes_per_sec: u64,
    /// Maximum tokens the bucket can hold.
    burst: f64,
    /// Tokens currently available. May go negative when a grant is larger than one burst.
    available: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        if self.bytes_per_sec == 0 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let added = elapsed.as_secs_f64() * self.bytes_per_sec as f64;
        self.available = (self.available + added).min(self.burst);
    }
}

impl RateLimiter {
    /// Creates a limiter refilling at `bytes_per_sec`; `0` disables limiting.
    #[must_use]
    pub fn new(bytes_per_sec: u64) -> Self {
        Self::with_burst(bytes_per_sec, CHUNK_SIZE)
    }

    /// Creates a limiter with an explicit burst size in bytes.
    #[must_use]
    pub fn with_burst(bytes_per_sec: u64, burst_bytes: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let burst = burst_bytes.max(1) as f64;
        Self {
            bucket: Mutex::new(Bucket {
                bytes_per_sec,
                burst,
                available: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a limiter that grants everything immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Current refill rate in bytes per second (`0` = unlimited).
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.lock().bytes_per_sec
    }

    /// Returns true when limiting is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.limit() > 0
    }

    /// Changes the refill rate for future refills.
    ///
    /// Tokens accrued so far are credited at the old rate first.
    #[instrument(skip(self))]
    pub fn set_limit(&self, bytes_per_sec: u64) {
        let mut bucket = self.lock();
        let now = Instant::now();
        let was_disabled = bucket.bytes_per_sec == 0;
        bucket.refill(now);
        bucket.bytes_per_sec = bytes_per_sec;
        if was_disabled && bytes_per_sec > 0 {
            bucket.available = bucket.burst;
        }
        info!(bytes_per_sec, "rate limit updated");
    }

    /// Waits until `bytes` worth of tokens are available, then consumes them.
    ///
    /// Requests larger than one burst wait for a full bucket and leave it in
    /// debt, so the long-run rate still holds.
    pub async fn acquire(&self, bytes: usize) {
        while let Some(wait) = self.try_take(bytes) {
            tokio::time::sleep(wait.min(MAX_WAIT_SLICE)).await;
        }
    }

    /// Takes tokens if possible; otherwise returns how long to wait.
    fn try_take(&self, bytes: usize) -> Option<Duration> {
        let mut bucket = self.lock();
        if bucket.bytes_per_sec == 0 {
            return None;
        }
        bucket.refill(Instant::now());

        #[allow(clippy::cast_precision_loss)]
        let requested = bytes as f64;
        let needed = requested.min(bucket.burst);
        if bucket.available >= needed {
            bucket.available -= requested;
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let wait_secs = (needed - bucket.available) / bucket.bytes_per_sec as f64;
        let wait = Duration::from_secs_f64(wait_secs).max(MIN_WAIT);
        debug!(bytes, wait_ms = wait.as_millis(), "rate limit wait");
        Some(wait)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
