//! Constants for the download module (timeouts, chunking, retry bounds).

use std::time::Duration;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default overall HTTP timeout for one attempt.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Size of each write (and each rate-limiter acquisition) while streaming.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Maximum wait a Retry-After header can impose.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Suffix appended to the destination while bytes are still arriving.
pub const PARTIAL_SUFFIX: &str = "part";
