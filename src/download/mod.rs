//! HTTP transfer primitives for streaming documents to disk.
//!
//! - [`HttpClient`]: pooled reqwest client with timeouts, proxy and user agent
//! - [`RateLimiter`]: token bucket bounding aggregate bytes/sec across transfers
//! - [`RetryPolicy`]: fixed-delay retry decisions driven by [`classify_error`]
//! - [`Transfer`]: one GET-to-file operation with chunked, rate-limited writes,
//!   cooperative cancel/pause and post-download validation
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use docsync_core::download::{
//!     ClientOptions, HttpClient, RateLimiter, RetryPolicy, Transfer, TransferControl,
//!     TransferRequest,
//! };
//! use docsync_core::validator::FileValidator;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transfer = Transfer::new(
//!     HttpClient::new(&ClientOptions::default())?,
//!     Arc::new(RateLimiter::new(512 * 1024)),
//!     RetryPolicy::default(),
//!     Arc::new(FileValidator::default()),
//! );
//! let request = TransferRequest {
//!     url: "https://example.com/manual.pdf".to_string(),
//!     destination: PathBuf::from("downloads/manual.pdf"),
//!     file_type: None,
//! };
//! let control = TransferControl::cancellable(CancellationToken::new());
//! let outcome = transfer.run(&request, &control, |_| {}).await?;
//! println!("wrote {} bytes", outcome.bytes);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod filename;
mod rate_limiter;
mod retry;
mod transfer;

pub use client::{ClientOptions, HttpClient};
pub use error::{DownloadError, TransferFailure};
pub use rate_limiter::RateLimiter;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after,
};
pub use transfer::{
    Transfer, TransferControl, TransferOutcome, TransferProgress, TransferRequest, TransferState,
};

// Note: no module-local Result alias; use `Result<T, DownloadError>` explicitly.
