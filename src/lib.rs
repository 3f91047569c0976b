//! Docsync Core Library
//!
//! This library discovers documents published on remote sites, compares them
//! against a local library, and downloads whatever is missing, changed or
//! corrupted under concurrency, bandwidth and retry limits.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - TOML settings, defaults and validation
//! - [`db`] - Database connection and schema management
//! - [`inventory`] - Site, remote file, local file and history stores
//! - [`registry`] - Keyed capability registries with plugin discovery
//! - [`scraper`] - Scraper capability, built-in scrapers and the site scanner
//! - [`validator`] - Post-download file validators
//! - [`download`] - HTTP client, rate limiter, retry policy and transfers
//! - [`orchestrator`] - Priority job queue and worker pool
//! - [`comparison`] - Remote vs local diff and download-queue construction
//!
//! Data flows scanner -> inventory -> comparison -> orchestrator -> history.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod comparison;
pub mod config;
pub mod db;
pub mod download;
pub mod inventory;
pub mod orchestrator;
pub mod registry;
pub mod scraper;
mod user_agent;
pub mod validator;

// Re-export commonly used types
pub use comparison::{ComparisonResult, FileComparisonEngine, QueueSelection};
pub use config::{ConfigError, Settings};
pub use db::{Database, DbError};
pub use download::{HttpClient, RateLimiter, RetryPolicy, Transfer};
pub use inventory::{SqliteInventory, StoreError};
pub use orchestrator::{
    DEFAULT_PRIORITY, DownloadOrchestrator, JobId, JobSpec, JobState, OrchestratorConfig,
    OrchestratorError, OrchestratorEvent,
};
pub use scraper::{ScanReport, SiteScanner};
pub use validator::FileValidator;
