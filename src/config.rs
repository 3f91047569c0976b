//! Application settings loaded from a TOML file.
//!
//! Every section carries `#[serde(default)]`, so a partial file (or none at
//! all) yields usable settings. [`Settings::validate`] enforces the ranges the
//! orchestrator relies on; CLI flags are layered on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::download::{ClientOptions, RetryPolicy};
use crate::registry::normalize_extension;

/// Upper bound for `download.concurrent_downloads`.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 100;

/// Upper bound for `download.retry_count`.
pub const MAX_RETRY_COUNT: u32 = 10;

/// Errors loading, saving or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the settings file failed.
    #[error("cannot access config file {path}: {source}")]
    Io {
        /// Settings file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Settings`].
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// Settings could not be serialized.
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted setting name, e.g. `download.concurrent_downloads`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an out-of-range error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// All settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP client settings.
    pub network: NetworkSettings,
    /// Orchestrator and transfer settings.
    pub download: DownloadSettings,
    /// Which document types the scrapers collect.
    pub file_types: FileTypeSettings,
    /// Database location.
    pub storage: StorageSettings,
    /// Plugin selection.
    pub plugins: PluginSettings,
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Proxy applied to every request.
    pub proxy_url: Option<String>,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Overall per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            proxy_url: None,
            user_agent: None,
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Orchestrator and transfer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Number of workers.
    pub concurrent_downloads: usize,
    /// Aggregate bandwidth cap in KiB/s; 0 = unlimited.
    pub rate_limit_kbps: i64,
    /// Retries after the first attempt.
    pub retry_count: u32,
    /// Pause between attempts, in seconds.
    pub retry_delay_secs: u64,
    /// Root directory for downloaded files.
    pub directory: PathBuf,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrent_downloads: 3,
            rate_limit_kbps: 500,
            retry_count: 3,
            retry_delay_secs: 5,
            directory: PathBuf::from("downloads"),
        }
    }
}

/// Document types the scrapers collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTypeSettings {
    /// Collect `.pdf` links.
    pub pdf_enabled: bool,
    /// Collect `.epub` links.
    pub epub_enabled: bool,
    /// Collect `.txt` links.
    pub txt_enabled: bool,
    /// Further extensions to collect (with or without a leading dot).
    pub extra_extensions: Vec<String>,
}

impl Default for FileTypeSettings {
    fn default() -> Self {
        Self {
            pdf_enabled: true,
            epub_enabled: true,
            txt_enabled: true,
            extra_extensions: Vec::new(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("docsync.db"),
        }
    }
}

/// Plugin selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Registry keys skipped during discovery.
    pub disabled: Vec<String>,
}

impl Settings {
    /// Reads and validates settings from `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`], [`ConfigError::Parse`] or a validation error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Loads `path` when it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`Settings::load`] for an existing file.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no settings file; using defaults");
            Ok(Self::default())
        }
    }

    /// Writes settings to `path` as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] or [`ConfigError::Io`].
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_workers(self.download.concurrent_downloads)?;
        if self.download.rate_limit_kbps < 0 {
            return Err(ConfigError::invalid(
                "download.rate_limit_kbps",
                format!("{} is negative", self.download.rate_limit_kbps),
            ));
        }
        if self.download.retry_count > MAX_RETRY_COUNT {
            return Err(ConfigError::invalid(
                "download.retry_count",
                format!("{} exceeds {MAX_RETRY_COUNT}", self.download.retry_count),
            ));
        }
        if self.network.timeout_secs == 0 {
            return Err(ConfigError::invalid("network.timeout_secs", "must be > 0"));
        }
        if let Some(proxy) = self.network.proxy_url.as_deref() {
            url::Url::parse(proxy)
                .map_err(|e| ConfigError::invalid("network.proxy_url", e.to_string()))?;
        }
        Ok(())
    }

    /// HTTP client options derived from the network section.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.network.timeout_secs),
            connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
            proxy_url: self.network.proxy_url.clone(),
            user_agent: self.network.user_agent.clone(),
        }
    }

    /// Retry policy derived from the download section.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.download.retry_count,
            Duration::from_secs(self.download.retry_delay_secs),
        )
    }
}

impl DownloadSettings {
    /// Bandwidth cap in bytes/sec; 0 = unlimited.
    #[must_use]
    pub fn rate_limit_bytes_per_sec(&self) -> u64 {
        kbps_to_bytes_per_sec(self.rate_limit_kbps)
    }
}

impl FileTypeSettings {
    /// Normalized extensions (`.pdf`, ...) the scrapers should collect.
    #[must_use]
    pub fn enabled_extensions(&self) -> Vec<String> {
        let mut extensions = Vec::new();
        if self.pdf_enabled {
            extensions.push(".pdf".to_string());
        }
        if self.epub_enabled {
            extensions.push(".epub".to_string());
        }
        if self.txt_enabled {
            extensions.push(".txt".to_string());
        }
        for extra in &self.extra_extensions {
            let ext = normalize_extension(extra);
            if ext.len() > 1 && !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        extensions
    }
}

/// Converts KiB/s to bytes/sec; negative values count as unlimited.
#[must_use]
pub fn kbps_to_bytes_per_sec(kbps: i64) -> u64 {
    u64::try_from(kbps).unwrap_or(0).saturating_mul(1024)
}

/// Rejects worker counts outside `1..=MAX_CONCURRENT_DOWNLOADS`.
///
/// # Errors
///
/// [`ConfigError::Invalid`] for an out-of-range count.
pub fn validate_workers(workers: usize) -> Result<(), ConfigError> {
    if (1..=MAX_CONCURRENT_DOWNLOADS).contains(&workers) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "download.concurrent_downloads",
            format!("{workers} is outside 1..={MAX_CONCURRENT_DOWNLOADS}"),
        ))
    }
}
