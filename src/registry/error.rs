//! Error types for capability lookups.

use thiserror::Error;

/// Errors returned when resolving a capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Nothing is registered under the requested key or extension.
    #[error("no {kind} registered for '{key}'")]
    NotFound {
        /// Capability name (`scraper`, `validator`).
        kind: &'static str,
        /// The key or extension that was looked up.
        key: String,
    },

    /// The registered factory refused to build an instance.
    #[error("failed to construct {kind} '{key}': {reason}")]
    Construction {
        /// Capability name.
        kind: &'static str,
        /// Registry key.
        key: String,
        /// Reason returned by the factory.
        reason: String,
    },
}

impl RegistryError {
    /// Creates a `NotFound` error.
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Creates a `Construction` error.
    pub fn construction(kind: &'static str, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Construction {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = RegistryError::not_found("scraper", "fancy_site");
        assert_eq!(err.to_string(), "no scraper registered for 'fancy_site'");
    }

    #[test]
    fn test_construction_display() {
        let err = RegistryError::construction("scraper", "generic", "invalid base url");
        let msg = err.to_string();
        assert!(msg.contains("generic"));
        assert!(msg.contains("invalid base url"));
    }
}
