//! Post-download content checks.
//!
//! A [`Validator`] inspects a file on disk and reports a [`ValidationOutcome`]
//! (pass/fail plus whatever metadata it could extract). Validators never fail
//! with an error for a missing or corrupt file; they report `valid = false`
//! with a reason instead.
//!
//! Built-in validators are registered from [`builtin_catalog`] into a
//! [`ValidatorRegistry`]. [`FileValidator`] is the read-only facade the rest of
//! the crate uses: it picks a validator by file type or extension and falls
//! back to a generic "exists and non-empty" check.

mod epub;
mod generic;
mod markdown;
mod pdf;
mod text;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::download::filename::extension_of;
use crate::registry::{CapabilityRegistry, Factory, PluginDescriptor, RegistryError, normalize_extension};

pub use epub::EpubValidator;
pub use generic::GenericValidator;
pub use markdown::MarkdownValidator;
pub use pdf::PdfValidator;
pub use text::TextValidator;

/// Key reported by the fallback validator.
pub const GENERIC_FILE_TYPE: &str = "generic";

/// Registry of validator factories.
pub type ValidatorRegistry = CapabilityRegistry<dyn Validator>;

/// Content check for one file type.
pub trait Validator: Send + Sync {
    /// Registry key / file type this validator handles (`pdf`, `epub`, ...).
    fn file_type(&self) -> &'static str;

    /// Extensions (with leading dot) this validator claims.
    fn extensions(&self) -> &'static [&'static str];

    /// Returns true if this validator claims `extension`.
    fn can_handle(&self, extension: &str) -> bool {
        let wanted = normalize_extension(extension);
        self.extensions().iter().any(|ext| *ext == wanted)
    }

    /// Checks the file at `path`.
    fn validate(&self, path: &Path) -> ValidationOutcome;
}

/// Result of validating one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Whether the file passed.
    pub valid: bool,
    /// Validator that produced this outcome.
    pub file_type: String,
    /// Extracted metadata (page count, title, encoding, ...).
    pub metadata: BTreeMap<String, String>,
    /// Reason for failure when `valid` is false.
    pub error: Option<String>,
}

impl ValidationOutcome {
    /// A passing outcome.
    #[must_use]
    pub fn valid(file_type: &str, metadata: BTreeMap<String, String>) -> Self {
        Self {
            valid: true,
            file_type: file_type.to_string(),
            metadata,
            error: None,
        }
    }

    /// A failing outcome with a reason.
    #[must_use]
    pub fn invalid(file_type: &str, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            file_type: file_type.to_string(),
            metadata: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    /// Failure reason, or a generic message when none was given.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.error.as_deref().unwrap_or("validation failed")
    }
}

fn factory_of<V>(make: fn() -> V) -> Factory<dyn Validator, ()>
where
    V: Validator + 'static,
{
    Arc::new(move |_: &()| Ok(Box::new(make()) as Box<dyn Validator>))
}

/// Compile-time table of built-in validators.
#[must_use]
pub fn builtin_catalog() -> Vec<PluginDescriptor<dyn Validator>> {
    vec![
        PluginDescriptor {
            key: pdf::FILE_TYPE,
            extensions: pdf::EXTENSIONS,
            load: || Ok(factory_of(|| PdfValidator)),
        },
        PluginDescriptor {
            key: epub::FILE_TYPE,
            extensions: epub::EXTENSIONS,
            load: || Ok(factory_of(|| EpubValidator)),
        },
        PluginDescriptor {
            key: text::FILE_TYPE,
            extensions: text::EXTENSIONS,
            load: || Ok(factory_of(|| TextValidator)),
        },
        PluginDescriptor {
            key: markdown::FILE_TYPE,
            extensions: markdown::EXTENSIONS,
            load: || Ok(factory_of(|| MarkdownValidator)),
        },
    ]
}

/// Validator registry populated with the built-ins, minus `disabled` keys.
#[must_use]
pub fn builtin_registry(disabled: &[String]) -> ValidatorRegistry {
    let mut registry = ValidatorRegistry::new("validator");
    registry.discover(&builtin_catalog(), disabled);
    registry
}

/// Picks and runs the right validator for a file.
#[derive(Debug, Clone)]
pub struct FileValidator {
    registry: Arc<ValidatorRegistry>,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new(Arc::new(builtin_registry(&[])))
    }
}

impl FileValidator {
    /// Wraps a fully populated registry.
    #[must_use]
    pub fn new(registry: Arc<ValidatorRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Validates `path`, choosing a validator by `file_type`, then by extension,
    /// then falling back to [`GenericValidator`].
    ///
    /// A validator that cannot be constructed yields an invalid outcome.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn validate(&self, path: &Path, file_type: Option<&str>) -> ValidationOutcome {
        let by_type = file_type.filter(|key| self.registry.contains(key));
        let key = by_type.or_else(|| self.file_type_for_path(path));

        let Some(key) = key else {
            debug!("no validator claims file; using generic check");
            return GenericValidator.validate(path);
        };

        match self.registry.resolve(key, &()) {
            Ok(validator) => validator.validate(path),
            Err(err) => ValidationOutcome::invalid(key, err.to_string()),
        }
    }

    /// Validates `path` with the validator registered under `key`.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] when `key` is unknown or its factory fails.
    pub fn validate_as(&self, key: &str, path: &Path) -> Result<ValidationOutcome, RegistryError> {
        let validator = self.registry.resolve(key, &())?;
        Ok(validator.validate(path))
    }

    /// File type key claiming `extension`, if any.
    #[must_use]
    pub fn file_type_for_extension(&self, extension: &str) -> Option<&str> {
        self.registry.key_for_extension(extension)
    }

    /// File type key for `path` by its extension, if any validator claims it.
    #[must_use]
    pub fn file_type_for_path(&self, path: &Path) -> Option<&str> {
        let name = path.file_name()?.to_str()?;
        let extension = extension_of(name)?;
        self.registry.key_for_extension(&extension)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    struct AlwaysInvalid;

    impl Validator for AlwaysInvalid {
        fn file_type(&self) -> &'static str {
            "strict"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &[".pdf"]
        }

        fn validate(&self, _path: &Path) -> ValidationOutcome {
            ValidationOutcome::invalid("strict", "always rejects")
        }
    }

    #[test]
    fn test_builtin_registry_claims_known_extensions() {
        let registry = builtin_registry(&[]);
        assert_eq!(registry.key_for_extension(".pdf"), Some("pdf"));
        assert_eq!(registry.key_for_extension(".epub"), Some("epub"));
        assert_eq!(registry.key_for_extension(".txt"), Some("text"));
        assert_eq!(registry.key_for_extension(".text"), Some("text"));
        assert_eq!(registry.key_for_extension(".md"), Some("markdown"));
        assert_eq!(registry.key_for_extension(".markdown"), Some("markdown"));
    }

    #[test]
    fn test_builtin_registry_disabled_plugin_skipped() {
        let registry = builtin_registry(&["markdown".to_string()]);
        assert!(!registry.contains("markdown"));
        assert!(registry.key_for_extension(".md").is_none());
    }

    #[test]
    fn test_can_handle_normalizes() {
        assert!(PdfValidator.can_handle("PDF"));
        assert!(PdfValidator.can_handle(".pdf"));
        assert!(!PdfValidator.can_handle(".epub"));
    }

    #[test]
    fn test_file_validator_unknown_extension_uses_generic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"\x00\x01").unwrap();

        let outcome = FileValidator::default().validate(&path, None);
        assert!(outcome.valid);
        assert_eq!(outcome.file_type, GENERIC_FILE_TYPE);
    }

    #[test]
    fn test_file_validator_generic_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let outcome = FileValidator::default().validate(&path, None);
        assert!(!outcome.valid);
    }

    #[test]
    fn test_file_validator_dispatches_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let outcome = FileValidator::default().validate(&path, None);
        assert!(!outcome.valid);
        assert_eq!(outcome.file_type, "pdf");
    }

    #[test]
    fn test_file_validator_explicit_type_wins_over_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"plain words").unwrap();

        let outcome = FileValidator::default().validate(&path, Some("text"));
        assert!(outcome.valid, "{outcome:?}");
        assert_eq!(outcome.file_type, "text");
    }

    #[test]
    fn test_file_validator_override_replaces_builtin() {
        let mut registry = builtin_registry(&[]);
        registry.register_with_extensions(
            "strict",
            &[".pdf"],
            Arc::new(|_: &()| Ok(Box::new(AlwaysInvalid) as Box<dyn Validator>)),
        );
        let validator = FileValidator::new(Arc::new(registry));
        assert_eq!(validator.file_type_for_extension("pdf"), Some("strict"));
    }

    #[test]
    fn test_validate_as_unknown_key_fails_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        let err = FileValidator::default()
            .validate_as("djvu", &path)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_file_validator_missing_file_is_invalid_not_error() {
        let dir = TempDir::new().unwrap();
        let outcome = FileValidator::default().validate(&dir.path().join("gone.epub"), None);
        assert!(!outcome.valid);
        assert!(outcome.error.is_some());
    }
}
