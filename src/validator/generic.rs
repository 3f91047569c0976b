//! Fallback validator for files no registered validator claims.

use std::collections::BTreeMap;
use std::path::Path;

use super::{GENERIC_FILE_TYPE, ValidationOutcome, Validator};

/// Valid iff the file exists and is non-empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericValidator;

impl Validator for GenericValidator {
    fn file_type(&self) -> &'static str {
        GENERIC_FILE_TYPE
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn validate(&self, path: &Path) -> ValidationOutcome {
        match std::fs::metadata(path) {
            Ok(meta) if !meta.is_file() => {
                ValidationOutcome::invalid(GENERIC_FILE_TYPE, "not a regular file")
            }
            Ok(meta) if meta.len() == 0 => {
                ValidationOutcome::invalid(GENERIC_FILE_TYPE, "file is empty")
            }
            Ok(meta) => {
                let mut metadata = BTreeMap::new();
                metadata.insert("size".to_string(), meta.len().to_string());
                ValidationOutcome::valid(GENERIC_FILE_TYPE, metadata)
            }
            Err(err) => ValidationOutcome::invalid(GENERIC_FILE_TYPE, format!("cannot read file: {err}")),
        }
    }
}
