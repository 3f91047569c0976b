//! Plain-text check: non-empty and decodable.

use std::collections::BTreeMap;
use std::path::Path;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

use super::{ValidationOutcome, Validator};

pub(super) const FILE_TYPE: &str = "text";
pub(super) const EXTENSIONS: &[&str] = &[".txt", ".text"];

/// Validates plain-text files, detecting their encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextValidator;

impl Validator for TextValidator {
    fn file_type(&self) -> &'static str {
        FILE_TYPE
    }

    fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn validate(&self, path: &Path) -> ValidationOutcome {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => return ValidationOutcome::invalid(FILE_TYPE, format!("cannot read file: {err}")),
        };
        inspect(&bytes)
    }
}

fn inspect(bytes: &[u8]) -> ValidationOutcome {
    if bytes.is_empty() {
        return ValidationOutcome::invalid(FILE_TYPE, "file is empty");
    }

    let Some((text, encoding)) = decode(bytes) else {
        return ValidationOutcome::invalid(FILE_TYPE, "content is not decodable text");
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("encoding".to_string(), encoding.name().to_string());
    metadata.insert("size".to_string(), bytes.len().to_string());
    metadata.insert("lines".to_string(), text.lines().count().to_string());
    ValidationOutcome::valid(FILE_TYPE, metadata)
}

/// BOM first, then statistical detection; falls back to strict UTF-8.
fn decode(bytes: &[u8]) -> Option<(String, &'static Encoding)> {
    let encoding = if let Some((enc, _)) = Encoding::for_bom(bytes) {
        enc
    } else {
        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        detector.guess(None, true)
    };

    let (text, used, had_errors) = encoding.decode(bytes);
    if !had_errors && !contains_binary_controls(&text) {
        return Some((text.into_owned(), used));
    }

    let text = std::str::from_utf8(bytes).ok()?;
    (!contains_binary_controls(text)).then(|| (text.to_string(), UTF_8))
}

/// NUL and other C0 controls (besides whitespace) mark binary content.
fn contains_binary_controls(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{c}'))
}
