//! Markdown check: non-empty UTF-8, with a title taken from the first heading.

use std::collections::BTreeMap;
use std::path::Path;

use super::{ValidationOutcome, Validator};

pub(super) const FILE_TYPE: &str = "markdown";
pub(super) const EXTENSIONS: &[&str] = &[".md", ".markdown"];

/// Validates Markdown documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownValidator;

impl Validator for MarkdownValidator {
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
    let Ok(text) = std::str::from_utf8(bytes) else {
        return ValidationOutcome::invalid(FILE_TYPE, "content is not valid UTF-8");
    };
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut metadata = BTreeMap::new();
    let headings: Vec<&str> = text
        .lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with('#'))
        .collect();
    if let Some(title) = headings
        .iter()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        metadata.insert("title".to_string(), title.to_string());
    }
    metadata.insert("header_count".to_string(), headings.len().to_string());
    metadata.insert("size".to_string(), bytes.len().to_string());
    ValidationOutcome::valid(FILE_TYPE, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_title_and_headers() {
        let doc = "intro text\n# Install Guide\n\n## Linux\n## macOS\nbody\n";
        let outcome = inspect(doc.as_bytes());
        assert!(outcome.valid);
        assert_eq!(
            outcome.metadata.get("title").map(String::as_str),
            Some("Install Guide")
        );
        assert_eq!(
            outcome.metadata.get("header_count").map(String::as_str),
            Some("3")
        );
    }

    #[test]
    fn test_markdown_without_headings_still_valid() {
        let outcome = inspect(b"just a paragraph");
        assert!(outcome.valid);
        assert!(!outcome.metadata.contains_key("title"));
    }

    #[test]
    fn test_markdown_rejects_invalid_utf8() {
        let outcome = inspect(&[b'#', b' ', 0xff, 0xfe]);
        assert!(!outcome.valid);
    }

    #[test]
    fn test_markdown_empty_is_invalid() {
        assert!(!inspect(b"").valid);
    }
}
