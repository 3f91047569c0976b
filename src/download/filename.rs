//! Filename derivation, sanitization, and destination path resolution.

use std::path::{Path, PathBuf};

use chrono::Local;
use url::Url;

use super::constants::PARTIAL_SUFFIX;

/// Resolves `download_dir/<category>/<file name>` for a transfer.
///
/// Both components are sanitized so neither can escape `download_dir`. The
/// file name falls back to the URL's last path segment, then to a timestamped
/// `download_YYYYmmdd_HHMMSS` name carrying the file type's extension.
#[must_use]
pub fn resolve_destination(
    download_dir: &Path,
    category: Option<&str>,
    file_name: Option<&str>,
    url: &str,
    file_type: Option<&str>,
) -> PathBuf {
    let mut dir = download_dir.to_path_buf();
    if let Some(category) = category.map(sanitize_filename_component)
        && !category.is_empty()
    {
        dir.push(category);
    }

    let name = file_name
        .map(sanitize_file_name)
        .filter(|name| !name.is_empty())
        .or_else(|| file_name_from_url(url).map(|name| sanitize_file_name(&name)))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback_filename(file_type));

    dir.join(name)
}

/// Path used while bytes are still arriving (`name.pdf.part`).
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

/// Percent-decoded last path segment of `url`, if it has one.
#[must_use]
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned);
    Some(decoded)
}

/// Lowercased extension (with leading dot) of the URL's last path segment.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    extension_of(last_segment)
}

/// Lowercased extension (with leading dot) of a file name.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    let dot_index = name.rfind('.')?;
    let ext = &name[dot_index..];
    if ext.len() <= 1 || ext.len() > 12 {
        return None;
    }
    Some(ext.to_lowercase())
}

fn fallback_filename(file_type: Option<&str>) -> String {
    let extension = match file_type {
        Some("pdf") | None => "pdf",
        Some("text") => "txt",
        Some("markdown") => "md",
        Some(other) => other,
    };
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("download_{timestamp}.{extension}")
}

/// Sanitizes a full file name, keeping its extension dot.
///
/// Names made only of dots (`.`, `..`) are rewritten so they cannot walk up a directory.
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if sanitized.chars().all(|c| c == '.') {
        return sanitized.replace('.', "_");
    }
    sanitized
}

/// Sanitizes a single path component into `[alnum-_.]` with `_` separators.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.chars().all(|c| c == '.') {
        return String::new();
    }
    trimmed.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_destination_uses_category_and_name() {
        let dest = resolve_destination(
            Path::new("/data"),
            Some("Science Fiction"),
            Some("Dune.pdf"),
            "https://example.com/files/dune.pdf",
            Some("pdf"),
        );
        assert_eq!(dest, PathBuf::from("/data/Science_Fiction/Dune.pdf"));
    }

    #[test]
    fn test_resolve_destination_without_category() {
        let dest = resolve_destination(
            Path::new("/data"),
            None,
            Some("a.pdf"),
            "https://example.com/a.pdf",
            None,
        );
        assert_eq!(dest, PathBuf::from("/data/a.pdf"));
    }

    #[test]
    fn test_resolve_destination_falls_back_to_url_segment() {
        let dest = resolve_destination(
            Path::new("/data"),
            Some("books"),
            Some("   "),
            "https://example.com/files/My%20Book.epub",
            Some("epub"),
        );
        assert_eq!(dest, PathBuf::from("/data/books/My Book.epub"));
    }

    #[test]
    fn test_resolve_destination_timestamp_fallback() {
        let dest = resolve_destination(
            Path::new("/data"),
            None,
            None,
            "https://example.com/",
            Some("epub"),
        );
        let name = dest.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("download_"), "got {name}");
        assert!(
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"))
        );
    }

    #[test]
    fn test_resolve_destination_blocks_traversal() {
        let dest = resolve_destination(
            Path::new("/data"),
            Some("../../etc"),
            Some("../passwd"),
            "https://example.com/x",
            None,
        );
        assert!(dest.starts_with("/data"));
        assert!(!dest.components().any(|c| c.as_os_str() == ".."));
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        let part = partial_path(Path::new("/data/books/a.pdf"));
        assert_eq!(part, PathBuf::from("/data/books/a.pdf.part"));
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://example.com/a/B.PDF?x=1"),
            Some(".pdf".to_string())
        );
        assert_eq!(extension_from_url("https://example.com/a/"), None);
        assert_eq!(extension_from_url("https://example.com/noext"), None);
    }

    #[test]
    fn test_file_name_from_url_decodes() {
        assert_eq!(
            file_name_from_url("https://example.com/dir/Caf%C3%A9.txt"),
            Some("Café.txt".to_string())
        );
        assert_eq!(file_name_from_url("https://example.com/"), None);
    }

    #[test]
    fn test_sanitize_filename_component() {
        assert_eq!(sanitize_filename_component("Sci-Fi / Fantasy"), "Sci-Fi_Fantasy");
        assert_eq!(sanitize_filename_component(".."), "");
        assert_eq!(sanitize_filename_component("  "), "");
    }
}
