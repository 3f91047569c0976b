//! Structural PDF check.
//!
//! Looks for the `%PDF-` header, an `%%EOF` marker near the end of the file
//! (truncated downloads lack it) and at least one page object. Page objects
//! packed into compressed object streams are found by inflating those streams.
//! Title and author are read from literal strings in the Info dictionary when
//! present.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use flate2::read::ZlibDecoder;
use regex::bytes::Regex;

use super::{ValidationOutcome, Validator};

pub(super) const FILE_TYPE: &str = "pdf";
pub(super) const EXTENSIONS: &[&str] = &[".pdf"];

/// How far from the end `%%EOF` may sit (trailing garbage after it is common).
const EOF_SEARCH_WINDOW: usize = 4096;

/// Cap on the inflated size of one object stream.
const MAX_INFLATED_STREAM: u64 = 16 * 1024 * 1024;

#[allow(clippy::expect_used)]
static PAGE_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/Type\s*/Page\b").expect("page object regex is valid")
});

#[allow(clippy::expect_used)]
static PAGE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/Type\s*/Pages\b[^>]*?/Count\s+(\d+)").expect("page count regex is valid")
});

#[allow(clippy::expect_used)]
static OBJECT_STREAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/ObjStm\b").expect("object stream regex is valid"));

#[allow(clippy::expect_used)]
static INFO_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(Title|Author)\s*\(((?:[^()\\]|\\.)*)\)").expect("info field regex is valid")
});

/// Validates PDF documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfValidator;

impl Validator for PdfValidator {
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
    let Some(rest) = bytes.strip_prefix(b"%PDF-") else {
        return ValidationOutcome::invalid(FILE_TYPE, "missing %PDF- header");
    };

    let tail_start = bytes.len().saturating_sub(EOF_SEARCH_WINDOW);
    if !contains(&bytes[tail_start..], b"%%EOF") {
        return ValidationOutcome::invalid(FILE_TYPE, "missing %%EOF marker (truncated file?)");
    }

    let mut metadata = BTreeMap::new();
    let version: String = rest
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| char::from(*b))
        .collect();
    if !version.is_empty() {
        metadata.insert("version".to_string(), version);
    }

    let mut pages = count_pages(bytes);
    if pages == 0 && OBJECT_STREAM.is_match(bytes) {
        let streams = object_streams(bytes);
        pages = streams.iter().map(|stream| count_pages(stream.as_slice())).sum();
        if !streams.is_empty() {
            metadata.insert("object_streams".to_string(), streams.len().to_string());
        }
    }
    if pages == 0 {
        return ValidationOutcome::invalid(FILE_TYPE, "no pages found");
    }
    metadata.insert("pages".to_string(), pages.to_string());

    for caps in INFO_FIELD.captures_iter(bytes) {
        let (Some(field), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let key = String::from_utf8_lossy(field.as_bytes()).to_lowercase();
        let value = String::from_utf8_lossy(value.as_bytes()).trim().to_string();
        if !value.is_empty() {
            metadata.entry(key).or_insert(value);
        }
    }

    ValidationOutcome::valid(FILE_TYPE, metadata)
}

/// Page objects, or the largest declared `/Count` if that is higher.
fn count_pages(bytes: &[u8]) -> usize {
    let page_objects = PAGE_OBJECT.find_iter(bytes).count();
    let declared_pages = PAGE_COUNT
        .captures_iter(bytes)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| std::str::from_utf8(m.as_bytes()).ok()?.parse::<usize>().ok())
        .max()
        .unwrap_or(0);
    page_objects.max(declared_pages)
}

/// Decoded bodies of every `/Type /ObjStm` stream that could be read.
///
/// Streams without `/FlateDecode` are taken as-is; streams that fail to
/// inflate (truncated, other filters) are skipped.
fn object_streams(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut streams = Vec::new();
    for found in OBJECT_STREAM.find_iter(bytes) {
        let dict_start = found.start();
        let Some(keyword) = find(&bytes[dict_start..], b"stream").map(|i| dict_start + i) else {
            continue;
        };
        let mut data_start = keyword + b"stream".len();
        if bytes.get(data_start) == Some(&b'\r') {
            data_start += 1;
        }
        if bytes.get(data_start) == Some(&b'\n') {
            data_start += 1;
        }
        let Some(data_end) = find(&bytes[data_start..], b"endstream").map(|i| data_start + i) else {
            continue;
        };
        let data = &bytes[data_start..data_end];
        if contains(&bytes[dict_start..keyword], b"/FlateDecode") {
            let mut inflated = Vec::new();
            if ZlibDecoder::new(data)
                .take(MAX_INFLATED_STREAM)
                .read_to_end(&mut inflated)
                .is_ok()
            {
                streams.push(inflated);
            }
        } else {
            streams.push(data.to_vec());
        }
    }
    streams
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
