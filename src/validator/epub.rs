//! EPUB container check.
//!
//! An EPUB is a ZIP archive whose `META-INF/container.xml` points at the OPF
//! package document. Both must be present and readable; Dublin Core title,
//! creator and language are pulled from the OPF when available.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use zip::ZipArchive;

use super::{ValidationOutcome, Validator};

pub(super) const FILE_TYPE: &str = "epub";
pub(super) const EXTENSIONS: &[&str] = &[".epub"];

const CONTAINER_PATH: &str = "META-INF/container.xml";

#[allow(clippy::expect_used)]
static ROOTFILE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"full-path\s*=\s*"([^"]+)""#).expect("rootfile regex is valid"));

#[allow(clippy::expect_used)]
static DC_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<dc:(title|creator|language)\b[^>]*>(.*?)</dc:(?:title|creator|language)>")
        .expect("dublin core regex is valid")
});

/// Validates EPUB archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubValidator;

impl Validator for EpubValidator {
    fn file_type(&self) -> &'static str {
        FILE_TYPE
    }

    fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn validate(&self, path: &Path) -> ValidationOutcome {
        match inspect(path) {
            Ok(metadata) => ValidationOutcome::valid(FILE_TYPE, metadata),
            Err(reason) => ValidationOutcome::invalid(FILE_TYPE, reason),
        }
    }
}

fn inspect(path: &Path) -> Result<BTreeMap<String, String>, String> {
    let file = File::open(path).map_err(|e| format!("cannot read file: {e}"))?;
    let mut archive = ZipArchive::new(file).map_err(|e| format!("not a zip archive: {e}"))?;
    if archive.is_empty() {
        return Err("archive is empty".to_string());
    }

    let container = read_entry(&mut archive, CONTAINER_PATH)
        .map_err(|e| format!("missing {CONTAINER_PATH}: {e}"))?;
    let opf_path = ROOTFILE_PATH
        .captures(&container)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| "container.xml does not name a package document".to_string())?;
    let opf = read_entry(&mut archive, &opf_path)
        .map_err(|e| format!("missing package document {opf_path}: {e}"))?;

    let mut metadata = BTreeMap::new();
    metadata.insert("items".to_string(), archive.len().to_string());
    for caps in DC_FIELD.captures_iter(&opf) {
        let (Some(field), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();
        if value.is_empty() {
            continue;
        }
        let key = match field.as_str() {
            "creator" => "author",
            other => other,
        };
        metadata
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    Ok(metadata)
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String, String> {
    let mut entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut contents = String::new();
    entry
        .read_to_string(&mut contents)
        .map_err(|e| e.to_string())?;
    Ok(contents)
}
