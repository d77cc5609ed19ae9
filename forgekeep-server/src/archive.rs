//! Release archive ingestion.
//!
//! A release archive is a gzip-compressed tarball that carries the module
//! payload plus two well-known entries: `metadata.json` (the structured
//! release record) and, usually, `README.md`. Ingestion streams the archive
//! once, picks out those two entries by basename, and leaves everything else
//! untouched. Digest computation over the raw bytes is the caller's job; the
//! input buffer is consumed exactly once here.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tar::Archive;

use crate::error::{AppError, AppResult};
use crate::slug;

pub const METADATA_FILE: &str = "metadata.json";
pub const README_FILE: &str = "README.md";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// A supported operating system entry from release metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupportedOs {
    #[serde(rename = "operatingsystem")]
    pub name: String,
    #[serde(
        rename = "operatingsystemrelease",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub releases: Vec<String>,
}

/// A module this release depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleDependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_requirement: Option<String>,
}

/// A runtime requirement of this release (same shape as a dependency).
pub type ModuleRequirement = ModuleDependency;

/// The structured record decoded from `metadata.json`.
///
/// `name`, `version`, `author`, and `license` are required; a payload missing
/// any of them fails to decode and the archive is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub license: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ModuleDependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<ModuleRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues_url: Option<String>,
    #[serde(
        rename = "operatingsystem_support",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub operatingsystem_support: Vec<SupportedOs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Extract release metadata and README text from a gzipped tar archive.
///
/// Walks the archive entries once. Only regular files whose basename is
/// `metadata.json` or `README.md` are read; all other entries are skipped
/// without extraction. Pure transform: no filesystem side effects.
///
/// # Errors
///
/// * `AppError::BadRequest` if the payload is empty, is not a gzipped tar,
///   contains no parseable `metadata.json`, or the decoded module name fails
///   slug validation.
pub fn extract_release(data: &[u8]) -> AppResult<(ReleaseMetadata, String)> {
    if data.is_empty() {
        return Err(AppError::BadRequest("empty archive payload".to_string()));
    }

    let gz = GzDecoder::new(data);
    let mut archive = Archive::new(gz);

    let mut metadata: Option<ReleaseMetadata> = None;
    let mut readme = String::new();

    let entries = archive
        .entries()
        .map_err(|e| AppError::BadRequest(format!("failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| AppError::BadRequest(format!("corrupt archive entry: {}", e)))?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let basename = match entry.path() {
            Ok(path) => match path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                Some(name) => name,
                None => continue,
            },
            Err(_) => continue,
        };

        match basename.as_str() {
            METADATA_FILE => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                let parsed: ReleaseMetadata = serde_json::from_slice(&buf).map_err(|e| {
                    AppError::BadRequest(format!("invalid {}: {}", METADATA_FILE, e))
                })?;
                if !slug::is_valid_module_slug(&parsed.name) {
                    return Err(AppError::BadRequest(format!(
                        "invalid module name: {}",
                        parsed.name
                    )));
                }
                metadata = Some(parsed);
            }
            README_FILE => {
                entry.read_to_string(&mut readme)?;
            }
            _ => continue,
        }
    }

    match metadata {
        Some(metadata) => Ok((metadata, readme)),
        None => Err(AppError::BadRequest(format!(
            "archive does not contain a {}",
            METADATA_FILE
        ))),
    }
}

/// Whether a directory entry looks like a release archive.
pub fn is_archive_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(ARCHIVE_SUFFIX))
}

#[cfg(test)]
pub(crate) mod test_archive {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// Build an in-memory `.tar.gz` with the given entries.
    pub fn build_targz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for &(name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// A minimal valid metadata.json body.
    pub fn metadata_json(name: &str, version: &str) -> Vec<u8> {
        serde_json::json!({
            "name": name,
            "version": version,
            "author": "acme",
            "license": "Apache-2.0",
            "summary": "A test module",
            "dependencies": [],
            "tags": ["testing"]
        })
        .to_string()
        .into_bytes()
    }

    /// A complete release archive for `name`/`version` with a README.
    pub fn release_archive(name: &str, version: &str) -> Vec<u8> {
        let metadata_path = format!("{}-{}/metadata.json", name, version);
        let readme_path = format!("{}-{}/README.md", name, version);
        let metadata = metadata_json(name, version);
        build_targz(&[
            (metadata_path.as_str(), metadata.as_slice()),
            (readme_path.as_str(), b"# Test Module\n".as_slice()),
        ])
    }
}
