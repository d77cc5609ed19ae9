//! Registry record types.
//!
//! These are the wire shapes served by the v3 API. `Module` holds abbreviated
//! copies of its release data rather than pointers into the release map, so a
//! caller holding a snapshot never observes concurrent mutation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The user that owns a module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleOwner {
    pub uri: String,
    pub slug: String,
    pub username: String,
    pub gravatar_id: String,
}

/// The owning module, as embedded in a release record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseModule {
    pub uri: String,
    pub slug: String,
    pub name: String,
    pub owner: ModuleOwner,
    pub deprecated_at: Option<String>,
}

/// One immutable version of a module, backed by exactly one archive file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub uri: String,
    pub slug: String,
    pub module: ReleaseModule,
    pub version: String,
    /// The full decoded `metadata.json` record.
    pub metadata: Value,
    pub tags: Vec<String>,
    pub supported: bool,
    pub readme: String,
    pub license: String,
    pub file_size: u64,
    /// Fast, collision-prone digest of the archive bytes.
    pub file_md5: String,
    /// Cryptographic digest of the archive bytes, for client-side integrity
    /// verification.
    pub file_sha256: String,
    pub file_uri: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Abbreviated release reference carried inside a module record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseAbbreviated {
    pub uri: String,
    pub slug: String,
    pub version: String,
    pub supported: bool,
    pub created_at: String,
    pub deleted_at: Option<String>,
    pub file_uri: String,
    pub file_size: u64,
}

impl From<&Release> for ReleaseAbbreviated {
    fn from(release: &Release) -> Self {
        Self {
            uri: release.uri.clone(),
            slug: release.slug.clone(),
            version: release.version.clone(),
            supported: release.supported,
            created_at: release.created_at.clone(),
            deleted_at: release.deleted_at.clone(),
            file_uri: release.file_uri.clone(),
            file_size: release.file_size,
        }
    }
}

/// A named, versioned unit of distributable content with one owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Module {
    pub uri: String,
    pub slug: String,
    pub name: String,
    pub owner: ModuleOwner,
    pub created_at: String,
    pub updated_at: String,
    pub deprecated_at: Option<String>,
    pub deprecated_for: Option<String>,
    pub superseded_by: Option<String>,
    pub supported: bool,
    /// The highest-versioned non-deleted release; `None` only while the
    /// release list is empty.
    pub current_release: Option<Box<Release>>,
    pub releases: Vec<ReleaseAbbreviated>,
    pub downloads: u64,
}
