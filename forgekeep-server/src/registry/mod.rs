//! The registry backend: an in-memory index of modules and releases built
//! from a directory tree of release archives.
//!
//! [`Registry`] is the capability interface the request-handling pipeline is
//! written against; [`FilesystemRegistry`] is the storage engine that backs
//! it with a local directory tree. Alternative engines can be substituted
//! without touching the HTTP layer.

mod filesystem;
mod types;

pub use filesystem::FilesystemRegistry;
pub use types::{Module, ModuleOwner, Release, ReleaseAbbreviated, ReleaseModule};

use crate::error::AppResult;
use async_trait::async_trait;

/// Registry trait for abstracting module storage operations.
///
/// All mutating operations are serialized with respect to each other by the
/// implementation; read operations return snapshots that stay valid after
/// concurrent mutation.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Rebuild the index from the backing store. Readers never observe a
    /// partially-rebuilt index.
    async fn load_modules(&self) -> AppResult<()>;

    /// Snapshot of every module.
    async fn get_all_modules(&self) -> AppResult<Vec<Module>>;

    /// Look up one module by slug.
    async fn get_module_by_slug(&self, slug: &str) -> AppResult<Module>;

    /// Snapshot of every release across all modules.
    async fn get_all_releases(&self) -> AppResult<Vec<Release>>;

    /// Look up one release by slug.
    async fn get_release_by_slug(&self, slug: &str) -> AppResult<Release>;

    /// Ingest a release archive. Idempotent per release slug: adding a slug
    /// that already exists returns the existing record unchanged and never
    /// rewrites the stored archive.
    async fn add_release(&self, data: &[u8]) -> AppResult<Release>;

    /// Delete a module, its releases, and their files.
    async fn delete_module_by_slug(&self, slug: &str) -> AppResult<()>;

    /// Delete one release and its file, re-resolving the owning module's
    /// current release.
    async fn delete_release_by_slug(&self, slug: &str) -> AppResult<()>;
}
