//! Filesystem-backed registry.
//!
//! The directory tree is the source of truth: every release lives at
//! `<modules_dir>/<module-slug>/<release-slug>.tar.gz`, and the in-memory
//! maps are a rebuildable index over it. Mutating operations hold the write
//! side of both locks across their filesystem work so the index and the disk
//! never diverge under concurrent mutation; a full rescan builds fresh maps
//! and swaps them in so readers never see a partial index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use semver::Version;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::archive::{self, ReleaseMetadata, ARCHIVE_SUFFIX};
use crate::error::{AppError, AppResult};
use crate::registry::types::{Module, ModuleOwner, Release, ReleaseAbbreviated, ReleaseModule};
use crate::registry::Registry;
use crate::slug;
use crate::{md5_hex, sha256_hex};

/// Version floor used when a module has no releases to compare.
const DEFAULT_VERSION: &str = "0.0.0";

/// Registry backend over a local directory tree of release archives.
pub struct FilesystemRegistry {
    modules_dir: PathBuf,
    // Lock order: modules before releases, always.
    modules: RwLock<HashMap<String, Module>>,
    releases: RwLock<HashMap<String, Vec<Release>>>,
}

impl FilesystemRegistry {
    pub fn new<P: Into<PathBuf>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            modules: RwLock::new(HashMap::new()),
            releases: RwLock::new(HashMap::new()),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Absolute path of a release archive inside the module's directory.
    pub fn archive_path(&self, module_slug: &str, release_slug: &str) -> PathBuf {
        self.modules_dir
            .join(module_slug)
            .join(format!("{}{}", release_slug, ARCHIVE_SUFFIX))
    }

    /// Build a full release record from parsed archive contents.
    fn build_release(metadata: &ReleaseMetadata, readme: String, data: &[u8]) -> Release {
        let release_slug = slug::release_slug(&metadata.name, &metadata.version);
        let now = Utc::now().to_rfc3339();
        let owner = ModuleOwner {
            uri: format!("/v3/users/{}", metadata.author),
            slug: metadata.author.clone(),
            username: metadata.author.clone(),
            gravatar_id: String::new(),
        };

        Release {
            uri: format!("/v3/releases/{}", release_slug),
            slug: release_slug.clone(),
            module: ReleaseModule {
                uri: format!("/v3/modules/{}", metadata.name),
                slug: metadata.name.clone(),
                name: slug::module_name(&metadata.name).to_string(),
                owner,
                deprecated_at: None,
            },
            version: metadata.version.clone(),
            metadata: serde_json::to_value(metadata).unwrap_or_default(),
            tags: metadata.tags.clone(),
            supported: false,
            readme,
            license: metadata.license.clone(),
            file_size: data.len() as u64,
            file_md5: md5_hex(data),
            file_sha256: sha256_hex(data),
            file_uri: format!("/v3/files/{}{}", release_slug, ARCHIVE_SUFFIX),
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Create the module record seeded from its first release.
    fn module_from_release(release: &Release) -> Module {
        let now = Utc::now().to_rfc3339();
        Module {
            uri: format!("/v3/modules/{}", release.module.slug),
            slug: release.module.slug.clone(),
            name: release.module.name.clone(),
            owner: release.module.owner.clone(),
            created_at: now.clone(),
            updated_at: now,
            deprecated_at: None,
            deprecated_for: None,
            superseded_by: None,
            supported: release.supported,
            current_release: Some(Box::new(release.clone())),
            releases: vec![ReleaseAbbreviated::from(release)],
            downloads: 0,
        }
    }

    /// Insert a release into a pair of index maps, keeping the owning
    /// module's release list and current-release pointer consistent.
    fn apply_release(
        modules: &mut HashMap<String, Module>,
        releases: &mut HashMap<String, Vec<Release>>,
        release: Release,
    ) {
        let module_slug = release.module.slug.clone();
        match modules.get_mut(&module_slug) {
            None => {
                modules.insert(module_slug.clone(), Self::module_from_release(&release));
            }
            Some(module) => {
                module.releases.push(ReleaseAbbreviated::from(&release));
                if find_latest_version(&module.releases) == release.version {
                    module.current_release = Some(Box::new(release.clone()));
                }
                module.updated_at = Utc::now().to_rfc3339();
            }
        }
        releases.entry(module_slug).or_default().push(release);
    }

    /// Parse and validate one archive into a release record.
    fn ingest_archive(data: &[u8]) -> AppResult<Release> {
        let (metadata, readme) = archive::extract_release(data)?;

        // The slug doubles as a path component below the modules dir.
        if metadata.name.contains('/') || metadata.name.contains('\\') || metadata.name.contains("..")
        {
            return Err(AppError::BadRequest(format!(
                "module name contains path separators: {}",
                metadata.name
            )));
        }

        let release_slug = slug::release_slug(&metadata.name, &metadata.version);
        if !slug::is_valid_release_slug(&release_slug) {
            return Err(AppError::BadRequest(format!(
                "invalid release slug: {}",
                release_slug
            )));
        }

        Ok(Self::build_release(&metadata, readme, data))
    }
}

#[async_trait]
impl Registry for FilesystemRegistry {
    async fn load_modules(&self) -> AppResult<()> {
        let mut new_modules: HashMap<String, Module> = HashMap::new();
        let mut new_releases: HashMap<String, Vec<Release>> = HashMap::new();

        let mut archive_paths = Vec::new();
        for entry in walkdir::WalkDir::new(&self.modules_dir) {
            // A walk error means the tree itself is unreadable; abort.
            let entry = entry.map_err(|e| {
                AppError::InternalError(format!(
                    "failed to scan {}: {}",
                    self.modules_dir.display(),
                    e
                ))
            })?;
            if entry.file_type().is_file() && archive::is_archive_path(entry.path()) {
                archive_paths.push(entry.into_path());
            }
        }

        let mut loaded = 0usize;
        for path in archive_paths {
            debug!(path = %path.display(), "Reading release archive");
            let data = tokio::fs::read(&path).await?;

            let release = match Self::ingest_archive(&data) {
                Ok(release) => release,
                Err(e) => {
                    // One bad file must not block startup.
                    warn!(path = %path.display(), error = %e, "Skipping unreadable release archive");
                    continue;
                }
            };

            let already_indexed = new_releases
                .get(&release.module.slug)
                .is_some_and(|list| list.iter().any(|r| r.slug == release.slug));
            if already_indexed {
                warn!(slug = %release.slug, path = %path.display(), "Duplicate release slug in scan, keeping first");
                continue;
            }

            Self::apply_release(&mut new_modules, &mut new_releases, release);
            loaded += 1;
        }

        // Swap the fresh index in under both write locks so readers never
        // observe a half-built view.
        let mut modules = self.modules.write().await;
        let mut releases = self.releases.write().await;
        *modules = new_modules;
        *releases = new_releases;

        info!(
            modules = modules.len(),
            releases = loaded,
            dir = %self.modules_dir.display(),
            "Module index rebuilt"
        );
        Ok(())
    }

    async fn get_all_modules(&self) -> AppResult<Vec<Module>> {
        let modules = self.modules.read().await;
        Ok(modules.values().cloned().collect())
    }

    async fn get_module_by_slug(&self, slug: &str) -> AppResult<Module> {
        let modules = self.modules.read().await;
        modules
            .get(slug)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("module not found: {}", slug)))
    }

    async fn get_all_releases(&self) -> AppResult<Vec<Release>> {
        let releases = self.releases.read().await;
        Ok(releases.values().flatten().cloned().collect())
    }

    async fn get_release_by_slug(&self, slug: &str) -> AppResult<Release> {
        let releases = self.releases.read().await;
        releases
            .values()
            .flatten()
            .find(|release| release.slug == slug)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("release not found: {}", slug)))
    }

    async fn add_release(&self, data: &[u8]) -> AppResult<Release> {
        let mut modules = self.modules.write().await;
        let mut releases = self.releases.write().await;

        let release = Self::ingest_archive(data)?;
        let module_slug = release.module.slug.clone();
        let release_slug = release.slug.clone();

        // Idempotent ingestion: a known slug returns the existing record.
        if let Some(existing) = releases
            .get(&module_slug)
            .and_then(|list| list.iter().find(|r| r.slug == release_slug))
        {
            debug!(slug = %release_slug, "Release already indexed");
            return Ok(existing.clone());
        }

        Self::apply_release(&mut modules, &mut releases, release.clone());

        let module_dir = self.modules_dir.join(&module_slug);
        tokio::fs::create_dir_all(&module_dir).await?;

        let archive_file = self.archive_path(&module_slug, &release_slug);
        if !archive_file.exists() {
            // Archive bytes are immutable once present.
            tokio::fs::write(&archive_file, data).await?;
            info!(
                slug = %release_slug,
                path = %archive_file.display(),
                size = data.len(),
                "Release archive stored"
            );
        }

        Ok(release)
    }

    async fn delete_module_by_slug(&self, slug: &str) -> AppResult<()> {
        let mut modules = self.modules.write().await;
        let mut releases = self.releases.write().await;

        if !modules.contains_key(slug) {
            return Err(AppError::NotFound(format!("module not found: {}", slug)));
        }

        // Remove the directory tree first: if that fails the index stays
        // unchanged.
        let module_dir = self.modules_dir.join(slug);
        if module_dir.exists() {
            tokio::fs::remove_dir_all(&module_dir).await?;
        }

        modules.remove(slug);
        releases.remove(slug);
        info!(slug = %slug, "Module deleted");

        Ok(())
    }

    async fn delete_release_by_slug(&self, slug: &str) -> AppResult<()> {
        let mut modules = self.modules.write().await;
        let mut releases = self.releases.write().await;

        let module_slug = releases
            .iter()
            .find(|(_, list)| list.iter().any(|r| r.slug == slug))
            .map(|(module_slug, _)| module_slug.clone())
            .ok_or_else(|| AppError::NotFound(format!("release not found: {}", slug)))?;

        let archive_file = self.archive_path(&module_slug, slug);
        if archive_file.exists() {
            tokio::fs::remove_file(&archive_file).await?;
        }

        let now_empty = {
            let module_releases = releases.entry(module_slug.clone()).or_default();
            module_releases.retain(|r| r.slug != slug);
            module_releases.is_empty()
        };

        if now_empty {
            // A module is only observable through its releases.
            releases.remove(&module_slug);
            modules.remove(&module_slug);
            info!(slug = %slug, module = %module_slug, "Last release deleted, module removed");
            return Ok(());
        }

        if let Some(module) = modules.get_mut(&module_slug) {
            module.releases.retain(|r| r.slug != slug);
            module.updated_at = Utc::now().to_rfc3339();

            let was_current = module
                .current_release
                .as_ref()
                .is_some_and(|current| current.slug == slug);
            if was_current {
                let latest = find_latest_version(&module.releases);
                module.current_release = releases
                    .get(&module_slug)
                    .and_then(|list| list.iter().find(|r| r.version == latest))
                    .map(|r| Box::new(r.clone()));
            }
        }

        info!(slug = %slug, module = %module_slug, "Release deleted");
        Ok(())
    }
}

/// Compare version strings and return the most recent one.
///
/// Malformed versions are skipped with a warning so one bad sibling cannot
/// corrupt latest-resolution for the others. Pre-releases sort below the
/// plain release of the same numeric version (semver precedence).
fn find_latest_version(releases: &[ReleaseAbbreviated]) -> String {
    if releases.is_empty() {
        return DEFAULT_VERSION.to_string();
    }

    let mut latest = releases[0].version.clone();
    for release in &releases[1..] {
        let candidate = match Version::parse(&release.version) {
            Ok(version) => version,
            Err(_) => {
                warn!(version = %release.version, "invalid version");
                continue;
            }
        };
        let current = match Version::parse(&latest) {
            Ok(version) => version,
            Err(_) => {
                warn!(version = %latest, "invalid version");
                latest = release.version.clone();
                continue;
            }
        };
        if candidate > current {
            latest = release.version.clone();
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_archive::release_archive;
    use tempfile::TempDir;

    fn abbreviated(version: &str) -> ReleaseAbbreviated {
        ReleaseAbbreviated {
            uri: format!("/v3/releases/acme-widget-{}", version),
            slug: format!("acme-widget-{}", version),
            version: version.to_string(),
            supported: false,
            created_at: Utc::now().to_rfc3339(),
            deleted_at: None,
            file_uri: format!("/v3/files/acme-widget-{}.tar.gz", version),
            file_size: 0,
        }
    }

    fn test_registry() -> (FilesystemRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let registry = FilesystemRegistry::new(temp_dir.path());
        (registry, temp_dir)
    }

    #[test]
    fn test_find_latest_version() {
        assert_eq!(find_latest_version(&[]), "0.0.0");
        assert_eq!(
            find_latest_version(&[abbreviated("1.0.0"), abbreviated("2.3.1")]),
            "2.3.1"
        );
        assert_eq!(
            find_latest_version(&[
                abbreviated("2.3.1"),
                abbreviated("1.0.0"),
                abbreviated("0.9.0")
            ]),
            "2.3.1"
        );
    }

    #[test]
    fn test_prerelease_does_not_outrank_plain_release() {
        assert_eq!(
            find_latest_version(&[
                abbreviated("1.0.0"),
                abbreviated("2.3.1-beta"),
                abbreviated("2.3.1")
            ]),
            "2.3.1"
        );
        assert_eq!(
            find_latest_version(&[abbreviated("2.3.1"), abbreviated("2.3.1-beta")]),
            "2.3.1"
        );
    }

    #[test]
    fn test_malformed_version_skipped() {
        assert_eq!(
            find_latest_version(&[
                abbreviated("1.0.0"),
                abbreviated("not-a-version"),
                abbreviated("1.5.0")
            ]),
            "1.5.0"
        );
    }

    #[tokio::test]
    async fn test_add_release_round_trip() {
        let (registry, _tmp) = test_registry();
        let data = release_archive("acme-widget", "1.2.0");

        let release = registry.add_release(&data).await.unwrap();
        assert_eq!(release.slug, "acme-widget-1.2.0");
        assert_eq!(release.version, "1.2.0");
        assert_eq!(release.license, "Apache-2.0");
        assert_eq!(release.file_size, data.len() as u64);
        assert_eq!(release.file_md5.len(), 32);
        assert_eq!(release.file_sha256.len(), 64);
        assert_eq!(release.file_uri, "/v3/files/acme-widget-1.2.0.tar.gz");

        let fetched = registry
            .get_release_by_slug("acme-widget-1.2.0")
            .await
            .unwrap();
        assert_eq!(fetched, release);

        let module = registry.get_module_by_slug("acme-widget").await.unwrap();
        assert_eq!(module.name, "widget");
        assert_eq!(module.owner.slug, "acme");
        assert_eq!(module.releases.len(), 1);
        assert_eq!(
            module.current_release.as_ref().unwrap().slug,
            "acme-widget-1.2.0"
        );
    }

    #[tokio::test]
    async fn test_add_release_is_idempotent() {
        let (registry, tmp) = test_registry();
        let data = release_archive("acme-widget", "1.0.0");

        let first = registry.add_release(&data).await.unwrap();
        let second = registry.add_release(&data).await.unwrap();
        assert_eq!(first, second);

        let module = registry.get_module_by_slug("acme-widget").await.unwrap();
        assert_eq!(module.releases.len(), 1);

        // Exactly one archive on disk
        let files: Vec<_> = std::fs::read_dir(tmp.path().join("acme-widget"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_current_release_tracks_highest_version() {
        let (registry, _tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();
        registry
            .add_release(&release_archive("acme-widget", "2.3.1-beta"))
            .await
            .unwrap();
        registry
            .add_release(&release_archive("acme-widget", "2.3.1"))
            .await
            .unwrap();

        let module = registry.get_module_by_slug("acme-widget").await.unwrap();
        assert_eq!(module.releases.len(), 3);
        assert_eq!(
            module.current_release.as_ref().unwrap().version,
            "2.3.1"
        );
    }

    #[tokio::test]
    async fn test_archive_file_written_to_module_dir() {
        let (registry, tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();

        let path = tmp.path().join("acme-widget/acme-widget-1.0.0.tar.gz");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_get_missing_module_and_release() {
        let (registry, _tmp) = test_registry();
        assert!(matches!(
            registry.get_module_by_slug("acme-ghost").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            registry.get_release_by_slug("acme-ghost-1.0.0").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_release_promotes_remaining() {
        let (registry, tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();
        registry
            .add_release(&release_archive("acme-widget", "2.0.0"))
            .await
            .unwrap();

        registry
            .delete_release_by_slug("acme-widget-2.0.0")
            .await
            .unwrap();

        let module = registry.get_module_by_slug("acme-widget").await.unwrap();
        assert_eq!(module.releases.len(), 1);
        assert_eq!(
            module.current_release.as_ref().unwrap().version,
            "1.0.0"
        );
        assert!(!tmp
            .path()
            .join("acme-widget/acme-widget-2.0.0.tar.gz")
            .exists());
        assert!(tmp
            .path()
            .join("acme-widget/acme-widget-1.0.0.tar.gz")
            .exists());
    }

    #[tokio::test]
    async fn test_delete_last_release_removes_module() {
        let (registry, _tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();

        registry
            .delete_release_by_slug("acme-widget-1.0.0")
            .await
            .unwrap();

        assert!(matches!(
            registry.get_module_by_slug("acme-widget").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_module_removes_directory_and_index() {
        let (registry, tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();
        registry
            .add_release(&release_archive("acme-widget", "2.0.0"))
            .await
            .unwrap();

        registry.delete_module_by_slug("acme-widget").await.unwrap();

        assert!(!tmp.path().join("acme-widget").exists());
        assert!(matches!(
            registry.get_module_by_slug("acme-widget").await,
            Err(AppError::NotFound(_))
        ));
        assert!(registry.get_all_releases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_module_not_found() {
        let (registry, _tmp) = test_registry();
        assert!(matches!(
            registry.delete_module_by_slug("acme-ghost").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_modules_rebuilds_index() {
        let (registry, tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();
        registry
            .add_release(&release_archive("acme-gadget", "0.3.0"))
            .await
            .unwrap();

        // A fresh registry over the same tree sees both modules.
        let reloaded = FilesystemRegistry::new(tmp.path());
        reloaded.load_modules().await.unwrap();

        let mut slugs: Vec<_> = reloaded
            .get_all_modules()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.slug)
            .collect();
        slugs.sort();
        assert_eq!(slugs, vec!["acme-gadget", "acme-widget"]);
    }

    #[tokio::test]
    async fn test_load_modules_skips_corrupt_archive() {
        let (registry, tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();
        std::fs::write(
            tmp.path().join("acme-widget/acme-widget-9.9.9.tar.gz"),
            b"not really gzip",
        )
        .unwrap();

        let reloaded = FilesystemRegistry::new(tmp.path());
        reloaded.load_modules().await.unwrap();

        let releases = reloaded.get_all_releases().await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].slug, "acme-widget-1.0.0");
    }

    #[tokio::test]
    async fn test_load_modules_replaces_previous_index() {
        let (registry, tmp) = test_registry();
        registry
            .add_release(&release_archive("acme-widget", "1.0.0"))
            .await
            .unwrap();

        // Remove the file behind the registry's back, then rescan.
        std::fs::remove_dir_all(tmp.path().join("acme-widget")).unwrap();
        registry.load_modules().await.unwrap();

        assert!(registry.get_all_modules().await.unwrap().is_empty());
    }
}
