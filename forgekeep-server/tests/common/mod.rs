//! Shared helpers for integration tests.

use flate2::write::GzEncoder;
use flate2::Compression;
use forgekeep_server::{AppState, Config, FilesystemRegistry, Registry};
use std::sync::Arc;
use tempfile::TempDir;

/// Test fixture holding the application state and its backing directories.
/// The temp dir must stay alive for the duration of the test.
pub struct TestSetup {
    pub state: Arc<AppState>,
    pub temp_dir: TempDir,
}

/// Create application state over fresh temporary directories with the
/// response cache enabled.
pub fn create_test_setup() -> TestSetup {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let mut config = Config::default();
    config.storage.modules_dir = temp_dir.path().join("modules");
    config.cache.enabled = true;
    config.cache.dir = temp_dir.path().join("cache");

    std::fs::create_dir_all(&config.storage.modules_dir).unwrap();
    std::fs::create_dir_all(&config.cache.dir).unwrap();

    let registry: Arc<dyn Registry> =
        Arc::new(FilesystemRegistry::new(&config.storage.modules_dir));
    let state = Arc::new(AppState::new(Arc::new(config), registry));

    TestSetup { state, temp_dir }
}

/// Build an in-memory `.tar.gz` release archive for `name`/`version`.
pub fn release_archive(name: &str, version: &str) -> Vec<u8> {
    let metadata = serde_json::json!({
        "name": name,
        "version": version,
        "author": "acme",
        "license": "Apache-2.0",
        "summary": "An integration test module",
        "dependencies": [],
        "tags": ["testing"]
    })
    .to_string();

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in [
        (
            format!("{}-{}/metadata.json", name, version),
            metadata.as_bytes(),
        ),
        (
            format!("{}-{}/README.md", name, version),
            b"# Integration Test Module\n".as_slice(),
        ),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
