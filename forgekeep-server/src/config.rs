//! # Configuration Management
//!
//! One immutable [`Config`] value holds every tunable of the server: network
//! settings, the modules directory, response-cache behavior, upstream
//! fallback registries, and the periodic rescan interval. It is built once at
//! startup — JSON file first, then CLI overrides — and passed by `Arc` to the
//! components that need it. Nothing reads configuration through globals.
//!
//! ## Loading Configuration
//!
//! ```rust,no_run
//! # use forgekeep_server::config::Config;
//! // Load from file with fallback to defaults
//! let config = Config::load_or_default("forgekeep.json")?;
//!
//! // Use built-in defaults
//! let config = Config::default();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for the module registry server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Module archive storage
    #[serde(default)]
    pub storage: StorageConfig,
    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upstream fallback registries
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Periodic rescan of the modules directory
    #[serde(default)]
    pub scan: ScanConfig,
}

/// Server network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/IP address to bind to (e.g. "0.0.0.0" or "localhost")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Storage configuration for release archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the module tree
    pub modules_dir: PathBuf,
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether response caching is enabled at all
    pub enabled: bool,
    /// Directory holding cache bodies and header sidecars
    pub dir: PathBuf,
    /// Maximum age of a cached response before it is treated as stale
    pub max_age_secs: u64,
    /// Only request paths starting with one of these prefixes are cacheable
    pub prefixes: Vec<String>,
    /// Derive the cache key from the normalized bearer token instead of the
    /// query string
    pub key_by_token: bool,
}

/// Upstream fallback configuration.
///
/// When a request misses locally, it is forwarded to these registries in
/// priority order; the first reachable hit wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream base URLs in priority order; empty disables fallback
    pub urls: Vec<String>,
    /// HTTP request timeout for upstream calls
    pub timeout_secs: u64,
    /// Import successfully proxied release archives into the local registry
    pub import_releases: bool,
}

/// Background rescan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Rescan the modules directory every this many seconds; `None` scans
    /// only at startup
    pub interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("./modules"),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./cache"),
            max_age_secs: 300,
            prefixes: vec!["/v3/files".to_string(), "/v3/releases".to_string()],
            key_by_token: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout_secs: 30,
            import_releases: false,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// The cache max-age as a [`Duration`].
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_secs)
    }

    /// The upstream request timeout as a [`Duration`].
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }
}
