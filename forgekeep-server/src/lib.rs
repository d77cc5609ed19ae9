//! # Forgekeep Module Registry Server
//!
//! A self-hostable module registry compatible with the v3 module-distribution
//! protocol. It stores versioned module archives on the local filesystem,
//! serves metadata and files over HTTP, and can transparently fall back to
//! upstream registries when a requested artifact is not locally present,
//! optionally importing the fetched artifact for future local serving.
//!
//! ## Key Modules
//!
//! - [`config`]: Configuration management and settings
//! - [`state`]: Application state and shared resources
//! - [`error`]: Error handling and standardized responses
//! - [`registry`]: The module index and its filesystem backend
//! - [`archive`]: Release archive parsing
//! - [`middleware`]: Response cache, fallback proxy, and statistics layers
//! - [`api`]: HTTP API endpoints
//! - [`server`]: Router assembly and the server entry point
//!
//! ## Usage
//!
//! The main entry point is the `forgekeep serve` binary, but this library
//! exposes the registry backend, archive parsing, and hashing utilities for
//! independent use.

// Module declarations
pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod middleware;
pub mod registry;
pub mod server;
pub mod slug;
pub mod state;

// Re-export key types for convenience
pub use archive::{extract_release, ReleaseMetadata};
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use registry::{FilesystemRegistry, Module, Registry, Release};
pub use server::{build_router, run_server};
pub use state::{AppState, SuccessResponse};

// Utility functions that are used across multiple modules

/// Calculate the SHA-256 hash of data.
///
/// Returns the digest as a lowercase hexadecimal string. Clients use this
/// value to verify the integrity of downloaded release archives.
///
/// # Examples
///
/// ```
/// # use forgekeep_server::sha256_hex;
/// let hash = sha256_hex(b"hello world");
/// assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex characters
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Calculate the MD5 hash of data.
///
/// Returns the digest as a lowercase hexadecimal string. This is the fast,
/// collision-prone digest carried alongside the SHA-256 in release records
/// for legacy protocol clients.
///
/// # Examples
///
/// ```
/// # use forgekeep_server::md5_hex;
/// let hash = md5_hex(b"hello world");
/// assert_eq!(hash.len(), 32); // MD5 produces 32 hex characters
/// ```
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_md5_hex_known_vector() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
