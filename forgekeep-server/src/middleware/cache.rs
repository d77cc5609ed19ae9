//! TTL-bounded response caching.
//!
//! Successful responses on configured path prefixes are persisted as two
//! files per cache key: the raw body and a small JSON sidecar with the
//! content headers to replay on a hit. The key is a SHA-256 over the request
//! fingerprint — method, path, and either the query string or the normalized
//! bearer token, depending on configuration.
//!
//! Entries older than the configured max-age are deleted on access and the
//! request falls through. Concurrent requests for the same key are coalesced
//! into a single downstream invocation: the backend work behind a miss (file
//! reads, proxy calls) must not be multiplied by a cache stampede.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};

use crate::config::CacheConfig;
use crate::error::AppResult;
use crate::middleware::capture::CapturedResponse;
use crate::middleware::stats::CACHE_STATUS_HEADER;

/// Content headers preserved across a cache round trip.
#[derive(Serialize, Deserialize, Default)]
pub struct ContentHeaders {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub disposition: String,
}

/// File-backed response cache with TTL expiry and request coalescing.
pub struct ResponseCache {
    dir: PathBuf,
    max_age: Duration,
    prefixes: Vec<String>,
    key_by_token: bool,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseCache {
    pub fn new(
        dir: PathBuf,
        max_age: Duration,
        prefixes: Vec<String>,
        key_by_token: bool,
    ) -> Self {
        Self {
            dir,
            max_age,
            prefixes,
            key_by_token,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.dir.clone(),
            Duration::from_secs(config.max_age_secs),
            config.prefixes.clone(),
            config.key_by_token,
        )
    }

    /// Whether a request path is eligible for caching at all.
    fn is_cacheable_path(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Derive the cache key from the request fingerprint.
    fn cache_key(&self, method: &Method, path: &str, query: Option<&str>, token: &str) -> String {
        let raw = if self.key_by_token {
            format!("{} {} {}", method, path, token.to_lowercase())
        } else {
            format!("{} {}?{}", method, path, query.unwrap_or(""))
        };
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn headers_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_headers", key))
    }

    /// Join the in-flight group for a key, waiting for an identical request
    /// already running. The returned guard keeps the group alive until this
    /// request completes.
    async fn begin_flight(self: Arc<Self>, key: &str) -> Flight {
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        Flight {
            cache: self,
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Look up a fresh cache entry, deleting it first if it has outlived the
    /// max-age.
    async fn lookup(&self, key: &str) -> Option<Response> {
        let body_path = self.body_path(key);
        let metadata = tokio::fs::metadata(&body_path).await.ok()?;
        let modified = metadata.modified().ok()?;

        let expired = SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.max_age)
            .unwrap_or(false);
        if expired {
            debug!(path = %body_path.display(), "Cached file expired");
            if let Err(e) = tokio::fs::remove_file(&body_path).await {
                error!(error = %e, "Failed to remove expired cache entry");
            }
            let _ = tokio::fs::remove_file(self.headers_path(key)).await;
            return None;
        }

        let body = tokio::fs::read(&body_path).await.ok()?;
        let content_headers = match tokio::fs::read(self.headers_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => ContentHeaders::default(),
        };

        let mut response = Response::new(Body::from(body));
        let headers = response.headers_mut();
        if !content_headers.content_type.is_empty() {
            if let Ok(value) = content_headers.content_type.parse() {
                headers.insert(header::CONTENT_TYPE, value);
            }
        }
        if !content_headers.encoding.is_empty() {
            if let Ok(value) = content_headers.encoding.parse() {
                headers.insert(header::CONTENT_ENCODING, value);
            }
        }
        if !content_headers.disposition.is_empty() {
            if let Ok(value) = content_headers.disposition.parse() {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
        }
        if let Ok(value) = "hit".parse() {
            headers.insert(CACHE_STATUS_HEADER, value);
        }
        Some(response)
    }

    /// Persist a captured response. The body and sidecar are written to
    /// temporary paths and renamed into place so a concurrent hit never
    /// reads a partial file.
    async fn store(&self, key: &str, captured: &CapturedResponse) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let body_path = self.body_path(key);
        let body_tmp = self.dir.join(format!("{}.tmp", key));
        tokio::fs::write(&body_tmp, &captured.body).await?;
        tokio::fs::rename(&body_tmp, &body_path).await?;

        let content_headers = ContentHeaders {
            content_type: captured.header("content-type").unwrap_or("").to_string(),
            encoding: captured.header("content-encoding").unwrap_or("").to_string(),
            disposition: captured
                .header("content-disposition")
                .unwrap_or("")
                .to_string(),
        };
        let headers_tmp = self.dir.join(format!("{}_headers.tmp", key));
        tokio::fs::write(&headers_tmp, serde_json::to_vec(&content_headers)?).await?;
        tokio::fs::rename(&headers_tmp, self.headers_path(key)).await?;

        debug!(key = %key, size = captured.body.len(), "Cache entry stored");
        Ok(())
    }
}

/// Membership in an in-flight request group; leaving the group removes the
/// key's coalescing lock once the last member is gone.
struct Flight {
    cache: Arc<ResponseCache>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for Flight {
    fn drop(&mut self) {
        let mut inflight = self
            .cache
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inflight.get(&self.key) {
            // One reference in the map, one inside our still-held guard.
            if Arc::strong_count(entry) <= 2 {
                inflight.remove(&self.key);
            }
        }
    }
}

/// Middleware replaying cached responses and persisting cacheable misses.
pub async fn cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET || !cache.is_cacheable_path(req.uri().path()) {
        return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());
    let cache_control = req
        .headers()
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string();

    let key = cache.cache_key(req.method(), &path, query.as_deref(), &token);

    // Single-flight: identical concurrent requests share one downstream call.
    let _flight = cache.clone().begin_flight(&key).await;

    if !cache_control.contains("no-cache") {
        if let Some(response) = cache.lookup(&key).await {
            debug!(path = %path, "Serving response from cache");
            return response;
        }
    }

    let response = next.run(req).await;
    let captured = match CapturedResponse::capture(response).await {
        Ok(captured) => captured,
        Err(e) => return e.into_response(),
    };

    if captured.status == StatusCode::OK && !cache_control.contains("no-store") {
        if let Err(e) = cache.store(&key, &captured).await {
            warn!(key = %key, error = %e, "Failed to persist cache entry");
        }
    }

    captured.into_response()
}
