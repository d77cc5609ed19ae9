//! Per-endpoint usage statistics.
//!
//! One mutex guards all counters. The middleware increments the connection
//! counters before calling through and records elapsed time plus
//! cache/proxy markers after; the active-connection count is released by a
//! drop guard so it stays correct even if the downstream stack unwinds.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::middleware::proxy::PROXIED_HEADER;

/// Header the cache layer sets on responses replayed from cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

#[derive(Default)]
struct StatsInner {
    active_connections: u64,
    total_connections: u64,
    proxied_connections: u64,
    cache_hits: u64,
    total_response_time: Duration,
    connections_per_endpoint: HashMap<String, u64>,
    proxied_per_endpoint: HashMap<String, u64>,
    response_time_per_endpoint: HashMap<String, Duration>,
}

/// Request statistics, shared across all handlers.
#[derive(Default)]
pub struct Statistics {
    inner: Mutex<StatsInner>,
}

/// A serializable point-in-time view of the collected statistics.
#[derive(Serialize)]
pub struct StatisticsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub proxied_connections: u64,
    pub cache_hits: u64,
    pub total_response_time_ms: u128,
    pub connections_per_endpoint: HashMap<String, u64>,
    pub proxied_per_endpoint: HashMap<String, u64>,
    pub response_time_per_endpoint_ms: HashMap<String, u128>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(self: Arc<Self>, endpoint: &str) -> ActiveGuard {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.active_connections += 1;
            inner.total_connections += 1;
            *inner
                .connections_per_endpoint
                .entry(endpoint.to_string())
                .or_default() += 1;
        }
        ActiveGuard { stats: self }
    }

    fn finish(&self, endpoint: &str, elapsed: Duration, proxied: bool, cache_hit: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total_response_time += elapsed;
        *inner
            .response_time_per_endpoint
            .entry(endpoint.to_string())
            .or_default() += elapsed;
        if proxied {
            inner.proxied_connections += 1;
            *inner
                .proxied_per_endpoint
                .entry(endpoint.to_string())
                .or_default() += 1;
        }
        if cache_hit {
            inner.cache_hits += 1;
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        StatisticsSnapshot {
            active_connections: inner.active_connections,
            total_connections: inner.total_connections,
            proxied_connections: inner.proxied_connections,
            cache_hits: inner.cache_hits,
            total_response_time_ms: inner.total_response_time.as_millis(),
            connections_per_endpoint: inner.connections_per_endpoint.clone(),
            proxied_per_endpoint: inner.proxied_per_endpoint.clone(),
            response_time_per_endpoint_ms: inner
                .response_time_per_endpoint
                .iter()
                .map(|(k, v)| (k.clone(), v.as_millis()))
                .collect(),
        }
    }
}

/// Releases the active-connection slot when the request completes or the
/// stack unwinds.
struct ActiveGuard {
    stats: Arc<Statistics>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut inner = self.stats.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active_connections = inner.active_connections.saturating_sub(1);
    }
}

/// Middleware recording connection counts and client-observed latency.
///
/// Placed outermost in the serving pipeline so the recorded time includes
/// cache and proxy overhead.
pub async fn stats_middleware(
    State(stats): State<Arc<Statistics>>,
    req: Request,
    next: Next,
) -> Response {
    let endpoint = req.uri().path().to_string();
    let start = Instant::now();
    let _active = stats.clone().begin(&endpoint);

    let response = next.run(req).await;

    let proxied = response.headers().contains_key(PROXIED_HEADER);
    let cache_hit = response
        .headers()
        .get(CACHE_STATUS_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("hit"));
    stats.finish(&endpoint, start.elapsed(), proxied, cache_hit);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use axum_test::TestServer;

    fn test_app(stats: Arc<Statistics>) -> TestServer {
        let app = Router::new()
            .route("/v3/modules", get(|| async { "[]" }))
            .route(
                "/v3/files/x.tar.gz",
                get(|| async { ([(PROXIED_HEADER, "https://upstream")], "data") }),
            )
            .layer(axum::middleware::from_fn_with_state(
                stats,
                stats_middleware,
            ));
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_counts_and_timings_recorded() {
        let stats = Arc::new(Statistics::new());
        let server = test_app(stats.clone());

        server.get("/v3/modules").await.assert_status_ok();
        server.get("/v3/modules").await.assert_status_ok();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.connections_per_endpoint["/v3/modules"], 2);
        assert!(snapshot
            .response_time_per_endpoint_ms
            .contains_key("/v3/modules"));
    }

    #[tokio::test]
    async fn test_proxied_responses_counted() {
        let stats = Arc::new(Statistics::new());
        let server = test_app(stats.clone());

        server.get("/v3/files/x.tar.gz").await.assert_status_ok();
        server.get("/v3/modules").await.assert_status_ok();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.proxied_connections, 1);
        assert_eq!(snapshot.proxied_per_endpoint["/v3/files/x.tar.gz"], 1);
        assert!(!snapshot.proxied_per_endpoint.contains_key("/v3/modules"));
    }
}
