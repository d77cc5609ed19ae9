//! Upstream fallback proxying.
//!
//! The proxy layer buffers the downstream response before the client sees
//! it. When the configured miss predicate matches (by default: 404), the
//! request is re-issued against an upstream registry and the upstream's
//! answer is relayed instead, marked with `X-Proxied-To`. If the upstream is
//! unreachable the originally captured response is replayed — a fallback
//! failure never leaves the client worse off than the original miss.
//!
//! Several upstreams are chained by stacking one layer per upstream, the
//! first-priority upstream innermost, so the first reachable hit wins.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, AppResult};
use crate::middleware::capture::CapturedResponse;

/// Header marking a response as relayed from an upstream registry.
pub const PROXIED_HEADER: &str = "x-proxied-to";

/// Callback invoked with `(path, status, body)` of every upstream response
/// that answered a miss, before the response is relayed to the client.
pub type ImportHook = Arc<dyn Fn(String, StatusCode, Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Predicate deciding whether a captured downstream status is a "miss".
pub type MissPredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// One upstream fallback layer.
pub struct FallbackProxy {
    upstream: Url,
    client: reqwest::Client,
    is_miss: MissPredicate,
    on_response: Option<ImportHook>,
}

impl FallbackProxy {
    /// Create a fallback layer for one upstream base URL.
    ///
    /// The HTTP client carries the configured timeout so a dead upstream
    /// cannot stall requests indefinitely.
    pub fn new(upstream: Url, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("forgekeep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            upstream,
            client,
            is_miss: Arc::new(|status| status == StatusCode::NOT_FOUND),
            on_response: None,
        })
    }

    /// Replace the default 404 miss predicate.
    pub fn with_miss_predicate(mut self, predicate: MissPredicate) -> Self {
        self.is_miss = predicate;
        self
    }

    /// Attach a callback observing upstream responses (e.g. to import a
    /// proxied release archive into the local registry).
    pub fn with_import_hook(mut self, hook: ImportHook) -> Self {
        self.on_response = Some(hook);
        self
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Re-issue the request against the upstream and buffer the answer.
    async fn forward(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> AppResult<CapturedResponse> {
        let mut target = format!(
            "{}{}",
            self.upstream.as_str().trim_end_matches('/'),
            path
        );
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }

        // The Host header belongs to this server, not the upstream.
        let mut forwarded_headers = headers.clone();
        forwarded_headers.remove(header::HOST);

        let response = self
            .client
            .request(method.clone(), &target)
            .headers(forwarded_headers)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("request to {} failed: {}", target, e)))?;

        let status = response.status();
        let mut response_headers = response.headers().clone();
        // The relayed body is re-framed by this server.
        response_headers.remove(header::CONTENT_LENGTH);
        response_headers.remove(header::TRANSFER_ENCODING);
        response_headers.remove(header::CONNECTION);

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Upstream(format!("failed to read upstream body: {}", e)))?;

        debug!(status = %status, upstream = %self.upstream, "Response of proxied request");

        Ok(CapturedResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

/// Middleware wrapping a handler with one upstream fallback.
pub async fn proxy_middleware(
    State(proxy): State<Arc<FallbackProxy>>,
    req: Request,
    next: Next,
) -> Response {
    // The request is consumed by the downstream call, so everything needed
    // for forwarding is kept aside first.
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());
    let headers = req.headers().clone();

    let response = next.run(req).await;
    let captured = match CapturedResponse::capture(response).await {
        Ok(captured) => captured,
        Err(e) => return e.into_response(),
    };

    if !(proxy.is_miss)(captured.status) {
        return captured.into_response();
    }

    info!(upstream = %proxy.upstream, path = %path, "Forwarding request to upstream");

    match proxy.forward(&method, &path, query.as_deref(), &headers).await {
        Ok(upstream_response) => {
            if let Some(hook) = &proxy.on_response {
                hook(
                    path.clone(),
                    upstream_response.status,
                    upstream_response.body.clone(),
                )
                .await;
            }

            // Previously set response headers are discarded; the client sees
            // the upstream's headers plus the proxied marker.
            let mut response = upstream_response.into_response();
            if let Ok(value) = proxy.upstream.as_str().parse() {
                response.headers_mut().insert(PROXIED_HEADER, value);
            }
            response
        }
        Err(e) => {
            // The fallback must never leave the client worse off than the
            // original miss response.
            warn!(upstream = %proxy.upstream, error = %e, "Upstream fallback failed, serving original response");
            captured.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use axum_test::TestServer;
    use std::sync::Mutex;

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// An address nothing listens on.
    async fn dead_upstream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn proxied_app(handler_router: Router, proxy: FallbackProxy) -> TestServer {
        let app = handler_router.layer(from_fn_with_state(Arc::new(proxy), proxy_middleware));
        TestServer::new(app).unwrap()
    }

    fn always_404() -> Router {
        Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::NOT_FOUND, "missing locally") }),
        )
    }

    #[tokio::test]
    async fn test_miss_is_forwarded_upstream() {
        let upstream_url = spawn_upstream(Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::OK, "ok") }),
        ))
        .await;

        let proxy = FallbackProxy::new(
            Url::parse(&upstream_url).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let server = proxied_app(always_404(), proxy);

        let response = server.get("/v3/files/acme-widget-1.0.0.tar.gz").await;
        response.assert_status_ok();
        response.assert_text("ok");
        assert_eq!(
            response.headers().get(PROXIED_HEADER).unwrap(),
            upstream_url.as_str()
        );
    }

    #[tokio::test]
    async fn test_hit_passes_through_untouched() {
        // Upstream would answer, but the local handler already has the file
        let upstream_url = spawn_upstream(Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::OK, "from upstream") }),
        ))
        .await;

        let local = Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::OK, "local data") }),
        );
        let proxy = FallbackProxy::new(
            Url::parse(&upstream_url).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let server = proxied_app(local, proxy);

        let response = server.get("/v3/files/acme-widget-1.0.0.tar.gz").await;
        response.assert_status_ok();
        response.assert_text("local data");
        assert!(response.headers().get(PROXIED_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_replays_original_response() {
        let proxy = FallbackProxy::new(
            Url::parse(&dead_upstream().await).unwrap(),
            Duration::from_millis(500),
        )
        .unwrap();
        let server = proxied_app(always_404(), proxy);

        let response = server.get("/v3/files/acme-widget-1.0.0.tar.gz").await;
        // The original 404, not a 5xx
        response.assert_status_not_found();
        response.assert_text("missing locally");
    }

    #[tokio::test]
    async fn test_import_hook_sees_upstream_body() {
        let upstream_url = spawn_upstream(Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::OK, "archive-bytes") }),
        ))
        .await;

        let seen: Arc<Mutex<Vec<(String, StatusCode, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_by_hook = seen.clone();
        let hook: ImportHook = Arc::new(move |path, status, body| {
            let seen = seen_by_hook.clone();
            Box::pin(async move {
                seen.lock().unwrap().push((path, status, body));
            })
        });

        let proxy = FallbackProxy::new(
            Url::parse(&upstream_url).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_import_hook(hook);
        let server = proxied_app(always_404(), proxy);

        server
            .get("/v3/files/acme-widget-1.0.0.tar.gz")
            .await
            .assert_status_ok();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/v3/files/acme-widget-1.0.0.tar.gz");
        assert_eq!(seen[0].1, StatusCode::OK);
        assert_eq!(&seen[0].2[..], b"archive-bytes");
    }

    #[tokio::test]
    async fn test_chained_upstreams_first_hit_wins() {
        // First-priority upstream misses too; second has the file
        let first = spawn_upstream(Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::NOT_FOUND, "not here either") }),
        ))
        .await;
        let second = spawn_upstream(Router::new().route(
            "/v3/files/{filename}",
            get(|| async { (StatusCode::OK, "second upstream") }),
        ))
        .await;

        let inner_proxy =
            FallbackProxy::new(Url::parse(&first).unwrap(), Duration::from_secs(5)).unwrap();
        let outer_proxy =
            FallbackProxy::new(Url::parse(&second).unwrap(), Duration::from_secs(5)).unwrap();

        // First-priority upstream is the innermost layer
        let app = always_404()
            .layer(from_fn_with_state(Arc::new(inner_proxy), proxy_middleware))
            .layer(from_fn_with_state(Arc::new(outer_proxy), proxy_middleware));
        let server = TestServer::new(app).unwrap();

        let response = server.get("/v3/files/acme-widget-1.0.0.tar.gz").await;
        response.assert_status_ok();
        response.assert_text("second upstream");
        assert_eq!(
            response.headers().get(PROXIED_HEADER).unwrap(),
            second.as_str()
        );
    }
}
