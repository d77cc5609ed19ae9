//! HTTP server setup and the serving pipeline.
//!
//! The pipeline wraps the v3 routes outermost to innermost: statistics →
//! response cache → fallback proxies (first-priority upstream innermost) →
//! handlers. Statistics sit outermost so recorded latency includes cache and
//! proxy overhead; the cache sits outside the proxies so proxied responses
//! are cacheable like local ones.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Url;

use crate::api;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::middleware::cache::{cache_middleware, ResponseCache};
use crate::middleware::proxy::{proxy_middleware, FallbackProxy, ImportHook};
use crate::middleware::stats::stats_middleware;
use crate::middleware::useragent;
use crate::registry::{FilesystemRegistry, Registry};
use crate::state::AppState;

/// Import hook fed to every fallback proxy layer: successfully proxied
/// archive downloads are ingested into the local registry so the next
/// request is served locally.
fn import_hook(registry: Arc<dyn Registry>) -> ImportHook {
    Arc::new(move |path: String, status: StatusCode, body: Bytes| {
        let registry = registry.clone();
        Box::pin(async move {
            if !status.is_success() || !path.starts_with("/v3/files/") {
                return;
            }
            match registry.add_release(&body).await {
                Ok(release) => info!(slug = %release.slug, "Imported proxied release"),
                Err(e) => {
                    // Import is best-effort; the client still gets the
                    // proxied response.
                    warn!(path = %path, error = %e, "Failed to import proxied release")
                }
            }
        })
    })
}

/// Assemble the full router for the given application state.
pub fn build_router(state: Arc<AppState>) -> AppResult<Router> {
    let mut v3 = Router::new()
        .route("/v3/modules", get(api::list_modules))
        .route(
            "/v3/modules/{slug}",
            get(api::get_module).delete(api::delete_module),
        )
        .route(
            "/v3/releases",
            get(api::list_releases).post(api::publish_release),
        )
        .route(
            "/v3/releases/{slug}",
            get(api::get_release).delete(api::delete_release),
        )
        .route("/v3/files/{filename}", get(api::download_file))
        .with_state(state.clone());

    // Fallback proxies, first-priority upstream innermost so the first
    // reachable hit wins.
    for upstream_url in &state.config.upstream.urls {
        let upstream = Url::parse(upstream_url).map_err(|e| {
            AppError::InternalError(format!("invalid upstream URL {}: {}", upstream_url, e))
        })?;
        let mut proxy = FallbackProxy::new(upstream, state.config.upstream_timeout())?;
        if state.config.upstream.import_releases {
            proxy = proxy.with_import_hook(import_hook(state.registry.clone()));
        }
        v3 = v3.layer(from_fn_with_state(Arc::new(proxy), proxy_middleware));
    }

    if state.config.cache.enabled {
        let cache = Arc::new(ResponseCache::from_config(&state.config.cache));
        v3 = v3.layer(from_fn_with_state(cache, cache_middleware));
    }

    // Protocol clients must identify themselves; checked before cache and
    // proxy work happens.
    v3 = v3.layer(axum::middleware::from_fn(useragent::require_user_agent));

    let ops = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/statistics", get(statistics_handler))
        .with_state(state.clone());

    Ok(v3
        .merge(ops)
        .layer(from_fn_with_state(
            state.statistics.clone(),
            stats_middleware,
        ))
        .layer(TraceLayer::new_for_http()))
}

/// Run the registry server until ctrl-c.
pub async fn run_server(config: Config) -> Result<()> {
    let config = Arc::new(config);

    // Inability to create the root directory is the only acceptable fatal
    // error class at startup.
    std::fs::create_dir_all(&config.storage.modules_dir).with_context(|| {
        format!(
            "failed to create modules directory {}",
            config.storage.modules_dir.display()
        )
    })?;
    if config.cache.enabled {
        std::fs::create_dir_all(&config.cache.dir).with_context(|| {
            format!(
                "failed to create cache directory {}",
                config.cache.dir.display()
            )
        })?;
    }

    let registry: Arc<dyn Registry> =
        Arc::new(FilesystemRegistry::new(&config.storage.modules_dir));
    registry
        .load_modules()
        .await
        .context("initial module scan failed")?;

    let state = Arc::new(AppState::new(config.clone(), registry.clone()));
    let app = build_router(state)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(interval_secs) = config.scan.interval_secs {
        tokio::spawn(rescan_task(
            registry,
            Duration::from_secs(interval_secs),
            shutdown_rx,
        ));
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid socket address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(addr = %addr, modules_dir = %config.storage.modules_dir.display(), "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    Ok(())
}

/// Wait for ctrl-c, then propagate shutdown to the background tasks. The
/// server finishes in-flight requests before returning.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal, stopping server gracefully");
    let _ = shutdown_tx.send(true);
}

/// Periodically rebuild the module index from the directory tree until the
/// shutdown signal fires.
async fn rescan_task(
    registry: Arc<dyn Registry>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The startup scan already ran; skip the interval's immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("Periodic module rescan");
                if let Err(e) = registry.load_modules().await {
                    warn!(error = %e, "Periodic rescan failed");
                }
            }
            _ = shutdown_rx.changed() => {
                info!("Rescan task stopped");
                return;
            }
        }
    }
}

async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "service": "forgekeep",
        "version": env!("CARGO_PKG_VERSION"),
        "api_versions": ["v3"],
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn statistics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.statistics.snapshot())
}
