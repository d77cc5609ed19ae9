//! # Application State Management
//!
//! The shared state handed to every HTTP handler: the immutable
//! configuration, the registry backend behind its capability trait, and the
//! statistics collector. Constructed once in [`crate::server`] and shared via
//! `Arc` — there is no globally reachable backend instance.

use crate::config::Config;
use crate::middleware::stats::Statistics;
use crate::registry::Registry;
use serde::Serialize;
use std::sync::Arc;

/// Application state containing shared configuration and resources.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared across request handlers.
/// The registry serializes its own mutations internally.
#[derive(Clone)]
pub struct AppState {
    /// Immutable server configuration
    pub config: Arc<Config>,
    /// The registry backend
    pub registry: Arc<dyn Registry>,
    /// Request statistics collector
    pub statistics: Arc<Statistics>,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<dyn Registry>) -> Self {
        Self {
            config,
            registry,
            statistics: Arc::new(Statistics::new()),
        }
    }
}

/// Standardized success response for API consistency.
///
/// Serializes to: `{"message": "..."}`
#[derive(Serialize)]
pub struct SuccessResponse {
    /// Human-readable success message describing the completed operation
    pub message: String,
}
