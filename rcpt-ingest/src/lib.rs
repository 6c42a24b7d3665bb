//! rcpt-ingest library interface
//!
//! Exposes the lifecycle controller and router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::services::ReceiptLifecycle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ReceiptLifecycle>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(lifecycle: Arc<ReceiptLifecycle>) -> Self {
        Self {
            lifecycle,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// `max_body_bytes` bounds every request body, uploads included.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(api::upload_routes())
        .merge(api::file_routes())
        .merge(api::receipt_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
