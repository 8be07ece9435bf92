//! API Routes
//!
//! - `/healthz` - Health check
//! - `/v1/files` - Upload (admin) and listing (admin)
//! - `/v1/files/latest/{tag}` - Redirect to the newest file with a tag
//! - `/v1/files/{id}` - Signed download, admin delete

pub mod files;
pub mod health;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;

use crate::models::AppState;

/// Headroom above the file size limit for multipart boundaries and the
/// `tag` field.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let body_limit = usize::try_from(
        state
            .config
            .files
            .max_size
            .saturating_add(MULTIPART_OVERHEAD),
    )
    .unwrap_or(usize::MAX);

    Router::new()
        .merge(files::router(state.clone()))
        .merge(health::router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
