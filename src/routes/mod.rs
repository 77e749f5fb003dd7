use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

pub mod analysis;
pub mod datasets;

// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn routes(max_upload_size: usize) -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_check))
        .merge(datasets::routes())
        .merge(analysis::routes())
        .layer(DefaultBodyLimit::max(max_upload_size.saturating_add(MULTIPART_OVERHEAD)))
        .layer(cors)
}

async fn health_check() -> &'static str {
    "OK"
}
