use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api::health_check;
use crate::state::AppState;
use std::sync::Arc;

/// Public routes: health check only
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .layer(TraceLayer::new_for_http())
}
