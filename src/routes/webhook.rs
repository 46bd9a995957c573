use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::webhook::{receive_call_event, verify_webhook};
use crate::state::AppState;
use std::sync::Arc;

/// Provider webhook router
///
/// # Endpoints
///
/// - `GET /call-events` - subscription handshake (`hub.mode`, `hub.verify_token`, `hub.challenge`)
/// - `POST /call-events` - call event delivery
///
/// No auth layer: the handshake token gates the subscription itself.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/call-events", get(verify_webhook).post(receive_call_event))
        .layer(TraceLayer::new_for_http())
}
