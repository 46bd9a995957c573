use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_bridge_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Browser signaling WebSocket router
///
/// `GET /ws` upgrades to a JSON text-frame channel. Frames are objects tagged
/// by `type`:
///
/// ```json
/// // Browser sends
/// {"type": "browser-offer", "sdp": "v=0..."}
/// {"type": "terminate-call", "callId": "wacid..."}
///
/// // Server sends
/// {"type": "call-is-coming", "callId": "wacid...", "callerName": "Ada", "callerNumber": "1555..."}
/// {"type": "browser-answer", "sdp": "v=0..."}
/// ```
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_bridge_handler))
        .layer(TraceLayer::new_for_http())
}
