//! Browser WebSocket message processing

use std::sync::Arc;

use axum::extract::ws::Message;
use tracing::{debug, info, warn};

use crate::core::browser::{BrowserCommand, BrowserEvent, ChannelRef};
use crate::state::AppState;

/// Process one frame from the browser.
///
/// Returns `false` when the connection should close.
pub async fn process_message(msg: Message, channel: &ChannelRef, app_state: &Arc<AppState>) -> bool {
    match msg {
        Message::Text(text) => {
            debug!(channel_id = %channel.id(), bytes = text.len(), "Received browser message");

            match serde_json::from_str::<BrowserCommand>(&text) {
                Ok(command) => {
                    app_state
                        .orchestrator
                        .handle_browser_command(command, channel)
                        .await;
                }
                Err(e) => {
                    warn!(channel_id = %channel.id(), error = %e, "Failed to parse browser message");
                    channel
                        .emit(BrowserEvent::BridgeError {
                            code: "parse_error".to_string(),
                            message: format!("Invalid message format: {e}"),
                        })
                        .await;
                }
            }
            true
        }
        Message::Binary(data) => {
            debug!(bytes = data.len(), "Ignoring binary browser frame");
            true
        }
        // Pongs are sent by the socket layer itself.
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(channel_id = %channel.id(), "Browser WebSocket close received");
            false
        }
    }
}
