//! Browser signaling WebSocket handler
//!
//! One socket per browser tab. Outbound traffic merges two sources: events
//! addressed to this connection (answers, candidates, errors) and events
//! broadcast to every browser (incoming call, call ended).

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::browser::BrowserEvent;
use crate::state::AppState;

use super::processor::process_message;

/// SDP offers with many candidates stay well under this.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the receive loop checks for a stale connection
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Connections with no inbound traffic for this long are closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// `GET /ws`: upgrade to the browser signaling channel.
pub async fn ws_bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Browser WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_browser_socket(socket, state))
}

async fn handle_browser_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let hub = app_state.orchestrator.browsers().clone();
    let (channel, mut event_rx) = hub.open_channel();
    let mut broadcast_rx = hub.subscribe();
    let channel_id = channel.id();
    info!(%channel_id, "Browser connected");

    let (mut sender, mut receiver) = socket.split();

    let sender_task = tokio::spawn(async move {
        loop {
            let event = select! {
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                event = broadcast_rx.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%channel_id, skipped, "Browser fell behind on broadcast events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if let Err(e) = send_event(&mut sender, &event).await {
                error!(%channel_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let channel_ref = channel.downgrade();
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_message(msg, &channel_ref, &app_state).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%channel_id, error = %e, "Browser WebSocket error");
                        break;
                    }
                    None => {
                        info!(%channel_id, "Browser WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        %channel_id,
                        idle_secs = last_activity.elapsed().as_secs(),
                        "Browser WebSocket idle, closing stale connection"
                    );
                    break;
                }
                debug!(%channel_id, "Browser WebSocket idle check - still active");
            }
        }
    }

    // Sessions hold only a weak reference; this disconnects them.
    drop(channel);
    sender_task.abort();

    info!(%channel_id, "Browser disconnected");
}

async fn send_event<S>(sender: &mut S, event: &BrowserEvent) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            error!(error = %e, "Failed to serialize browser event");
            Ok(())
        }
    }
}
