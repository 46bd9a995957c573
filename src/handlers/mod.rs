//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `webhook` - Provider call event webhook and subscription handshake
//! - `ws` - Browser signaling WebSocket

pub mod api;
pub mod webhook;
pub mod ws;

pub use webhook::{receive_call_event, verify_webhook};
pub use ws::ws_bridge_handler;
