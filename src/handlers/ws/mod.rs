//! Browser signaling WebSocket (`/ws`)

pub mod handler;
pub mod processor;

pub use handler::ws_bridge_handler;
