//! Provider webhook (`/call-events`)

pub mod handler;
pub mod messages;

pub use handler::{receive_call_event, verify_webhook};
