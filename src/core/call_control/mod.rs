pub mod base;
pub mod messages;
pub mod whatsapp;

pub use base::{ActionOutcome, CallAction, CallControl, CallControlError};
pub use whatsapp::{WhatsAppCallClient, WhatsAppConfig};
