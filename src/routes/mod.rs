pub mod api;
pub mod webhook;
pub mod ws;
