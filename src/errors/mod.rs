pub mod app_error;
pub mod bridge_error;
