use std::env;

use super::ConfigError;

/// Values read from the process environment (after `.env` has been loaded).
#[derive(Debug, Default)]
pub(super) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub phone_number_id: Option<String>,
    pub access_token: Option<String>,
    pub verify_token: Option<String>,
    pub api_base: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let port = match var("PORT") {
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "PORT",
                reason: format!("'{raw}': {e}"),
            })?),
            None => None,
        };

        Ok(Self {
            host: var("HOST"),
            port,
            phone_number_id: var("PHONE_NUMBER_ID"),
            access_token: var("ACCESS_TOKEN"),
            verify_token: var("META_VERIFY_TOKEN"),
            api_base: var("WHATSAPP_API_BASE"),
        })
    }
}

/// Non-empty, trimmed environment variable.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
