use super::{ConfigError, ServerConfig};

/// Validate the merged configuration.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_provider_credentials(config)?;
    validate_bridge(config)?;
    validate_tls(config)?;
    validate_rate_limit(config)?;
    Ok(())
}

fn validate_provider_credentials(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.phone_number_id.is_empty() {
        return Err(ConfigError::Missing("PHONE_NUMBER_ID"));
    }
    if config.access_token.is_empty() {
        return Err(ConfigError::Missing("ACCESS_TOKEN"));
    }
    if url::Url::parse(&config.whatsapp_api_base).is_err() {
        return Err(ConfigError::InvalidValue {
            key: "WHATSAPP_API_BASE",
            reason: format!("'{}' is not a valid URL", config.whatsapp_api_base),
        });
    }
    Ok(())
}

fn validate_bridge(config: &ServerConfig) -> Result<(), ConfigError> {
    let bridge = &config.bridge;

    for (key, value) in [
        ("bridge.remote_track_timeout_ms", bridge.remote_track_timeout_ms),
        ("bridge.request_timeout_ms", bridge.request_timeout_ms),
        ("bridge.accept_max_delay_ms", bridge.accept_max_delay_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                key,
                reason: "must be greater than 0".to_string(),
            });
        }
    }
    if bridge.accept_max_attempts == 0 {
        return Err(ConfigError::InvalidValue {
            key: "bridge.accept_max_attempts",
            reason: "must be at least 1".to_string(),
        });
    }
    if !(bridge.accept_backoff_multiplier >= 1.0) {
        return Err(ConfigError::InvalidValue {
            key: "bridge.accept_backoff_multiplier",
            reason: "must be at least 1.0".to_string(),
        });
    }
    if let Some(server) = bridge
        .ice_servers
        .iter()
        .find(|s| !(s.starts_with("stun:") || s.starts_with("turn:") || s.starts_with("turns:")))
    {
        return Err(ConfigError::InvalidValue {
            key: "bridge.ice_servers",
            reason: format!("'{server}' is not a stun:/turn: URL"),
        });
    }
    Ok(())
}

fn validate_tls(config: &ServerConfig) -> Result<(), ConfigError> {
    let Some(tls) = &config.tls else {
        return Ok(());
    };
    for path in [&tls.cert_path, &tls.key_path] {
        if !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "TLS file not found: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn validate_rate_limit(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.rate_limit_requests_per_second == 0 || config.rate_limit_burst_size == 0 {
        return Err(ConfigError::Invalid(
            "rate limit values must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
