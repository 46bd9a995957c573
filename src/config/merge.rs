use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{
    BridgeConfig, ConfigError, DEFAULT_API_BASE, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_RPS, ServerConfig, TlsConfig,
};

/// Build the final configuration: YAML over environment over defaults.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let whatsapp = yaml.whatsapp.unwrap_or_default();
    let bridge = yaml.bridge.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls = match server.tls {
        Some(tls) if tls.enabled.unwrap_or(false) => {
            let (Some(cert_path), Some(key_path)) = (tls.cert_path, tls.key_path) else {
                return Err(ConfigError::Invalid(
                    "TLS is enabled but cert_path or key_path is missing".to_string(),
                ));
            };
            Some(TlsConfig {
                cert_path: PathBuf::from(cert_path),
                key_path: PathBuf::from(key_path),
            })
        }
        _ => None,
    };

    let defaults = BridgeConfig::default();

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,
        public_dir: server.public_dir.map(PathBuf::from),

        whatsapp_api_base: whatsapp
            .api_base
            .or(env.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        phone_number_id: whatsapp
            .phone_number_id
            .or(env.phone_number_id)
            .unwrap_or_default(),
        access_token: whatsapp.access_token.or(env.access_token).unwrap_or_default(),
        verify_token: whatsapp.verify_token.or(env.verify_token),

        bridge: BridgeConfig {
            ice_servers: bridge.ice_servers.unwrap_or(defaults.ice_servers),
            remote_track_timeout_ms: bridge
                .remote_track_timeout_ms
                .unwrap_or(defaults.remote_track_timeout_ms),
            accept_delay_ms: bridge.accept_delay_ms.unwrap_or(defaults.accept_delay_ms),
            accept_max_attempts: bridge
                .accept_max_attempts
                .unwrap_or(defaults.accept_max_attempts),
            accept_backoff_multiplier: bridge
                .accept_backoff_multiplier
                .unwrap_or(defaults.accept_backoff_multiplier),
            accept_max_delay_ms: bridge
                .accept_max_delay_ms
                .unwrap_or(defaults.accept_max_delay_ms),
            request_timeout_ms: bridge
                .request_timeout_ms
                .unwrap_or(defaults.request_timeout_ms),
        },

        cors_allowed_origins: security.cors_allowed_origins,
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
    })
}
