//! Configuration module for the call bridge gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::call_control::WhatsAppConfig;
use crate::core::orchestrator::{AcceptRetryPolicy, BridgeSettings};

mod env;
mod merge;
mod validation;
mod yaml;

pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_PORT: u16 = 19000;
pub(crate) const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v18.0";
pub(crate) const DEFAULT_ICE_SERVER: &str = "stun:stun.relay.metered.ca:80";
pub(crate) const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
pub(crate) const DEFAULT_RATE_LIMIT_BURST: u32 = 10;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Bridge tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// STUN/TURN URLs handed to every peer connection
    pub ice_servers: Vec<String>,
    /// How long to wait for the provider's audio track
    pub remote_track_timeout_ms: u64,
    /// Grace delay between `pre_accept` and the first `accept`
    pub accept_delay_ms: u64,
    pub accept_max_attempts: u32,
    pub accept_backoff_multiplier: f64,
    pub accept_max_delay_ms: u64,
    /// Timeout for each provider HTTP request
    pub request_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            remote_track_timeout_ms: 10_000,
            accept_delay_ms: 1_000,
            accept_max_attempts: 3,
            accept_backoff_multiplier: 2.0,
            accept_max_delay_ms: 8_000,
            request_timeout_ms: 10_000,
        }
    }
}

/// Server configuration
///
/// Contains everything the gateway needs:
/// - Server settings (host, port, TLS, static UI directory)
/// - Calling provider credentials and webhook verify token
/// - Bridge tuning
/// - Security settings (CORS, rate limiting)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Browser UI served from this directory when set
    pub public_dir: Option<PathBuf>,

    // Calling provider
    pub whatsapp_api_base: String,
    pub phone_number_id: String,
    pub access_token: String,
    /// Token the provider echoes during webhook verification
    pub verify_token: Option<String>,

    pub bridge: BridgeConfig,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,
}

/// Zeroize secrets when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.access_token.zeroize();
        if let Some(ref mut token) = self.verify_token {
            token.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and `.env`) only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed, an
    /// environment variable has an invalid format, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        // Note: .env file is loaded in main.rs at application startup
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string ("host:port")
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            remote_track_timeout: Duration::from_millis(self.bridge.remote_track_timeout_ms),
            accept_retry: AcceptRetryPolicy {
                initial_delay: Duration::from_millis(self.bridge.accept_delay_ms),
                multiplier: self.bridge.accept_backoff_multiplier,
                max_delay: Duration::from_millis(self.bridge.accept_max_delay_ms),
                max_attempts: self.bridge.accept_max_attempts,
            },
        }
    }

    pub fn whatsapp_config(&self) -> WhatsAppConfig {
        WhatsAppConfig {
            api_base: self.whatsapp_api_base.clone(),
            phone_number_id: self.phone_number_id.clone(),
            access_token: self.access_token.clone(),
            request_timeout: Duration::from_millis(self.bridge.request_timeout_ms),
        }
    }
}
