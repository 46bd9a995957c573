use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::browser::BrowserHub;
use crate::core::call_control::{CallControl, WhatsAppCallClient};
use crate::core::orchestrator::BridgeOrchestrator;
use crate::core::peer::{PeerConnectionFactory, WebRtcEngine};
use crate::errors::app_error::AppError;

/// Shared state handed to every route.
pub struct AppState {
    pub config: ServerConfig,
    pub orchestrator: Arc<BridgeOrchestrator>,
}

impl AppState {
    /// Build the production state: a WebRTC engine for both legs and the
    /// WhatsApp calling client.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, AppError> {
        let engine = WebRtcEngine::new(config.bridge.ice_servers.clone())
            .map_err(|e| AppError::Internal(format!("WebRTC engine: {e}")))?;
        let call_control = WhatsAppCallClient::new(&config.whatsapp_config())
            .map_err(|e| AppError::Internal(format!("Call control client: {e}")))?;

        info!(
            endpoint = %call_control.endpoint(),
            ice_servers = config.bridge.ice_servers.len(),
            "Call bridge initialized"
        );

        Ok(Self::with_components(
            config,
            Arc::new(engine),
            Arc::new(call_control),
        ))
    }

    /// Build state around caller-supplied peer and provider components.
    pub fn with_components(
        config: ServerConfig,
        engine: Arc<dyn PeerConnectionFactory>,
        call_control: Arc<dyn CallControl>,
    ) -> Arc<Self> {
        let orchestrator = BridgeOrchestrator::new(
            engine,
            call_control,
            BrowserHub::new(),
            config.bridge_settings(),
        );
        Arc::new(Self {
            config,
            orchestrator,
        })
    }
}
