use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

use super::messages::WebhookPayload;

/// Subscription handshake parameters.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// `GET /call-events`: echo the challenge when the verify token matches.
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> AppResult<String> {
    let Some(expected) = state.config.verify_token.as_deref() else {
        warn!("Webhook verification requested but no verify token is configured");
        return Err(AppError::Forbidden);
    };

    let token_matches = params
        .verify_token
        .as_deref()
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    if params.mode.as_deref() == Some("subscribe") && token_matches {
        info!("Webhook verified");
        Ok(params.challenge.unwrap_or_default())
    } else {
        warn!(mode = ?params.mode, "Webhook verification rejected");
        Err(AppError::Forbidden)
    }
}

/// `POST /call-events`: hand the call event to the orchestrator.
///
/// Malformed payloads are acknowledged so the provider does not redeliver them.
pub async fn receive_call_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<StatusCode> {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Unparseable call event");
            return Ok(StatusCode::OK);
        }
    };

    let event = match payload.into_call_event() {
        Ok(event) => event,
        Err(reason) => {
            warn!(%reason, "Invalid or incomplete call event");
            return Ok(StatusCode::OK);
        }
    };

    state.orchestrator.handle_call_event(event).await?;
    Ok(StatusCode::OK)
}
