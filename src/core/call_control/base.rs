use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider call actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    PreAccept,
    Accept,
    Reject,
    Terminate,
}

impl CallAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallAction::PreAccept => "pre_accept",
            CallAction::Accept => "accept",
            CallAction::Reject => "reject",
            CallAction::Terminate => "terminate",
        }
    }

    /// Whether the request carries the answer SDP.
    pub fn carries_session(&self) -> bool {
        matches!(self, CallAction::PreAccept | CallAction::Accept)
    }
}

impl fmt::Display for CallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a provider request did not succeed.
#[derive(Debug, Error)]
pub enum CallControlError {
    #[error("Call id is required")]
    MissingCallId,

    #[error("Answer SDP is required for {0}")]
    MissingSdp(CallAction),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Provider reported failure: {0}")]
    NotSuccessful(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Outcome of one provider request. Never raised; callers inspect it.
#[derive(Debug)]
pub struct ActionOutcome {
    pub action: CallAction,
    pub call_id: String,
    pub error: Option<CallControlError>,
}

impl ActionOutcome {
    pub fn succeeded(action: CallAction, call_id: impl Into<String>) -> Self {
        Self {
            action,
            call_id: call_id.into(),
            error: None,
        }
    }

    pub fn failed(action: CallAction, call_id: impl Into<String>, error: CallControlError) -> Self {
        Self {
            action,
            call_id: call_id.into(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn reason(&self) -> String {
        self.error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

/// Remote call control for the calling provider.
///
/// Implementors provide [`CallControl::send_action`]; the per-action methods
/// are conveniences over it. No retries happen at this layer.
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn send_action(&self, call_id: &str, action: CallAction, sdp: Option<&str>)
    -> ActionOutcome;

    async fn pre_accept(&self, call_id: &str, sdp: &str) -> ActionOutcome {
        self.send_action(call_id, CallAction::PreAccept, Some(sdp))
            .await
    }

    async fn accept(&self, call_id: &str, sdp: &str) -> ActionOutcome {
        self.send_action(call_id, CallAction::Accept, Some(sdp)).await
    }

    async fn reject(&self, call_id: &str) -> ActionOutcome {
        self.send_action(call_id, CallAction::Reject, None).await
    }

    async fn terminate(&self, call_id: &str) -> ActionOutcome {
        self.send_action(call_id, CallAction::Terminate, None).await
    }
}
