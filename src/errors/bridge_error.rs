use std::time::Duration;
use thiserror::Error;

use crate::core::call_control::CallAction;
use crate::core::peer::BridgeSide;
use crate::core::session::CallState;

/// Failures of a bridging attempt or of a session operation.
///
/// None of these leave the orchestrator: each one becomes a state transition
/// plus, where a browser is attached, a `bridge-error` event.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: CallState, to: CallState },

    #[error("A call is already in progress (state: {0})")]
    CallInProgress(CallState),

    #[error("Call {0} was already closed")]
    CallClosed(String),

    #[error("Negotiation failed on {side} side: {reason}")]
    Negotiation { side: BridgeSide, reason: String },

    #[error("Answer creation failed on {side} side: {reason}")]
    AnswerCreation { side: BridgeSide, reason: String },

    #[error("No remote audio within {0:?}")]
    RemoteTrackTimeout(Duration),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("Provider request '{action}' failed: {reason}")]
    ProviderRequestFailure { action: CallAction, reason: String },

    #[error("Browser disconnected before the answer was delivered")]
    BrowserDisconnected,

    #[error("Call id is required")]
    MissingCallId,

    #[error("Bridging attempt cancelled")]
    Cancelled,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Stable code sent to the browser in `bridge-error` events.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidTransition { .. } => "invalid_transition",
            BridgeError::CallInProgress(_) => "call_in_progress",
            BridgeError::CallClosed(_) => "call_closed",
            BridgeError::Negotiation { .. } => "negotiation_failed",
            BridgeError::AnswerCreation { .. } => "answer_creation_failed",
            BridgeError::RemoteTrackTimeout(_) => "remote_track_timeout",
            BridgeError::InvalidCandidate(_) => "invalid_candidate",
            BridgeError::ProviderRequestFailure { .. } => "provider_request_failed",
            BridgeError::BrowserDisconnected => "browser_disconnected",
            BridgeError::MissingCallId => "missing_call_id",
            BridgeError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            BridgeError::CallInProgress(CallState::Negotiating).code(),
            "call_in_progress"
        );
        assert_eq!(
            BridgeError::RemoteTrackTimeout(Duration::from_secs(10)).code(),
            "remote_track_timeout"
        );
        assert_eq!(
            BridgeError::ProviderRequestFailure {
                action: CallAction::PreAccept,
                reason: "success=false".into(),
            }
            .code(),
            "provider_request_failed"
        );
        assert_eq!(
            BridgeError::BrowserDisconnected.code(),
            "browser_disconnected"
        );
    }

    #[test]
    fn test_messages() {
        let err = BridgeError::InvalidTransition {
            from: CallState::Idle,
            to: CallState::Active,
        };
        assert_eq!(err.to_string(), "Invalid state transition: Idle -> Active");

        let err = BridgeError::Negotiation {
            side: BridgeSide::Provider,
            reason: "bad sdp".into(),
        };
        assert_eq!(err.to_string(), "Negotiation failed on provider side: bad sdp");

        let err = BridgeError::ProviderRequestFailure {
            action: CallAction::PreAccept,
            reason: "HTTP 500".into(),
        };
        assert_eq!(err.to_string(), "Provider request 'pre_accept' failed: HTTP 500");
    }
}
