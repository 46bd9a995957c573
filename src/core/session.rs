//! The single in-flight call.
//!
//! `CallSession` is a plain state container. It performs no I/O: bridges it
//! releases are handed back to the caller to close.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::browser::ChannelRef;
use crate::core::peer::{BridgeSide, PeerBridge};
use crate::errors::bridge_error::{BridgeError, BridgeResult};

/// Closed call ids remembered across resets.
const CLOSED_CALL_HISTORY: usize = 64;

/// Lifecycle of the bridged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallState {
    Idle,
    AwaitingPeerOffers,
    Negotiating,
    PreAccepting,
    Accepting,
    Active,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// Whether new offers may still be recorded.
    pub fn accepts_offers(self) -> bool {
        matches!(self, CallState::Idle | CallState::AwaitingPeerOffers)
    }

    /// Edges reachable through [`CallSession::transition`].
    ///
    /// `Ended`/`Failed` back to `Idle` is only reachable through `reset()`.
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;

        match (self, next) {
            (Idle, AwaitingPeerOffers) => true,
            (Idle | AwaitingPeerOffers, Negotiating) => true,
            (Negotiating, PreAccepting) => true,
            (PreAccepting, Accepting) => true,
            (Accepting, Active) => true,
            (from, Ended | Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a bridging attempt needs, taken out of the session when
/// negotiation starts. Taking the offers is what clears them.
#[derive(Debug, Clone)]
pub struct NegotiationAttempt {
    pub call_id: String,
    pub browser_offer_sdp: String,
    pub provider_offer_sdp: String,
    pub channel: ChannelRef,
    pub cancel: CancellationToken,
}

/// Read-only view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: CallState,
    pub call_id: Option<String>,
    pub has_browser_offer: bool,
    pub has_provider_offer: bool,
    pub has_browser_bridge: bool,
    pub has_provider_bridge: bool,
    pub has_browser_channel: bool,
}

#[derive(Debug)]
pub struct CallSession {
    call_id: Option<String>,
    state: CallState,
    browser_offer_sdp: Option<String>,
    provider_offer_sdp: Option<String>,
    browser_bridge: Option<Arc<PeerBridge>>,
    provider_bridge: Option<Arc<PeerBridge>>,
    browser_channel: Option<ChannelRef>,
    attempt: Option<CancellationToken>,
    closed_call_ids: VecDeque<String>,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            call_id: None,
            state: CallState::Idle,
            browser_offer_sdp: None,
            provider_offer_sdp: None,
            browser_bridge: None,
            provider_bridge: None,
            browser_channel: None,
            attempt: None,
            closed_call_ids: VecDeque::new(),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn browser_channel(&self) -> Option<&ChannelRef> {
        self.browser_channel.as_ref()
    }

    pub fn bridge(&self, side: BridgeSide) -> Option<Arc<PeerBridge>> {
        match side {
            BridgeSide::Browser => self.browser_bridge.clone(),
            BridgeSide::Provider => self.provider_bridge.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            call_id: self.call_id.clone(),
            has_browser_offer: self.browser_offer_sdp.is_some(),
            has_provider_offer: self.provider_offer_sdp.is_some(),
            has_browser_bridge: self.browser_bridge.is_some(),
            has_provider_bridge: self.provider_bridge.is_some(),
            has_browser_channel: self.browser_channel.is_some(),
        }
    }

    pub fn is_closed_call(&self, call_id: &str) -> bool {
        self.closed_call_ids.iter().any(|id| id == call_id)
    }

    /// Store the browser's offer and the channel it came from.
    ///
    /// A newer offer supersedes a pending one. Once negotiation has started
    /// the offer is refused.
    pub fn record_browser_offer(&mut self, sdp: String, channel: ChannelRef) -> BridgeResult<()> {
        if !self.state.accepts_offers() {
            return Err(BridgeError::CallInProgress(self.state));
        }
        if self.browser_offer_sdp.is_some() {
            debug!("Superseding pending browser offer");
        }

        self.browser_offer_sdp = Some(sdp);
        self.browser_channel = Some(channel);
        self.enter_awaiting()
    }

    /// Store the provider's offer for `call_id`.
    pub fn record_provider_offer(&mut self, call_id: &str, sdp: String) -> BridgeResult<()> {
        if call_id.is_empty() {
            return Err(BridgeError::MissingCallId);
        }
        if self.is_closed_call(call_id) {
            return Err(BridgeError::CallClosed(call_id.to_string()));
        }
        if !self.state.accepts_offers() {
            return Err(BridgeError::CallInProgress(self.state));
        }
        if let Some(previous) = self.call_id.as_deref() {
            if previous != call_id {
                debug!(previous, call_id, "Superseding pending provider offer");
            }
        }

        self.call_id = Some(call_id.to_string());
        self.provider_offer_sdp = Some(sdp);
        self.enter_awaiting()
    }

    fn enter_awaiting(&mut self) -> BridgeResult<()> {
        if self.state == CallState::Idle {
            self.transition(CallState::AwaitingPeerOffers)?;
        }
        Ok(())
    }

    /// Both offers are stored and the browser that sent its offer is still
    /// connected.
    pub fn ready_to_negotiate(&self) -> bool {
        self.state.accepts_offers()
            && self.call_id.is_some()
            && self.browser_offer_sdp.is_some()
            && self.provider_offer_sdp.is_some()
            && self
                .browser_channel
                .as_ref()
                .is_some_and(ChannelRef::is_connected)
    }

    /// Enter `Negotiating`, taking both offers out of the session.
    ///
    /// Returns `None` when the session is not ready.
    pub fn begin_negotiation(&mut self) -> BridgeResult<Option<NegotiationAttempt>> {
        if !self.ready_to_negotiate() {
            return Ok(None);
        }
        self.transition(CallState::Negotiating)?;

        let (Some(call_id), Some(browser_offer_sdp), Some(provider_offer_sdp), Some(channel)) = (
            self.call_id.clone(),
            self.browser_offer_sdp.take(),
            self.provider_offer_sdp.take(),
            self.browser_channel.clone(),
        ) else {
            return Ok(None);
        };

        let cancel = CancellationToken::new();
        self.attempt = Some(cancel.clone());

        Ok(Some(NegotiationAttempt {
            call_id,
            browser_offer_sdp,
            provider_offer_sdp,
            channel,
            cancel,
        }))
    }

    /// Whether `attempt` is still the session's current attempt.
    pub fn owns(&self, attempt: &NegotiationAttempt) -> bool {
        !attempt.cancel.is_cancelled()
            && self.call_id.as_deref() == Some(attempt.call_id.as_str())
            && self.attempt.is_some()
    }

    /// Register a bridge created by `attempt`.
    pub fn attach_bridge(
        &mut self,
        attempt: &NegotiationAttempt,
        bridge: Arc<PeerBridge>,
    ) -> BridgeResult<()> {
        if !self.owns(attempt) {
            return Err(BridgeError::Cancelled);
        }
        match bridge.side() {
            BridgeSide::Browser => self.browser_bridge = Some(bridge),
            BridgeSide::Provider => self.provider_bridge = Some(bridge),
        }
        Ok(())
    }

    /// Advance the state machine on behalf of `attempt`.
    pub fn advance(&mut self, attempt: &NegotiationAttempt, next: CallState) -> BridgeResult<()> {
        if !self.owns(attempt) {
            return Err(BridgeError::Cancelled);
        }
        self.transition(next)
    }

    pub fn transition(&mut self, next: CallState) -> BridgeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, call_id = ?self.call_id, "Call state transition");
        self.state = next;
        Ok(())
    }

    /// Remember `call_id` as closed so it is never bridged again.
    pub fn mark_closed(&mut self, call_id: &str) {
        if call_id.is_empty() || self.is_closed_call(call_id) {
            return;
        }
        if self.closed_call_ids.len() == CLOSED_CALL_HISTORY {
            self.closed_call_ids.pop_front();
        }
        self.closed_call_ids.push_back(call_id.to_string());
    }

    /// Return to `Idle`.
    ///
    /// Cancels the in-flight attempt and hands back the bridges, which the
    /// caller must close. Idempotent.
    #[must_use = "released bridges must be closed"]
    pub fn reset(&mut self) -> Vec<Arc<PeerBridge>> {
        if let Some(token) = self.attempt.take() {
            token.cancel();
        }

        self.call_id = None;
        self.state = CallState::Idle;
        self.browser_offer_sdp = None;
        self.provider_offer_sdp = None;
        self.browser_channel = None;

        self.browser_bridge
            .take()
            .into_iter()
            .chain(self.provider_bridge.take())
            .collect()
    }
}
