//! Browser and webhook events into orchestrator calls.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::browser::{BrowserCommand, BrowserEvent, ChannelRef};
use crate::core::call_control::ActionOutcome;
use crate::core::orchestrator::BridgeOrchestrator;
use crate::core::peer::{BridgeSide, IceCandidate};
use crate::errors::bridge_error::{BridgeError, BridgeResult};

pub const UNKNOWN_CALLER: &str = "Unknown";

/// A `connect` event from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: String,
    pub sdp: String,
    pub caller_name: Option<String>,
    pub caller_number: Option<String>,
}

/// Call events delivered by the provider webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Connect(IncomingCall),
    Terminate {
        call_id: String,
        duration: Option<u64>,
        status: Option<String>,
    },
    Other {
        call_id: String,
        event: String,
    },
}

impl BridgeOrchestrator {
    pub async fn handle_browser_command(self: &Arc<Self>, command: BrowserCommand, channel: &ChannelRef) {
        match command {
            BrowserCommand::Offer { sdp } => self.on_browser_offer(sdp, channel.clone()).await,
            BrowserCommand::Candidate { candidate } => self.on_browser_candidate(candidate).await,
            BrowserCommand::RejectCall { call_id } => {
                self.on_reject_call(&call_id).await;
            }
            BrowserCommand::TerminateCall { call_id } => {
                self.on_terminate_call(&call_id).await;
            }
        }
    }

    /// Returns an error only for internal faults.
    pub async fn handle_call_event(self: &Arc<Self>, event: CallEvent) -> BridgeResult<()> {
        match event {
            CallEvent::Connect(call) => self.on_incoming_call(call).await,
            CallEvent::Terminate {
                call_id,
                duration,
                status,
            } => {
                self.on_call_terminated(&call_id, duration, status.as_deref())
                    .await;
                Ok(())
            }
            CallEvent::Other { call_id, event } => {
                info!(call_id = %call_id, event = %event, "Unhandled call event");
                Ok(())
            }
        }
    }

    pub async fn on_browser_offer(self: &Arc<Self>, sdp: String, channel: ChannelRef) {
        let recorded = {
            let mut session = self.session.write().await;
            session
                .record_browser_offer(sdp, channel.clone())
                .map(|()| session.ready_to_negotiate())
        };

        match recorded {
            Ok(ready) => {
                info!(channel_id = %channel.id(), ready, "Browser offer received");
                if ready {
                    self.spawn_negotiation();
                }
            }
            Err(err) => {
                warn!(channel_id = %channel.id(), error = %err, "Browser offer refused");
                channel
                    .emit(BrowserEvent::BridgeError {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    })
                    .await;
            }
        }
    }

    pub async fn on_browser_candidate(&self, candidate: IceCandidate) {
        let bridge = self
            .session
            .read()
            .await
            .bridge(BridgeSide::Browser);

        let Some(bridge) = bridge else {
            warn!("Cannot add ICE candidate: browser peer connection not initialized");
            return;
        };
        if let Err(e) = bridge.add_remote_ice_candidate(candidate).await {
            warn!(error = %e, "Browser ICE candidate not added");
        }
    }

    /// Refuse the call locally, then ask the provider to reject it.
    pub async fn on_reject_call(&self, call_id: &str) -> ActionOutcome {
        if self.end_local_call(call_id).await {
            info!(call_id, "Call rejected by browser");
        }
        let outcome = self.call_control.reject(call_id).await;
        log_outcome(&outcome);
        outcome
    }

    /// End the call locally, then ask the provider to terminate it.
    pub async fn on_terminate_call(&self, call_id: &str) -> ActionOutcome {
        if self.end_local_call(call_id).await {
            info!(call_id, "Call terminated by browser");
        }
        let outcome = self.call_control.terminate(call_id).await;
        log_outcome(&outcome);
        outcome
    }

    pub async fn on_incoming_call(self: &Arc<Self>, call: IncomingCall) -> BridgeResult<()> {
        let recorded = {
            let mut session = self.session.write().await;
            session
                .record_provider_offer(&call.call_id, call.sdp)
                .map(|()| session.ready_to_negotiate())
        };

        let ready = match recorded {
            Ok(ready) => ready,
            Err(BridgeError::CallInProgress(state)) => {
                debug!(call_id = %call.call_id, %state, "Duplicate connect ignored");
                return Ok(());
            }
            Err(e @ (BridgeError::CallClosed(_) | BridgeError::MissingCallId)) => {
                warn!(call_id = %call.call_id, error = %e, "Connect refused");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let caller_name = call
            .caller_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string());
        let caller_number = call
            .caller_number
            .filter(|number| !number.is_empty())
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string());

        info!(call_id = %call.call_id, caller_name = %caller_name, caller_number = %caller_number, "Incoming call");
        self.browsers.broadcast(BrowserEvent::CallIsComing {
            call_id: call.call_id,
            caller_name,
            caller_number,
        });

        if ready {
            self.spawn_negotiation();
        }
        Ok(())
    }

    pub async fn on_call_terminated(&self, call_id: &str, duration: Option<u64>, status: Option<&str>) {
        info!(call_id, ?duration, ?status, "Call terminated by provider");
        if self.end_local_call(call_id).await {
            self.browsers.broadcast(BrowserEvent::CallEnded);
        }
    }
}

fn log_outcome(outcome: &ActionOutcome) {
    if outcome.is_success() {
        info!(call_id = %outcome.call_id, action = %outcome.action, "Provider confirmed");
    } else {
        warn!(
            call_id = %outcome.call_id,
            action = %outcome.action,
            reason = %outcome.reason(),
            "Provider did not confirm"
        );
    }
}
