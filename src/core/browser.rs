//! Browser message channel.
//!
//! Each WebSocket connection opens a [`BrowserChannel`]. The session keeps
//! only a [`ChannelRef`] to it (a weak sender), so a closed socket never
//! lingers in call state. Events for every connected browser go through the
//! hub's broadcast channel.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::core::peer::IceCandidate;

const BROADCAST_CAPACITY: usize = 64;
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Events sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrowserEvent {
    #[serde(rename = "call-is-coming")]
    CallIsComing {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "callerName")]
        caller_name: String,
        #[serde(rename = "callerNumber")]
        caller_number: String,
    },

    #[serde(rename = "browser-candidate")]
    BrowserCandidate { candidate: IceCandidate },

    #[serde(rename = "browser-answer")]
    BrowserAnswer { sdp: String },

    #[serde(rename = "start-browser-timer")]
    StartBrowserTimer,

    #[serde(rename = "call-ended")]
    CallEnded,

    #[serde(rename = "bridge-error")]
    BridgeError { code: String, message: String },
}

/// Commands received from the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrowserCommand {
    #[serde(rename = "browser-offer")]
    Offer { sdp: String },

    #[serde(rename = "browser-candidate")]
    Candidate { candidate: IceCandidate },

    #[serde(rename = "reject-call")]
    RejectCall {
        #[serde(rename = "callId")]
        call_id: String,
    },

    #[serde(rename = "terminate-call")]
    TerminateCall {
        #[serde(rename = "callId")]
        call_id: String,
    },
}

/// Fan-out point for browser events.
#[derive(Debug, Clone)]
pub struct BrowserHub {
    broadcast: broadcast::Sender<BrowserEvent>,
}

impl Default for BrowserHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserHub {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { broadcast }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.broadcast.subscribe()
    }

    /// Send `event` to every connected browser.
    pub fn broadcast(&self, event: BrowserEvent) {
        if self.broadcast.send(event).is_err() {
            debug!("No browser connected, broadcast dropped");
        }
    }

    /// Open a per-connection channel. The receiver feeds the socket writer.
    pub fn open_channel(&self) -> (BrowserChannel, mpsc::Receiver<BrowserEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        (
            BrowserChannel {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }
}

/// The owning end of one browser connection's outbound queue.
#[derive(Debug)]
pub struct BrowserChannel {
    id: Uuid,
    tx: mpsc::Sender<BrowserEvent>,
}

impl BrowserChannel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn downgrade(&self) -> ChannelRef {
        ChannelRef {
            id: self.id,
            tx: self.tx.downgrade(),
        }
    }
}

/// Non-owning reference to a browser connection.
#[derive(Debug, Clone)]
pub struct ChannelRef {
    id: Uuid,
    tx: mpsc::WeakSender<BrowserEvent>,
}

impl ChannelRef {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the connection still exists and its writer is still reading.
    pub fn is_connected(&self) -> bool {
        self.tx.upgrade().is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver `event` to this connection. Returns false if it is gone.
    pub async fn emit(&self, event: BrowserEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(event).await.is_ok(),
            None => {
                debug!(channel_id = %self.id, "Browser channel closed, event dropped");
                false
            }
        }
    }
}
