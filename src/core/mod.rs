pub mod browser;
pub mod call_control;
pub mod ingress;
pub mod orchestrator;
pub mod peer;
pub mod session;

pub use browser::{BrowserChannel, BrowserCommand, BrowserEvent, BrowserHub, ChannelRef};
pub use call_control::{ActionOutcome, CallAction, CallControl, CallControlError};
pub use ingress::{CallEvent, IncomingCall};
pub use orchestrator::{AcceptRetryPolicy, AttemptOutcome, BridgeOrchestrator, BridgeSettings};
pub use peer::{BridgeSide, IceCandidate, PeerBridge, PeerConnection, PeerConnectionFactory};
pub use session::{CallSession, CallState, SessionSnapshot};
