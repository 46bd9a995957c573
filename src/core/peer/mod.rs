pub mod base;
pub mod bridge;
pub mod rtc_engine;
pub mod sdp;

pub use base::{
    BridgeSide, IceCandidate, IceCandidateCallback, MediaStream, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerError, PeerResult, TrackCallback, TrackKind,
};
pub use bridge::PeerBridge;
pub use rtc_engine::WebRtcEngine;
pub use sdp::force_active_dtls_role;
