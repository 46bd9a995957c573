//! Base traits and types for the WebRTC peer-connection capability.
//!
//! The bridge never talks to a WebRTC stack directly. Everything it needs from
//! the engine (remote/local descriptions, tracks, ICE) goes through the
//! [`PeerConnection`] trait, and connections are minted by a
//! [`PeerConnectionFactory`]. The crate ships a `webrtc`-crate backed factory;
//! tests plug in their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by the peer-connection engine.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The engine could not be initialised or a connection could not be created
    #[error("Engine error: {0}")]
    Engine(String),

    /// The remote session description was rejected
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    /// Creating or applying the local answer failed
    #[error("Answer failed: {0}")]
    AnswerFailed(String),

    /// The ICE candidate was rejected
    #[error("Candidate rejected: {0}")]
    CandidateRejected(String),

    /// The track was not produced by this engine
    #[error("Unsupported track: {0}")]
    UnsupportedTrack(String),

    /// Adding a track to the connection failed
    #[error("Track error: {0}")]
    Track(String),
}

/// Result type for engine operations.
pub type PeerResult<T> = Result<T, PeerError>;

// =============================================================================
// Sides, tracks and candidates
// =============================================================================

/// Which leg of the bridged call a peer connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeSide {
    /// The browser leg (offer received over the browser channel)
    Browser,
    /// The calling-provider leg (offer received over the webhook)
    Provider,
}

impl fmt::Display for BridgeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeSide::Browser => write!(f, "browser"),
            BridgeSide::Provider => write!(f, "provider"),
        }
    }
}

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A media track handle produced by an engine.
///
/// The `source` is engine-private state (for the bundled engine, the remote
/// RTP track the media is pumped from). Tracks are only meaningful to the
/// engine that produced them.
#[derive(Clone)]
pub struct MediaTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    source: Arc<dyn Any + Send + Sync>,
}

impl MediaTrack {
    pub fn new(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        kind: TrackKind,
        source: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            source,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }

    /// Downcast the engine-private source.
    pub fn source<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.source).downcast::<T>().ok()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Inbound tracks grouped by their remote stream id.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_audio)
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks.iter().filter(|t| t.is_audio()).cloned().collect()
    }
}

/// An ICE candidate in the shape browsers exchange (`RTCIceCandidateInit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for inbound tracks.
pub type TrackCallback =
    Arc<dyn Fn(MediaTrack) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for locally gathered ICE candidates.
pub type IceCandidateCallback =
    Arc<dyn Fn(IceCandidate) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Traits
// =============================================================================

/// One peer connection as exposed by the engine.
///
/// The bridge only ever acts as the answering side.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Apply a remote offer.
    async fn set_remote_offer(&self, sdp: &str) -> PeerResult<()>;

    /// Create a local answer, apply it, and return its SDP.
    async fn create_answer(&self) -> PeerResult<String>;

    /// Send the given track on this connection.
    async fn add_track(&self, track: &MediaTrack) -> PeerResult<()>;

    /// Add a remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerResult<()>;

    /// Register the inbound-track callback. Replaces any previous callback.
    fn on_track(&self, callback: TrackCallback);

    /// Register the local ICE candidate callback. Replaces any previous callback.
    fn on_ice_candidate(&self, callback: IceCandidateCallback);

    /// Release engine resources.
    async fn close(&self) -> PeerResult<()>;
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, side: BridgeSide) -> PeerResult<Arc<dyn PeerConnection>>;
}
