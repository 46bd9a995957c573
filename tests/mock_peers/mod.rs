//! In-memory peer-connection engine and shared fixtures for bridge tests.
//!
//! `MockEngine` hands out `MockPeer`s that record everything the bridge does
//! to them. Inbound audio is announced as soon as a remote offer is applied,
//! unless the side is configured to stay silent.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use callbridge_gateway::ServerConfig;
use callbridge_gateway::config::BridgeConfig;
use callbridge_gateway::core::call_control::{
    ActionOutcome, CallAction, CallControl, CallControlError,
};
use callbridge_gateway::core::peer::{
    BridgeSide, IceCandidate, IceCandidateCallback, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerError, PeerResult, TrackCallback, TrackKind,
};

pub const BROWSER_OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=browser\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=setup:actpass\r\na=mid:0\r\n";
pub const PROVIDER_OFFER: &str = "v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\ns=provider\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=setup:actpass\r\na=mid:0\r\n";

/// Answer SDP a mock peer produces for `side`. Always offers `actpass`.
pub fn answer_for(side: BridgeSide) -> String {
    format!(
        "v=0\r\no=- 5 6 IN IP4 127.0.0.1\r\ns={side}-answer\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=setup:actpass\r\na=mid:0\r\n"
    )
}

/// Local candidate a mock peer gathers while answering.
pub fn local_candidate(side: BridgeSide) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{side} 1 udp 2130706431 10.0.0.1 50000 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Reject remote offers on this side
    pub reject_offer: Option<BridgeSide>,
    /// Fail answer creation on this side
    pub fail_answer: Option<BridgeSide>,
    /// This side never announces inbound audio
    pub silent: Option<BridgeSide>,
    /// Answer creation on this side takes this long
    pub answer_delay: Option<(BridgeSide, Duration)>,
}

pub struct MockPeer {
    pub side: BridgeSide,
    options: MockOptions,
    track_callback: Mutex<Option<TrackCallback>>,
    ice_callback: Mutex<Option<IceCandidateCallback>>,
    pub remote_offer: Mutex<Option<String>>,
    pub sent_tracks: Mutex<Vec<String>>,
    pub remote_candidates: Mutex<Vec<IceCandidate>>,
    pub answers: Mutex<u32>,
    closed: AtomicBool,
}

impl MockPeer {
    fn new(side: BridgeSide, options: MockOptions) -> Self {
        Self {
            side,
            options,
            track_callback: Mutex::new(None),
            ice_callback: Mutex::new(None),
            remote_offer: Mutex::new(None),
            sent_tracks: Mutex::new(Vec::new()),
            remote_candidates: Mutex::new(Vec::new()),
            answers: Mutex::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver an inbound audio track as the engine would.
    pub async fn emit_audio(&self) {
        let callback = self.track_callback.lock().clone();
        if let Some(callback) = callback {
            let track = MediaTrack::new(
                format!("{}-audio", self.side),
                format!("{}-stream", self.side),
                TrackKind::Audio,
                Arc::new(()),
            );
            callback(track).await;
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn set_remote_offer(&self, sdp: &str) -> PeerResult<()> {
        if self.options.reject_offer == Some(self.side) {
            return Err(PeerError::InvalidDescription("malformed offer".to_string()));
        }
        *self.remote_offer.lock() = Some(sdp.to_string());

        if self.options.silent != Some(self.side) {
            self.emit_audio().await;
        }
        Ok(())
    }

    async fn create_answer(&self) -> PeerResult<String> {
        if let Some((side, delay)) = self.options.answer_delay {
            if side == self.side {
                tokio::time::sleep(delay).await;
            }
        }
        if self.options.fail_answer == Some(self.side) {
            return Err(PeerError::AnswerFailed("no codecs in common".to_string()));
        }
        *self.answers.lock() += 1;

        let callback = self.ice_callback.lock().clone();
        if let Some(callback) = callback {
            callback(local_candidate(self.side)).await;
        }
        Ok(answer_for(self.side))
    }

    async fn add_track(&self, track: &MediaTrack) -> PeerResult<()> {
        self.sent_tracks.lock().push(track.id.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerResult<()> {
        self.remote_candidates.lock().push(candidate);
        Ok(())
    }

    fn on_track(&self, callback: TrackCallback) {
        *self.track_callback.lock() = Some(callback);
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        *self.ice_callback.lock() = Some(callback);
    }

    async fn close(&self) -> PeerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine handing out recorded [`MockPeer`]s.
#[derive(Default)]
pub struct MockEngine {
    options: MockOptions,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockEngine {
    pub fn new(options: MockOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().clone()
    }

    pub fn peer(&self, side: BridgeSide) -> Option<Arc<MockPeer>> {
        self.peers.lock().iter().find(|p| p.side == side).cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockEngine {
    async fn create(&self, side: BridgeSide) -> PeerResult<Arc<dyn PeerConnection>> {
        let peer = Arc::new(MockPeer::new(side, self.options.clone()));
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

/// One provider request seen by [`RecordingCallControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAction {
    pub call_id: String,
    pub action: CallAction,
    pub sdp: Option<String>,
}

/// Call control that answers locally and records every request.
#[derive(Default)]
pub struct RecordingCallControl {
    failing: Vec<CallAction>,
    sent: Mutex<Vec<SentAction>>,
}

impl RecordingCallControl {
    /// Every action in `failing` is reported as unsuccessful.
    pub fn failing(failing: &[CallAction]) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.to_vec(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<SentAction> {
        self.sent.lock().clone()
    }

    pub fn actions(&self) -> Vec<CallAction> {
        self.sent.lock().iter().map(|s| s.action).collect()
    }
}

#[async_trait]
impl CallControl for RecordingCallControl {
    async fn send_action(
        &self,
        call_id: &str,
        action: CallAction,
        sdp: Option<&str>,
    ) -> ActionOutcome {
        self.sent.lock().push(SentAction {
            call_id: call_id.to_string(),
            action,
            sdp: sdp.map(str::to_string),
        });
        if self.failing.contains(&action) {
            ActionOutcome::failed(
                action,
                call_id,
                CallControlError::NotSuccessful("stubbed failure".to_string()),
            )
        } else {
            ActionOutcome::succeeded(action, call_id)
        }
    }
}

/// Configuration pointing the provider client at `api_base`, with short
/// accept delays so end-to-end tests run in real time.
pub fn test_config(api_base: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        public_dir: None,
        whatsapp_api_base: api_base.to_string(),
        phone_number_id: "PNID".to_string(),
        access_token: "test-token".to_string(),
        verify_token: Some("verify-me".to_string()),
        bridge: BridgeConfig {
            ice_servers: vec!["stun:stun.example.com:3478".to_string()],
            remote_track_timeout_ms: 2_000,
            accept_delay_ms: 100,
            accept_max_attempts: 2,
            accept_backoff_multiplier: 2.0,
            accept_max_delay_ms: 400,
            request_timeout_ms: 2_000,
        },
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 100_000,
        rate_limit_burst_size: 10,
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
