//! Peer connections backed by the `webrtc` crate.
//!
//! `webrtc` only fires `on_track` once ICE and DTLS are up, which is after the
//! answers have been exchanged. The bridge needs to forward inbound audio
//! before that, so the adapter announces an inbound audio track as soon as a
//! remote offer declares a receiving audio m-line. The announced track's
//! source resolves to the real [`TrackRemote`] when it shows up, and every
//! connection that sends the track pumps RTP from it into a local track.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::base::{
    BridgeSide, IceCandidate, IceCandidateCallback, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerError, PeerResult, TrackCallback, TrackKind,
};

/// Upper bound on waiting for ICE gathering before handing out a
/// non-trickle answer.
const ICE_GATHER_TIMEOUT: Duration = Duration::from_millis(2500);

/// Factory for `webrtc`-backed peer connections.
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<String>) -> PeerResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Engine(format!("Failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerError::Engine(format!("Failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcEngine {
    async fn create(&self, side: BridgeSide) -> PeerResult<Arc<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_config())
            .await
            .map_err(|e| PeerError::Engine(format!("Failed to create peer connection: {e}")))?;

        debug!(%side, "Created peer connection");
        Ok(Arc::new(WebRtcPeer::new(side, Arc::new(pc))))
    }
}

/// Inbound audio whose RTP track may not exist yet.
pub struct RemoteAudio {
    remote: watch::Sender<Option<Arc<TrackRemote>>>,
}

impl RemoteAudio {
    fn pending() -> Arc<Self> {
        let (remote, _) = watch::channel(None);
        Arc::new(Self { remote })
    }

    fn resolve(&self, track: Arc<TrackRemote>) {
        self.remote.send_replace(Some(track));
    }

    async fn track(&self) -> Option<Arc<TrackRemote>> {
        let mut rx = self.remote.subscribe();
        let resolved = rx.wait_for(Option::is_some).await.ok()?;
        (*resolved).clone()
    }
}

type Announced = Arc<Mutex<HashMap<String, Arc<RemoteAudio>>>>;

struct WebRtcPeer {
    side: BridgeSide,
    pc: Arc<RTCPeerConnection>,
    track_callback: Arc<Mutex<Option<TrackCallback>>>,
    announced: Announced,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WebRtcPeer {
    fn new(side: BridgeSide, pc: Arc<RTCPeerConnection>) -> Self {
        let track_callback: Arc<Mutex<Option<TrackCallback>>> = Arc::new(Mutex::new(None));
        let announced: Announced = Arc::new(Mutex::new(HashMap::new()));

        let callback = track_callback.clone();
        let pending = announced.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  transceiver: Arc<RTCRtpTransceiver>| {
                let callback = callback.clone();
                let pending = pending.clone();
                Box::pin(async move {
                    let mid = mid_key(&transceiver).unwrap_or_default();
                    let existing = pending.lock().get(&mid).cloned();
                    if let Some(source) = existing {
                        debug!(%side, %mid, "Remote RTP track bound");
                        source.resolve(track);
                        return;
                    }

                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        _ => TrackKind::Video,
                    };
                    let source = RemoteAudio::pending();
                    source.resolve(track.clone());
                    pending.lock().insert(mid.clone(), source.clone());

                    let announced = MediaTrack::new(
                        format!("{side}-{}", track.id()),
                        track.stream_id(),
                        kind,
                        source,
                    );
                    let cb = callback.lock().clone();
                    if let Some(cb) = cb {
                        cb(announced).await;
                    }
                })
            },
        ));

        Self {
            side,
            pc,
            track_callback,
            announced,
            forwarders: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Announce every receiving audio m-line of the applied remote offer.
    async fn announce_inbound_audio(&self) {
        let mut fresh = Vec::new();

        for transceiver in self.pc.get_transceivers().await {
            if transceiver.kind() != RTPCodecType::Audio {
                continue;
            }
            if !matches!(
                transceiver.direction(),
                RTCRtpTransceiverDirection::Recvonly | RTCRtpTransceiverDirection::Sendrecv
            ) {
                continue;
            }
            let Some(mid) = mid_key(&transceiver) else {
                continue;
            };

            let mut announced = self.announced.lock();
            if announced.contains_key(&mid) {
                continue;
            }
            let source = RemoteAudio::pending();
            announced.insert(mid.clone(), source.clone());
            fresh.push(MediaTrack::new(
                format!("{}-audio-{mid}", self.side),
                format!("{}-stream", self.side),
                TrackKind::Audio,
                source,
            ));
        }

        let callback = self.track_callback.lock().clone();
        if let Some(callback) = callback {
            for track in fresh {
                callback(track).await;
            }
        }
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn set_remote_offer(&self, sdp: &str) -> PeerResult<()> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())
            .map_err(|e| PeerError::InvalidDescription(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerError::InvalidDescription(e.to_string()))?;

        self.announce_inbound_audio().await;
        Ok(())
    }

    async fn create_answer(&self) -> PeerResult<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::AnswerFailed(e.to_string()))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| PeerError::AnswerFailed(e.to_string()))?;

        // The provider does not trickle, so its answer must carry candidates.
        if self.side == BridgeSide::Provider
            && tokio::time::timeout(ICE_GATHER_TIMEOUT, gather_complete.recv())
                .await
                .is_err()
        {
            debug!(side = %self.side, "ICE gathering timed out, answering with partial candidates");
        }

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| PeerError::AnswerFailed("no local description".to_string()))
    }

    async fn add_track(&self, track: &MediaTrack) -> PeerResult<()> {
        let source = track
            .source::<RemoteAudio>()
            .ok_or_else(|| PeerError::UnsupportedTrack(track.id.clone()))?;

        let local = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            track.id.clone(),
            track.stream_id.clone(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| PeerError::Track(e.to_string()))?;

        // Drain RTCP so interceptors keep running.
        let cancel = self.cancel.clone();
        let rtcp = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = sender.read(&mut buf) => if read.is_err() { break },
                }
            }
        });

        let forwarder = tokio::spawn(forward_rtp(
            self.side,
            source,
            local,
            self.cancel.clone(),
        ));

        self.forwarders.lock().extend([rtcp, forwarder]);
        info!(side = %self.side, track_id = %track.id, "Forwarding track");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| PeerError::CandidateRejected(e.to_string()))
    }

    fn on_track(&self, callback: TrackCallback) {
        *self.track_callback.lock() = Some(callback);
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        let side = self.side;
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let callback = callback.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!(%side, "ICE gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            callback(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            })
                            .await
                        }
                        Err(e) => warn!(%side, error = %e, "Failed to serialize ICE candidate"),
                    }
                })
            }));
    }

    async fn close(&self) -> PeerResult<()> {
        self.cancel.cancel();
        for handle in self.forwarders.lock().drain(..) {
            handle.abort();
        }
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::Engine(format!("Failed to close peer connection: {e}")))
    }
}

fn mid_key(transceiver: &RTCRtpTransceiver) -> Option<String> {
    transceiver.mid().map(|mid| mid.to_string())
}

async fn forward_rtp(
    side: BridgeSide,
    source: Arc<RemoteAudio>,
    local: Arc<TrackLocalStaticRTP>,
    cancel: CancellationToken,
) {
    let remote = tokio::select! {
        _ = cancel.cancelled() => return,
        remote = source.track() => match remote {
            Some(remote) => remote,
            None => return,
        },
    };

    debug!(%side, track_id = %local.id(), "RTP forwarding started");
    let mut packets: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = remote.read_rtp() => match read {
                Ok((packet, _)) => {
                    if let Err(e) = local.write_rtp(&packet).await {
                        debug!(%side, error = %e, "RTP write failed");
                        break;
                    }
                    packets += 1;
                }
                Err(e) => {
                    debug!(%side, error = %e, "Remote track ended");
                    break;
                }
            },
        }
    }

    debug!(%side, packets, "RTP forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Offer from a local connection with one send-receive audio transceiver.
    async fn audio_offer(engine: &WebRtcEngine) -> String {
        let offerer = engine
            .api
            .new_peer_connection(engine.rtc_config())
            .await
            .unwrap();
        offerer
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();
        let offer = offerer.create_offer(None).await.unwrap();
        offerer.close().await.unwrap();
        offer.sdp
    }

    fn collect_tracks(peer: &Arc<dyn PeerConnection>) -> Arc<Mutex<Vec<MediaTrack>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        peer.on_track(Arc::new(move |track: MediaTrack| {
            let sink = sink.clone();
            Box::pin(async move { sink.lock().push(track) })
        }));
        seen
    }

    #[tokio::test]
    async fn test_remote_offer_announces_inbound_audio() {
        let engine = WebRtcEngine::new(Vec::new()).unwrap();
        let offer = audio_offer(&engine).await;
        let peer = engine.create(BridgeSide::Browser).await.unwrap();
        let seen = collect_tracks(&peer);

        peer.set_remote_offer(&offer).await.unwrap();

        let tracks = seen.lock().clone();
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_audio());
        assert!(tracks[0].id.starts_with("browser-audio-"));
        assert_eq!(tracks[0].stream_id, "browser-stream");
        assert!(tracks[0].source::<RemoteAudio>().is_some());

        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_answer_covers_offered_audio() {
        let engine = WebRtcEngine::new(Vec::new()).unwrap();
        let offer = audio_offer(&engine).await;
        let peer = engine.create(BridgeSide::Browser).await.unwrap();

        peer.set_remote_offer(&offer).await.unwrap();
        let answer = peer.create_answer().await.unwrap();

        assert!(answer.contains("m=audio"));
        assert!(answer.contains("a=setup:"));
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_offer_is_rejected() {
        let engine = WebRtcEngine::new(Vec::new()).unwrap();
        let peer = engine.create(BridgeSide::Provider).await.unwrap();

        let err = peer.set_remote_offer("not an sdp").await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidDescription(_)));
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_track_forwards_announced_audio_only() {
        let engine = WebRtcEngine::new(Vec::new()).unwrap();
        let offer = audio_offer(&engine).await;
        let browser = engine.create(BridgeSide::Browser).await.unwrap();
        let provider = engine.create(BridgeSide::Provider).await.unwrap();
        let seen = collect_tracks(&browser);
        browser.set_remote_offer(&offer).await.unwrap();

        let foreign = MediaTrack::new("foreign", "stream", TrackKind::Audio, Arc::new(()));
        let err = provider.add_track(&foreign).await.unwrap_err();
        assert!(matches!(err, PeerError::UnsupportedTrack(id) if id == "foreign"));

        let announced = seen.lock()[0].clone();
        provider.add_track(&announced).await.unwrap();

        browser.close().await.unwrap();
        provider.close().await.unwrap();
    }
}
