use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::base::{
    BridgeSide, IceCandidate, IceCandidateCallback, MediaStream, MediaTrack, PeerConnection,
};
use crate::errors::bridge_error::{BridgeError, BridgeResult};

/// One leg of the bridged call.
///
/// Wraps an engine connection, collects inbound tracks into a sink grouped by
/// stream, and turns engine failures into [`BridgeError`]s.
pub struct PeerBridge {
    side: BridgeSide,
    connection: Arc<dyn PeerConnection>,
    inbound: watch::Sender<Vec<MediaStream>>,
    remote_applied: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PeerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerBridge")
            .field("side", &self.side)
            .field("remote_applied", &self.remote_applied.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PeerBridge {
    pub fn new(side: BridgeSide, connection: Arc<dyn PeerConnection>) -> Self {
        let (inbound, _) = watch::channel(Vec::new());

        let sink = inbound.clone();
        connection.on_track(Arc::new(move |track: MediaTrack| {
            let sink = sink.clone();
            Box::pin(async move {
                debug!(%side, track_id = %track.id, stream_id = %track.stream_id, kind = ?track.kind, "Inbound track");
                sink.send_modify(|streams| capture(streams, track));
            })
        }));

        Self {
            side,
            connection,
            inbound,
            remote_applied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn side(&self) -> BridgeSide {
        self.side
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn apply_remote_offer(&self, sdp: &str) -> BridgeResult<()> {
        self.connection
            .set_remote_offer(sdp)
            .await
            .map_err(|e| BridgeError::Negotiation {
                side: self.side,
                reason: e.to_string(),
            })?;
        self.remote_applied.store(true, Ordering::Release);
        debug!(side = %self.side, "Remote offer applied");
        Ok(())
    }

    /// Add each track for outbound send.
    pub async fn attach_local_tracks(&self, tracks: &[MediaTrack]) -> BridgeResult<()> {
        for track in tracks {
            self.connection
                .add_track(track)
                .await
                .map_err(|e| BridgeError::Negotiation {
                    side: self.side,
                    reason: format!("failed to add track {}: {e}", track.id),
                })?;
        }
        if !tracks.is_empty() {
            debug!(side = %self.side, count = tracks.len(), "Attached outbound tracks");
        }
        Ok(())
    }

    /// Audio tracks received so far.
    pub fn captured_audio(&self) -> Vec<MediaTrack> {
        self.inbound
            .borrow()
            .iter()
            .flat_map(MediaStream::audio_tracks)
            .collect()
    }

    /// Wait for the first stream carrying audio.
    pub async fn await_remote_audio(&self, timeout: Duration) -> BridgeResult<MediaStream> {
        let mut rx = self.inbound.subscribe();

        let wait = async {
            rx.wait_for(|streams| streams.iter().any(MediaStream::has_audio))
                .await
                .ok()
                .and_then(|streams| streams.iter().find(|s| s.has_audio()).cloned())
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            found = tokio::time::timeout(timeout, wait) => match found {
                Ok(Some(stream)) => {
                    info!(side = %self.side, stream_id = %stream.id, "Remote audio received");
                    Ok(stream)
                }
                Ok(None) => Err(BridgeError::Cancelled),
                Err(_) => Err(BridgeError::RemoteTrackTimeout(timeout)),
            },
        }
    }

    pub async fn create_local_answer(&self) -> BridgeResult<String> {
        self.connection
            .create_answer()
            .await
            .map_err(|e| BridgeError::AnswerCreation {
                side: self.side,
                reason: e.to_string(),
            })
    }

    pub fn on_local_ice_candidate(&self, handler: IceCandidateCallback) {
        self.connection.on_ice_candidate(handler);
    }

    pub async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> BridgeResult<()> {
        if !self.remote_applied.load(Ordering::Acquire) {
            return Err(BridgeError::InvalidCandidate(
                "no remote description applied".to_string(),
            ));
        }
        self.connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| BridgeError::InvalidCandidate(e.to_string()))
    }

    /// Release engine resources and cancel pending waits. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.connection.close().await {
            warn!(side = %self.side, error = %e, "Error closing peer connection");
        }
        debug!(side = %self.side, "Peer bridge closed");
    }
}

fn capture(streams: &mut Vec<MediaStream>, track: MediaTrack) {
    match streams.iter_mut().find(|s| s.id == track.stream_id) {
        Some(stream) => {
            if !stream.tracks.iter().any(|t| t.id == track.id) {
                stream.tracks.push(track);
            }
        }
        None => {
            let mut stream = MediaStream::new(track.stream_id.clone());
            stream.tracks.push(track);
            streams.push(stream);
        }
    }
}
