//! Drives one bridging attempt from two stored offers to an accepted call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::browser::{BrowserEvent, BrowserHub, ChannelRef};
use crate::core::call_control::{CallAction, CallControl};
use crate::core::peer::sdp::has_non_active_setup;
use crate::core::peer::{
    BridgeSide, IceCandidate, PeerBridge, PeerConnectionFactory, force_active_dtls_role,
};
use crate::core::session::{CallSession, CallState, NegotiationAttempt, SessionSnapshot};
use crate::errors::bridge_error::{BridgeError, BridgeResult};

/// Backoff for the provider `accept` request.
///
/// The first request goes out after `initial_delay` (the provider needs a
/// moment after `pre_accept`), each retry waits `multiplier` times longer,
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct AcceptRetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for AcceptRetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(8000),
            max_attempts: 3,
        }
    }
}

impl AcceptRetryPolicy {
    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let delay = base * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub remote_track_timeout: Duration,
    pub accept_retry: AcceptRetryPolicy,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            remote_track_timeout: Duration::from_millis(10_000),
            accept_retry: AcceptRetryPolicy::default(),
        }
    }
}

/// How a bridging attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Accepted by the provider, browser timer started
    Active,
    /// Pre-accepted, but no `accept` was confirmed
    AcceptUnconfirmed,
    /// Aborted, session reset
    Failed { code: &'static str },
    /// Superseded by a terminate or reject
    Cancelled,
}

/// Background task running bridging attempts.
///
/// `running` and `rerun` only change under the lock, so a trigger that
/// arrives while the task winds down is never lost.
#[derive(Default)]
struct AttemptTask {
    handle: Option<JoinHandle<Option<AttemptOutcome>>>,
    running: bool,
    rerun: bool,
}

/// Owns the call session and sequences the negotiation.
pub struct BridgeOrchestrator {
    pub(crate) session: RwLock<CallSession>,
    attempt_lease: Mutex<()>,
    attempt_task: SyncMutex<AttemptTask>,
    engine: Arc<dyn PeerConnectionFactory>,
    pub(crate) call_control: Arc<dyn CallControl>,
    pub(crate) browsers: BrowserHub,
    settings: BridgeSettings,
}

impl BridgeOrchestrator {
    pub fn new(
        engine: Arc<dyn PeerConnectionFactory>,
        call_control: Arc<dyn CallControl>,
        browsers: BrowserHub,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            session: RwLock::new(CallSession::new()),
            attempt_lease: Mutex::new(()),
            attempt_task: SyncMutex::new(AttemptTask::default()),
            engine,
            call_control,
            browsers,
            settings,
        })
    }

    pub fn browsers(&self) -> &BrowserHub {
        &self.browsers
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.read().await.snapshot()
    }

    /// Schedule an attempt in the background.
    ///
    /// While the task is busy the trigger is queued, and the task checks the
    /// session again once its current attempt is over.
    pub(crate) fn spawn_negotiation(self: &Arc<Self>) {
        let mut task = self.attempt_task.lock();
        if task.running {
            debug!("Bridging task busy, queueing re-check");
            task.rerun = true;
            return;
        }
        task.running = true;
        task.rerun = false;
        let this = Arc::clone(self);
        task.handle = Some(tokio::spawn(async move { this.negotiate_while_triggered().await }));
    }

    /// Run attempts until no trigger arrived during the last one.
    async fn negotiate_while_triggered(&self) -> Option<AttemptOutcome> {
        let mut last = None;
        loop {
            if let Some(outcome) = self.negotiate_if_ready().await {
                last = Some(outcome);
            }

            let again = {
                let mut task = self.attempt_task.lock();
                if task.rerun {
                    task.rerun = false;
                } else {
                    task.running = false;
                }
                task.running
            };
            if !again {
                return last;
            }
        }
    }

    /// Wait for the most recently scheduled task to finish.
    ///
    /// Returns the outcome of the last attempt that task ran.
    pub async fn settle(&self) -> Option<AttemptOutcome> {
        let handle = self.attempt_task.lock().handle.take()?;
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Bridging task failed");
                self.attempt_task.lock().running = false;
                None
            }
        }
    }

    /// Run a bridging attempt if both offers are present.
    ///
    /// Returns `None` when the session is not ready or an attempt already
    /// holds the lease.
    pub async fn negotiate_if_ready(&self) -> Option<AttemptOutcome> {
        let Ok(_lease) = self.attempt_lease.try_lock() else {
            debug!("Bridging attempt already in flight");
            return None;
        };

        let attempt = match self.session.write().await.begin_negotiation() {
            Ok(Some(attempt)) => attempt,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "Cannot start negotiation");
                return None;
            }
        };

        let call_id = attempt.call_id.clone();
        info!(call_id = %call_id, "Starting bridging attempt");

        match self.run_attempt(&attempt).await {
            Ok(outcome) => Some(outcome),
            Err(BridgeError::Cancelled) => {
                info!(call_id = %call_id, "Bridging attempt cancelled");
                Some(AttemptOutcome::Cancelled)
            }
            Err(err) => {
                error!(call_id = %call_id, code = err.code(), error = %err, "Bridging attempt failed");
                let code = err.code();
                self.fail_attempt(&attempt, &err).await;
                Some(AttemptOutcome::Failed { code })
            }
        }
    }

    async fn run_attempt(&self, attempt: &NegotiationAttempt) -> BridgeResult<AttemptOutcome> {
        let call_id = attempt.call_id.as_str();

        // Browser leg. Candidates are held back until the browser has the answer.
        let browser = self.create_bridge(attempt, BridgeSide::Browser).await?;
        let relay = Arc::new(CandidateRelay::new(attempt.channel.clone()));
        {
            let relay = relay.clone();
            browser.on_local_ice_candidate(Arc::new(move |candidate: IceCandidate| {
                let relay = relay.clone();
                Box::pin(async move { relay.relay(candidate).await })
            }));
        }
        cancellable(attempt, browser.apply_remote_offer(&attempt.browser_offer_sdp)).await??;

        // Provider leg
        let provider = self.create_bridge(attempt, BridgeSide::Provider).await?;
        cancellable(attempt, provider.apply_remote_offer(&attempt.provider_offer_sdp)).await??;

        // Browser audio out to the provider
        let browser_audio = browser.captured_audio();
        cancellable(attempt, provider.attach_local_tracks(&browser_audio)).await??;

        let provider_stream = cancellable(
            attempt,
            provider.await_remote_audio(self.settings.remote_track_timeout),
        )
        .await??;

        // Provider audio out to the browser
        cancellable(
            attempt,
            browser.attach_local_tracks(&provider_stream.audio_tracks()),
        )
        .await??;

        let browser_answer = cancellable(attempt, browser.create_local_answer()).await??;
        let delivered = attempt
            .channel
            .emit(BrowserEvent::BrowserAnswer {
                sdp: browser_answer,
            })
            .await;
        if !delivered {
            return Err(BridgeError::BrowserDisconnected);
        }
        relay.release().await;

        let provider_answer =
            force_active_dtls_role(&cancellable(attempt, provider.create_local_answer()).await??);
        debug_assert!(!has_non_active_setup(&provider_answer));

        self.advance(attempt, CallState::PreAccepting).await?;
        let pre_accept =
            cancellable(attempt, self.call_control.pre_accept(call_id, &provider_answer)).await?;
        if !pre_accept.is_success() {
            return Err(BridgeError::ProviderRequestFailure {
                action: CallAction::PreAccept,
                reason: pre_accept.reason(),
            });
        }

        self.advance(attempt, CallState::Accepting).await?;
        if !self.accept_with_retry(attempt, &provider_answer).await? {
            return Ok(AttemptOutcome::AcceptUnconfirmed);
        }

        self.advance(attempt, CallState::Active).await?;
        attempt.channel.emit(BrowserEvent::StartBrowserTimer).await;
        info!(call_id, "Call bridged");
        Ok(AttemptOutcome::Active)
    }

    async fn accept_with_retry(&self, attempt: &NegotiationAttempt, sdp: &str) -> BridgeResult<bool> {
        let policy = &self.settings.accept_retry;
        let max_attempts = policy.max_attempts.max(1);

        for n in 1..=max_attempts {
            cancellable(attempt, tokio::time::sleep(policy.delay_for(n))).await?;

            let outcome =
                cancellable(attempt, self.call_control.accept(&attempt.call_id, sdp)).await?;
            if outcome.is_success() {
                return Ok(true);
            }
            warn!(
                call_id = %attempt.call_id,
                attempt = n,
                max_attempts,
                reason = %outcome.reason(),
                "Accept not confirmed"
            );
        }

        error!(call_id = %attempt.call_id, "Provider never confirmed accept");
        Ok(false)
    }

    async fn create_bridge(
        &self,
        attempt: &NegotiationAttempt,
        side: BridgeSide,
    ) -> BridgeResult<Arc<PeerBridge>> {
        let connection = cancellable(attempt, self.engine.create(side))
            .await?
            .map_err(|e| BridgeError::Negotiation {
                side,
                reason: e.to_string(),
            })?;
        let bridge = Arc::new(PeerBridge::new(side, connection));

        let attached = self
            .session
            .write()
            .await
            .attach_bridge(attempt, bridge.clone());
        if let Err(e) = attached {
            bridge.close().await;
            return Err(e);
        }
        Ok(bridge)
    }

    async fn advance(&self, attempt: &NegotiationAttempt, next: CallState) -> BridgeResult<()> {
        self.session.write().await.advance(attempt, next)
    }

    async fn fail_attempt(&self, attempt: &NegotiationAttempt, err: &BridgeError) {
        let released = {
            let mut session = self.session.write().await;
            if !session.owns(attempt) {
                return;
            }
            if let Err(e) = session.advance(attempt, CallState::Failed) {
                debug!(error = %e, "Failed transition skipped");
            }
            session.reset()
        };
        close_bridges(released).await;

        attempt
            .channel
            .emit(BrowserEvent::BridgeError {
                code: err.code().to_string(),
                message: err.to_string(),
            })
            .await;
        attempt.channel.emit(BrowserEvent::CallEnded).await;
    }

    /// End the local call if it belongs to `call_id` (or no call is bound),
    /// remembering the id as closed. Returns false for a stale id.
    pub(crate) async fn end_local_call(&self, call_id: &str) -> bool {
        let released = {
            let mut session = self.session.write().await;
            session.mark_closed(call_id);

            if let Some(current) = session.call_id().filter(|current| *current != call_id) {
                warn!(call_id, current, "Ignoring close for a different call");
                return false;
            }
            if !session.state().is_terminal() {
                if let Err(e) = session.transition(CallState::Ended) {
                    debug!(error = %e, "Ended transition skipped");
                }
            }
            session.reset()
        };
        close_bridges(released).await;
        true
    }
}

/// Run `fut` unless the attempt is cancelled first.
async fn cancellable<F: Future>(attempt: &NegotiationAttempt, fut: F) -> BridgeResult<F::Output> {
    tokio::select! {
        _ = attempt.cancel.cancelled() => Err(BridgeError::Cancelled),
        output = fut => Ok(output),
    }
}

async fn close_bridges(bridges: Vec<Arc<PeerBridge>>) {
    futures::future::join_all(bridges.iter().map(|bridge| bridge.close())).await;
}

/// Forwards local browser-leg candidates, holding them until the browser
/// has received the answer.
struct CandidateRelay {
    channel: ChannelRef,
    held: SyncMutex<Option<Vec<IceCandidate>>>,
}

impl CandidateRelay {
    fn new(channel: ChannelRef) -> Self {
        Self {
            channel,
            held: SyncMutex::new(Some(Vec::new())),
        }
    }

    async fn relay(&self, candidate: IceCandidate) {
        {
            let mut held = self.held.lock();
            if let Some(queue) = held.as_mut() {
                queue.push(candidate);
                return;
            }
        }
        self.channel
            .emit(BrowserEvent::BrowserCandidate { candidate })
            .await;
    }

    async fn release(&self) {
        let queued = self.held.lock().take().unwrap_or_default();
        for candidate in queued {
            self.channel
                .emit(BrowserEvent::BrowserCandidate { candidate })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff() {
        let policy = AcceptRetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_without_growth() {
        let policy = AcceptRetryPolicy {
            initial_delay: Duration::from_millis(250),
            multiplier: 1.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 2,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(5), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_relay_holds_candidates_until_release() {
        let hub = BrowserHub::new();
        let (channel, mut rx) = hub.open_channel();
        let relay = CandidateRelay::new(channel.downgrade());

        let candidate = |n: u32| IceCandidate {
            candidate: format!("candidate:{n}"),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        };

        relay.relay(candidate(1)).await;
        assert!(rx.try_recv().is_err());

        relay.release().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            BrowserEvent::BrowserCandidate {
                candidate: candidate(1)
            }
        );

        relay.relay(candidate(2)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            BrowserEvent::BrowserCandidate {
                candidate: candidate(2)
            }
        );
    }
}
