//! Call manager for orchestrating call lifecycle.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, mpsc, watch};

use crate::error::CallError;
use crate::ice::IceServerResolver;
use crate::media::{LocalMediaStream, MediaConstraints, MediaSource, RemoteMediaStream, TrackKind};
use crate::peer::{PeerEvent, PeerFactory, PeerHandle, PeerManager};
use crate::signaling::{
    AnswerRequest, CallPush, CandidateRequest, EndRequest, IceCandidate, InviteRequest,
    InviteResponse, SessionDescription, SignalingApi,
};
use crate::state::{
    CallPhase, CallSession, CallTransition, IncomingOffer, InviteHint,
};
use crate::types::{CallId, CallMode, EndReason, UserRef};

/// Configuration for the call manager.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// Remote candidates received before the remote description is applied
    /// are buffered up to this many entries; beyond it the oldest is dropped.
    pub candidate_buffer_limit: usize,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            candidate_buffer_limit: 64,
        }
    }
}

/// Parameters for [`CallManager::start_call`]. One of `peer_id` and
/// `phone_number` must be set.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub peer_id: Option<String>,
    pub phone_number: Option<String>,
    pub mode: CallMode,
}

/// Immutable view of the call state, published to subscribers on every
/// mutation. Consumers must not mutate the shared streams.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub session: Option<CallSession>,
    pub incoming: Option<IncomingOffer>,
    pub invite_hint: Option<InviteHint>,
    /// True while an outbound invite awaits the remote answer.
    pub pending: bool,
    pub remote_stream: Arc<RemoteMediaStream>,
}

enum CallTarget {
    User(String),
    Phone(String),
}

#[derive(Default)]
struct CallContext {
    session: Option<CallSession>,
    incoming: Option<IncomingOffer>,
    invite_hint: Option<InviteHint>,
    pending: bool,
    local_stream: Option<LocalMediaStream>,
    pending_remote_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
}

/// Orchestrates call establishment, negotiation, and teardown.
///
/// One instance per signed-in session, owned by the application's
/// composition root with its collaborators injected. At most one call
/// session and one peer connection are live at any time; starting a new
/// call closes the previous connection first.
pub struct CallManager {
    config: CallManagerConfig,
    signaling: Arc<dyn SignalingApi>,
    media: Arc<dyn MediaSource>,
    peers: PeerManager,
    ctx: Mutex<CallContext>,
    remote_stream: StdMutex<Arc<RemoteMediaStream>>,
    snapshot_tx: watch::Sender<CallSnapshot>,
    peer_events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl CallManager {
    /// Create a new call manager. Must be called within a tokio runtime;
    /// the peer-event loop is spawned here.
    pub fn new(
        config: CallManagerConfig,
        signaling: Arc<dyn SignalingApi>,
        ice_resolver: Arc<dyn IceServerResolver>,
        peer_factory: Arc<dyn PeerFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Arc<Self> {
        let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();
        let remote_stream = Arc::new(RemoteMediaStream::new());
        let (snapshot_tx, _) = watch::channel(CallSnapshot {
            session: None,
            incoming: None,
            invite_hint: None,
            pending: false,
            remote_stream: remote_stream.clone(),
        });

        let manager = Arc::new(Self {
            config,
            signaling,
            media,
            peers: PeerManager::new(peer_factory, ice_resolver),
            ctx: Mutex::new(CallContext::default()),
            remote_stream: StdMutex::new(remote_stream),
            snapshot_tx,
            peer_events_tx,
        });

        Self::spawn_peer_event_loop(&manager, peer_events_rx);
        manager
    }

    /// Subscribe to call state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// The persistent remote-stream container of the current session.
    pub fn remote_stream(&self) -> Arc<RemoteMediaStream> {
        self.remote_stream.lock().unwrap().clone()
    }

    pub async fn session(&self) -> Option<CallSession> {
        self.ctx.lock().await.session.clone()
    }

    pub async fn has_active_call(&self) -> bool {
        self.ctx
            .lock()
            .await
            .session
            .as_ref()
            .is_some_and(|s| s.phase.is_active())
    }

    pub async fn is_ringing(&self) -> bool {
        self.ctx.lock().await.incoming.is_some()
    }

    // ==================== Outbound ====================

    /// Start a call to an existing user or a bare phone number.
    pub async fn start_call(&self, request: CallRequest) -> Result<CallSession, CallError> {
        if let Some(peer_id) = request.peer_id {
            self.start_call_by_user(peer_id, request.mode).await
        } else if let Some(number) = request.phone_number {
            self.start_call_by_phone(number, request.mode).await
        } else {
            Err(CallError::InvalidArgument(
                "a peer id or phone number is required",
            ))
        }
    }

    pub async fn start_call_by_user(
        &self,
        peer_id: impl Into<String>,
        mode: CallMode,
    ) -> Result<CallSession, CallError> {
        let peer_id = peer_id.into();
        if peer_id.is_empty() {
            return Err(CallError::InvalidArgument("peer id must not be empty"));
        }
        self.start_outbound(CallTarget::User(peer_id), mode).await
    }

    pub async fn start_call_by_phone(
        &self,
        phone_number: impl Into<String>,
        mode: CallMode,
    ) -> Result<CallSession, CallError> {
        self.start_outbound(CallTarget::Phone(phone_number.into()), mode)
            .await
    }

    async fn start_outbound(
        &self,
        target: CallTarget,
        mode: CallMode,
    ) -> Result<CallSession, CallError> {
        {
            let mut ctx = self.ctx.lock().await;
            ctx.invite_hint = None;
            ctx.pending = true;
            ctx.remote_description_set = false;
            ctx.pending_remote_candidates.clear();

            let mut session = CallSession::new_outbound(mode);
            match &target {
                CallTarget::User(id) => session.peer_id = Some(id.clone()),
                CallTarget::Phone(number) => session.phone_number = Some(number.clone()),
            }
            info!(
                "starting {} call ({})",
                mode,
                match &target {
                    CallTarget::User(id) => format!("user {}", id),
                    CallTarget::Phone(number) => format!("phone {}", number),
                }
            );
            ctx.session = Some(session);
            self.publish_locked(&ctx);
        }

        match self.dial(target, mode).await {
            Ok(session) => Ok(session),
            Err(err) => {
                warn!("call setup failed: {}", err);
                self.cleanup().await;
                Err(err)
            }
        }
    }

    async fn dial(&self, target: CallTarget, mode: CallMode) -> Result<CallSession, CallError> {
        let peer = self.peers.create_peer(self.peer_events_tx.clone()).await?;

        let stream = self
            .media
            .acquire(MediaConstraints::for_mode(mode))
            .await?;
        let tracks = stream.tracks().to_vec();
        self.ctx.lock().await.local_stream = Some(stream);

        for track in tracks {
            peer.add_track(track).await?;
        }

        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;

        let request = match &target {
            CallTarget::User(id) => InviteRequest {
                callee_id: Some(id.clone()),
                phone_number: None,
                mode,
                offer,
            },
            CallTarget::Phone(number) => InviteRequest {
                callee_id: None,
                phone_number: Some(number.clone()),
                mode,
                offer,
            },
        };
        let response = self.signaling.invite(request).await?;

        let mut ctx = self.ctx.lock().await;
        let session = ctx.session.as_mut().ok_or(CallError::NotActive)?;
        session.register_invite_ack(
            response.call_id.clone(),
            response.peer_id.clone(),
            response.phone_number.clone(),
        );
        info!("invite acknowledged for call {}", response.call_id);

        if let Some(hint) = invite_hint_from(&response) {
            debug!("call {} requires an out-of-band invite", response.call_id);
            ctx.invite_hint = Some(hint);
        }

        let session = ctx.session.as_ref().cloned().unwrap();
        self.publish_locked(&ctx);
        Ok(session)
    }

    // ==================== Inbound ====================

    /// Accept the pending incoming offer, honoring the offer's mode for
    /// media capture. Returns `Ok(None)` when nothing is pending.
    pub async fn accept_call(&self) -> Result<Option<CallSession>, CallError> {
        let offer = { self.ctx.lock().await.incoming.clone() };
        let Some(offer) = offer else {
            debug!("accept_call with no pending incoming offer");
            return Ok(None);
        };

        info!("accepting {} call {}", offer.mode, offer.call_id);
        match self.do_accept(&offer).await {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!("call accept failed: {}", err);
                self.cleanup().await;
                Err(err)
            }
        }
    }

    async fn do_accept(&self, offer: &IncomingOffer) -> Result<CallSession, CallError> {
        let peer = self.peers.create_peer(self.peer_events_tx.clone()).await?;

        let stream = self
            .media
            .acquire(MediaConstraints::for_mode(offer.mode))
            .await?;
        let tracks = stream.tracks().to_vec();
        self.ctx.lock().await.local_stream = Some(stream);

        for track in tracks {
            peer.add_track(track).await?;
        }

        peer.set_remote_description(offer.offer.clone()).await?;
        self.flush_buffered_candidates(&peer).await;

        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;

        self.signaling
            .answer(AnswerRequest {
                call_id: offer.call_id.clone(),
                answer,
            })
            .await?;

        let mut ctx = self.ctx.lock().await;
        let mut session =
            CallSession::new_inbound(offer.call_id.clone(), offer.from.id.clone(), offer.mode);
        session.apply_transition(CallTransition::LocalAccepted)?;
        ctx.session = Some(session);
        ctx.incoming = None;
        ctx.pending = false;

        let session = ctx.session.as_ref().cloned().unwrap();
        self.publish_locked(&ctx);
        Ok(session)
    }

    /// Decline the pending incoming offer without setting up any media.
    /// No-op when nothing is pending.
    pub async fn reject_call(&self) {
        let offer = { self.ctx.lock().await.incoming.take() };
        let Some(offer) = offer else {
            debug!("reject_call with no pending incoming offer");
            return;
        };

        info!("rejecting call {}", offer.call_id);
        self.send_end(offer.call_id, Some(EndReason::Rejected)).await;

        let mut ctx = self.ctx.lock().await;
        if ctx.session.as_ref().is_some_and(|s| s.phase.is_ringing()) {
            ctx.session = None;
        }
        ctx.pending = false;
        self.publish_locked(&ctx);
    }

    // ==================== Teardown ====================

    /// End the current call (active or ringing). No-op when idle. The `end`
    /// request is best-effort; cleanup always runs.
    pub async fn end_call(&self, reason: Option<EndReason>) {
        let reason = reason.unwrap_or(EndReason::Hangup);
        let call_id = {
            let ctx = self.ctx.lock().await;
            ctx.session
                .as_ref()
                .and_then(|s| s.call_id.clone())
                .or_else(|| ctx.incoming.as_ref().map(|offer| offer.call_id.clone()))
        };
        let Some(call_id) = call_id else {
            debug!("end_call with no active or ringing call");
            return;
        };

        self.send_end(call_id, Some(reason)).await;
        self.cleanup_with_reason(reason).await;
    }

    /// Release every resource of the current session and return to idle.
    /// Idempotent; safe to call with no live session or peer connection.
    pub async fn cleanup(&self) {
        self.cleanup_with_reason(EndReason::Hangup).await;
    }

    async fn cleanup_with_reason(&self, reason: EndReason) {
        let (local_stream, session) = {
            let mut ctx = self.ctx.lock().await;
            let local_stream = ctx.local_stream.take();
            let session = ctx.session.take();
            ctx.incoming = None;
            ctx.invite_hint = None;
            ctx.pending = false;
            ctx.pending_remote_candidates.clear();
            ctx.remote_description_set = false;
            (local_stream, session)
        };

        if let Some(mut session) = session {
            match session.apply_transition(CallTransition::Terminated { reason }) {
                Ok(()) => {
                    if let CallPhase::Ended {
                        duration_secs: Some(secs),
                        ..
                    } = session.phase
                    {
                        info!(
                            "call {} ended after {}s ({:?})",
                            session
                                .call_id
                                .as_ref()
                                .map(CallId::as_str)
                                .unwrap_or("<unassigned>"),
                            secs,
                            reason
                        );
                    } else {
                        debug!("call torn down before becoming active ({:?})", reason);
                    }
                }
                Err(e) => debug!("session already terminal during cleanup: {}", e),
            }
        }

        if let Some(stream) = local_stream {
            debug!("stopping {} local tracks", stream.tracks().len());
            stream.stop_all();
        }

        if let Some(peer) = self.peers.current().await {
            for track in peer.sender_tracks() {
                track.stop();
            }
        }
        self.peers.close_current().await;

        {
            let mut slot = self.remote_stream.lock().unwrap();
            *slot = Arc::new(RemoteMediaStream::new());
        }

        let ctx = self.ctx.lock().await;
        self.publish_locked(&ctx);
    }

    // ==================== Push events ====================

    /// Feed one inbound push event into the state machine. Events may
    /// interleave arbitrarily with in-flight start/accept sequences.
    pub async fn handle_push(&self, event: CallPush) {
        match event {
            CallPush::Incoming {
                call_id,
                from_user,
                mode,
                offer,
            } => {
                debug!("incoming {} call {} from {}", mode, call_id, from_user.id);
                self.handle_incoming(call_id, from_user, mode, offer).await;
            }
            CallPush::Answer { call_id, answer } => {
                debug!("remote answer for call {}", call_id);
                self.handle_answer(call_id, answer).await;
            }
            CallPush::Candidate { candidate } => {
                self.handle_remote_candidate(candidate).await;
            }
            CallPush::Ended { reason } => {
                info!(
                    "call ended by remote ({})",
                    reason.as_deref().unwrap_or("no reason")
                );
                self.cleanup_with_reason(EndReason::Remote).await;
            }
        }
    }

    /// Drive the manager from an opaque push channel.
    pub fn spawn_push_loop(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<CallPush>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.handle_push(event).await;
            }
        });
    }

    async fn handle_incoming(
        &self,
        call_id: CallId,
        from: UserRef,
        mode: CallMode,
        offer: SessionDescription,
    ) {
        let mut ctx = self.ctx.lock().await;
        if ctx.session.is_some() {
            warn!("incoming call {} while another call is in progress", call_id);
        } else {
            ctx.session = Some(CallSession::new_inbound(
                call_id.clone(),
                from.id.clone(),
                mode,
            ));
        }
        ctx.incoming = Some(IncomingOffer {
            call_id,
            from,
            mode,
            offer,
            received_at: Utc::now(),
        });
        self.publish_locked(&ctx);
    }

    async fn handle_answer(&self, call_id: CallId, answer: SessionDescription) {
        // Guard on peer existence, not on exact session state: the answer
        // may race ahead of the invite-response bookkeeping.
        let Some(peer) = self.peers.current().await else {
            debug!("remote answer with no peer connection, ignoring");
            return;
        };

        if let Err(e) = peer.set_remote_description(answer).await {
            warn!("failed to apply remote answer (ignored): {}", e);
        }
        self.flush_buffered_candidates(&peer).await;

        let mut ctx = self.ctx.lock().await;
        match ctx.session.as_mut() {
            Some(session) => {
                if session.call_id.is_none() {
                    session.call_id = Some(call_id);
                }
                if session.phase.is_dialing()
                    && let Err(e) = session.apply_transition(CallTransition::RemoteAnswered)
                {
                    debug!("remote answer in unexpected phase: {}", e);
                }
            }
            None => {
                // The dial bookkeeping has not registered the session yet;
                // record the call id so teardown can address it.
                debug!("registering session from early remote answer");
                let mut session = CallSession::new_outbound(CallMode::Audio);
                session.call_id = Some(call_id);
                let _ = session.apply_transition(CallTransition::RemoteAnswered);
                ctx.session = Some(session);
            }
        }
        ctx.pending = false;
        self.publish_locked(&ctx);
    }

    async fn handle_remote_candidate(&self, candidate: IceCandidate) {
        let Some(peer) = self.peers.current().await else {
            debug!("remote candidate with no peer connection, ignoring");
            return;
        };

        let to_apply = {
            let mut ctx = self.ctx.lock().await;
            if ctx.remote_description_set {
                Some(candidate)
            } else {
                if ctx.pending_remote_candidates.len() >= self.config.candidate_buffer_limit {
                    warn!("remote candidate buffer full, dropping oldest");
                    ctx.pending_remote_candidates.remove(0);
                }
                ctx.pending_remote_candidates.push(candidate);
                None
            }
        };

        if let Some(candidate) = to_apply
            && let Err(e) = peer.add_ice_candidate(candidate).await
        {
            debug!("remote candidate rejected (ignored): {}", e);
        }
    }

    /// Apply candidates that arrived before the remote description, now that
    /// it is set. Failures are swallowed like direct adds.
    async fn flush_buffered_candidates(&self, peer: &Arc<dyn PeerHandle>) {
        let pending = {
            let mut ctx = self.ctx.lock().await;
            ctx.remote_description_set = true;
            std::mem::take(&mut ctx.pending_remote_candidates)
        };
        if pending.is_empty() {
            return;
        }
        debug!("flushing {} buffered remote candidates", pending.len());
        for candidate in pending {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                debug!("buffered remote candidate rejected (ignored): {}", e);
            }
        }
    }

    // ==================== Media controls ====================

    /// Mute or unmute the local microphone. No-op outside an active call.
    pub async fn set_audio_muted(&self, muted: bool) {
        self.toggle_track(TrackKind::Audio, muted).await;
    }

    /// Turn the local camera off or on. No-op outside an active call.
    pub async fn set_video_off(&self, off: bool) {
        self.toggle_track(TrackKind::Video, off).await;
    }

    async fn toggle_track(&self, kind: TrackKind, disabled: bool) {
        let mut ctx = self.ctx.lock().await;
        let Some(session) = ctx.session.as_mut() else {
            return;
        };
        let transition = match kind {
            TrackKind::Audio => CallTransition::AudioMuteChanged { muted: disabled },
            TrackKind::Video => CallTransition::VideoStateChanged { off: disabled },
        };
        if let Err(e) = session.apply_transition(transition) {
            debug!("{} toggle outside active call: {}", kind, e);
            return;
        }
        if let Some(stream) = &ctx.local_stream {
            for track in stream.tracks() {
                if track.kind() == kind {
                    track.set_enabled(!disabled);
                }
            }
        }
        self.publish_locked(&ctx);
    }

    // ==================== Internal plumbing ====================

    fn spawn_peer_event_loop(this: &Arc<Self>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.handle_peer_event(event).await;
            }
        });
    }

    async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                // Address with whatever call the session machinery can
                // resolve right now; without a call id the candidate is
                // dropped rather than queued.
                let routing = {
                    let ctx = self.ctx.lock().await;
                    if let Some(session) = &ctx.session
                        && let Some(call_id) = &session.call_id
                    {
                        Some((call_id.clone(), session.peer_id.clone()))
                    } else if let Some(offer) = &ctx.incoming {
                        Some((offer.call_id.clone(), Some(offer.from.id.clone())))
                    } else {
                        None
                    }
                };
                let Some((call_id, to_user_id)) = routing else {
                    debug!("discarding local candidate with no routable call");
                    return;
                };
                let request = CandidateRequest {
                    call_id,
                    to_user_id,
                    candidate,
                };
                if let Err(e) = self.signaling.candidate(request).await {
                    debug!("candidate submission failed (ignored): {}", e);
                }
            }
            PeerEvent::RemoteTrack(track) => {
                let stream = self.remote_stream();
                if stream.add_track(track.clone()) {
                    debug!("remote {} track {} added", track.kind(), track.id());
                    let ctx = self.ctx.lock().await;
                    self.publish_locked(&ctx);
                }
            }
        }
    }

    /// One attempt, failure discarded: the call proceeds or is already
    /// tearing down regardless of whether the service heard the `end`.
    async fn send_end(&self, call_id: CallId, reason: Option<EndReason>) {
        let request = EndRequest {
            call_id,
            reason: reason.map(|r| r.as_str().to_string()),
        };
        if let Err(e) = self.signaling.end(request).await {
            debug!("end request failed (ignored): {}", e);
        }
    }

    fn publish_locked(&self, ctx: &CallContext) {
        self.snapshot_tx.send_replace(CallSnapshot {
            session: ctx.session.clone(),
            incoming: ctx.incoming.clone(),
            invite_hint: ctx.invite_hint.clone(),
            pending: ctx.pending,
            remote_stream: self.remote_stream(),
        });
    }
}

fn invite_hint_from(response: &InviteResponse) -> Option<InviteHint> {
    if response.requires_invite.is_none() && response.invite_url.is_none() {
        return None;
    }
    Some(InviteHint {
        requires_invite: response.requires_invite.unwrap_or(false),
        invite_url: response.invite_url.clone(),
    })
}
