//! Fake collaborators for driving the call manager without devices or
//! network. Used by this crate's tests and available to embedders.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::error::CallError;
use crate::ice::{IceServer, IceServerResolver};
use crate::media::{
    LocalMediaStream, LocalTrack, MediaConstraints, MediaSource, RemoteTrack, TrackKind, random_id,
};
use crate::peer::{PeerEvent, PeerFactory, PeerHandle};
use crate::signaling::{
    AnswerRequest, CandidateRequest, EndRequest, IceCandidate, InviteRequest, InviteResponse,
    SessionDescription, SignalingApi,
};
use crate::types::CallId;

// ==================== Media ====================

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    stopped: AtomicBool,
    enabled: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: random_id(kind.as_str()),
            kind,
            stopped: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }
}

impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct FakeRemoteTrack {
    id: String,
    kind: TrackKind,
}

impl FakeRemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

impl RemoteTrack for FakeRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }
}

/// Media source returning stoppable fake tracks.
#[derive(Default)]
pub struct FakeMediaSource {
    pub requests: StdMutex<Vec<MediaConstraints>>,
    pub streams: StdMutex<Vec<LocalMediaStream>>,
    pub fail: AtomicBool,
}

impl FakeMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_stream(&self) -> Option<LocalMediaStream> {
        self.streams.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, CallError> {
        self.requests.lock().unwrap().push(constraints);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::Media("permission denied".into()));
        }
        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(FakeTrack::new(TrackKind::Audio)));
        }
        if constraints.video {
            tracks.push(Arc::new(FakeTrack::new(TrackKind::Video)));
        }
        let stream = LocalMediaStream::new(random_id("stream"), tracks);
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

// ==================== ICE ====================

pub struct StaticIceResolver {
    pub servers: Vec<IceServer>,
    pub fail: AtomicBool,
}

impl StaticIceResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            servers: vec![IceServer::stun("stun:stun.example.com:3478")],
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl IceServerResolver for StaticIceResolver {
    async fn resolve_ice_servers(&self) -> Result<Vec<IceServer>, CallError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::IceServers("fetch failed".into()));
        }
        Ok(self.servers.clone())
    }
}

// ==================== Signaling ====================

/// Records every outbound request; failures are injected per action.
#[derive(Default)]
pub struct FakeSignaling {
    pub invites: StdMutex<Vec<InviteRequest>>,
    pub answers: StdMutex<Vec<AnswerRequest>>,
    pub candidates: StdMutex<Vec<CandidateRequest>>,
    pub ends: StdMutex<Vec<EndRequest>>,
    pub next_invite_response: StdMutex<Option<InviteResponse>>,
    pub fail_invite: AtomicBool,
    pub fail_answer: AtomicBool,
    pub fail_candidate: AtomicBool,
    pub fail_end: AtomicBool,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_invite_response(&self, response: InviteResponse) {
        *self.next_invite_response.lock().unwrap() = Some(response);
    }
}

#[async_trait]
impl SignalingApi for FakeSignaling {
    async fn invite(&self, request: InviteRequest) -> Result<InviteResponse, CallError> {
        self.invites.lock().unwrap().push(request.clone());
        if self.fail_invite.load(Ordering::SeqCst) {
            return Err(CallError::Signaling("invite rejected".into()));
        }
        if let Some(response) = self.next_invite_response.lock().unwrap().take() {
            return Ok(response);
        }
        Ok(InviteResponse {
            call_id: CallId::new("call-1"),
            peer_id: request.callee_id,
            phone_number: request.phone_number,
            requires_invite: None,
            invite_url: None,
        })
    }

    async fn answer(&self, request: AnswerRequest) -> Result<(), CallError> {
        self.answers.lock().unwrap().push(request);
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(CallError::Signaling("answer rejected".into()));
        }
        Ok(())
    }

    async fn candidate(&self, request: CandidateRequest) -> Result<(), CallError> {
        self.candidates.lock().unwrap().push(request);
        if self.fail_candidate.load(Ordering::SeqCst) {
            return Err(CallError::Signaling("candidate rejected".into()));
        }
        Ok(())
    }

    async fn end(&self, request: EndRequest) -> Result<(), CallError> {
        self.ends.lock().unwrap().push(request);
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(CallError::Signaling("end rejected".into()));
        }
        Ok(())
    }
}

// ==================== Peer ====================

/// Scripted peer connection recording every operation.
#[derive(Default)]
pub struct FakePeer {
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    pub local_descriptions: StdMutex<Vec<SessionDescription>>,
    pub remote_descriptions: StdMutex<Vec<SessionDescription>>,
    pub added_candidates: StdMutex<Vec<IceCandidate>>,
    pub tracks: StdMutex<Vec<Arc<dyn LocalTrack>>>,
    pub close_calls: AtomicUsize,
    pub fail_offer: AtomicBool,
    pub fail_remote_description: AtomicBool,
    pub fail_candidates: AtomicBool,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.close_calls.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(CallError::Peer("offer failed".into()));
        }
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.local_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(CallError::Peer("remote description rejected".into()));
        }
        self.remote_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        if self.fail_candidates.load(Ordering::SeqCst) {
            return Err(CallError::Peer("candidate rejected".into()));
        }
        self.added_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), CallError> {
        self.tracks.lock().unwrap().push(track);
        Ok(())
    }

    fn sender_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`FakePeer`]s and exposes the event sender wired into the
/// latest one, so tests can inject candidates and remote tracks.
#[derive(Default)]
pub struct FakePeerFactory {
    pub created: StdMutex<Vec<Arc<FakePeer>>>,
    pub events: StdMutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    pub fail_create: AtomicBool,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.created.lock().unwrap().last().cloned()
    }

    pub fn event_sender(&self) -> Option<mpsc::UnboundedSender<PeerEvent>> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice_servers: Vec<IceServer>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, CallError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::Peer("create failed".into()));
        }
        *self.events.lock().unwrap() = Some(events);
        let peer = Arc::new(FakePeer::default());
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}
