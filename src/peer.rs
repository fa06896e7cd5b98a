//! Peer-connection ownership and the narrow vendor contract.
//!
//! The native WebRTC surface is reduced to [`PeerHandle`]/[`PeerFactory`] so
//! the orchestrator can run against fakes. Callbacks from the native stack
//! do not touch shared state directly; they enqueue [`PeerEvent`]s that the
//! orchestrator consumes on its own control loop.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::error::CallError;
use crate::ice::{IceServer, IceServerResolver};
use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::{IceCandidate, SessionDescription};

/// Messages produced by a live peer connection.
pub enum PeerEvent {
    /// A local ICE candidate was discovered and should be forwarded to the
    /// remote peer via signaling.
    LocalCandidate(IceCandidate),
    /// A remote track arrived and should be accumulated into the remote
    /// stream.
    RemoteTrack(Arc<dyn RemoteTrack>),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(&c.candidate).finish(),
            Self::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.id()).finish(),
        }
    }
}

/// The narrow surface the orchestrator needs from a native peer connection.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), CallError>;
    /// Tracks attached to this connection's senders, for cleanup.
    fn sender_tracks(&self) -> Vec<Arc<dyn LocalTrack>>;
    /// Close must be safe to call any number of times and never fail.
    async fn close(&self);
}

/// Constructs peer connections. Implemented by the production engine
/// ([`crate::rtc::RtcPeerFactory`]) and by test fakes.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, CallError>;
}

/// Owns the single live peer connection of the current session.
pub struct PeerManager {
    factory: Arc<dyn PeerFactory>,
    resolver: Arc<dyn IceServerResolver>,
    current: Mutex<Option<Arc<dyn PeerHandle>>>,
}

impl PeerManager {
    pub fn new(factory: Arc<dyn PeerFactory>, resolver: Arc<dyn IceServerResolver>) -> Self {
        Self {
            factory,
            resolver,
            current: Mutex::new(None),
        }
    }

    /// Create a new peer connection, closing any previous one first.
    ///
    /// An ice-server fetch failure aborts the attempt; nothing replaces the
    /// (already closed) previous connection in that case.
    pub async fn create_peer(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, CallError> {
        self.close_current().await;

        let ice_servers = self.resolver.resolve_ice_servers().await?;
        debug!("creating peer connection with {} ice servers", ice_servers.len());

        let peer = self.factory.create(ice_servers, events).await?;
        *self.current.lock().await = Some(peer.clone());
        Ok(peer)
    }

    pub async fn current(&self) -> Option<Arc<dyn PeerHandle>> {
        self.current.lock().await.clone()
    }

    /// Close and discard the live connection, if any. Idempotent.
    pub async fn close_current(&self) {
        if let Some(peer) = self.current.lock().await.take() {
            debug!("closing previous peer connection");
            peer.close().await;
        }
    }
}
