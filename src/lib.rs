//! Call-session signaling and peer-connection lifecycle for the Chatwire
//! messaging platform.
//!
//! This crate establishes, negotiates, and tears down one real-time
//! audio/video session between two parties: offer/answer/candidate exchange
//! against the platform's call API, inbound push events from the realtime
//! channel, and deterministic release of media and peer-connection resources
//! on every exit path.
//!
//! # Architecture
//!
//! - [`CallManager`]: the state machine and public contract — start, accept,
//!   reject, end, cleanup
//! - [`CallSession`] & [`CallPhase`]: call state tracking with explicit
//!   transitions
//! - [`SignalingApi`] & [`CallPush`]: outbound request/response actions and
//!   the four inbound push events
//! - [`peer::PeerHandle`] / [`peer::PeerFactory`]: the narrow vendor surface;
//!   [`rtc`] is the production engine over the `webrtc` crate
//! - [`media::MediaSource`]: local capture acquisition behind a trait seam
//! - [`rest::RestSignaling`]: reference JSON-over-HTTP signaling client
//! - [`testing`]: fake collaborators for tests and embedders
//!
//! Consumers subscribe to [`CallSnapshot`]s and read them as immutable
//! views; all mutation goes through the manager.

pub mod error;
pub mod ice;
pub mod manager;
pub mod media;
pub mod peer;
pub mod rest;
pub mod rtc;
pub mod signaling;
pub mod state;
pub mod testing;
pub mod types;


pub use error::CallError;
pub use ice::{IceServer, IceServerResolver};
pub use manager::{CallManager, CallManagerConfig, CallRequest, CallSnapshot};
pub use media::{LocalMediaStream, MediaConstraints, MediaSource, RemoteMediaStream, TrackKind};
pub use signaling::{
    AnswerRequest, CallPush, CandidateRequest, EndRequest, IceCandidate, InviteRequest,
    InviteResponse, SdpType, SessionDescription, SignalingApi,
};
pub use state::{
    CallPhase, CallSession, CallTransition, IncomingOffer, InvalidTransition, InviteHint,
};
pub use types::{CallDirection, CallId, CallMode, EndReason, UserRef};
