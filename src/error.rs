//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("media acquisition failed: {0}")]
    Media(String),

    #[error("ice server resolution failed: {0}")]
    IceServers(String),

    #[error("signaling request failed: {0}")]
    Signaling(String),

    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] crate::state::InvalidTransition),

    #[error("call is no longer active")]
    NotActive,
}
