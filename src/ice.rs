//! ICE server resolution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// A STUN or TURN server entry as returned by the call API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Response payload of the ice-server fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Fetches the relay/stun server list for the current session.
///
/// One fetch, no retry. A failure here aborts the call attempt.
#[async_trait]
pub trait IceServerResolver: Send + Sync {
    async fn resolve_ice_servers(&self) -> Result<Vec<IceServer>, CallError>;
}
