//! Reference HTTP implementation of the signaling contract.
//!
//! The call API is a set of JSON POST endpoints plus one GET for ice
//! servers. `ureq` is blocking, so every request runs inside
//! `tokio::task::spawn_blocking`. Session authentication is carried by
//! whatever default headers the embedder configures (typically the session
//! cookie); this crate does not manage it.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CallError;
use crate::ice::{IceServer, IceServerResolver, IceServersResponse};
use crate::signaling::{
    AnswerRequest, CandidateRequest, EndRequest, InviteRequest, InviteResponse, SignalingApi,
};

const INVITE_PATH: &str = "invite";
const ANSWER_PATH: &str = "answer";
const CANDIDATE_PATH: &str = "candidate";
const END_PATH: &str = "end";
const ICE_SERVERS_PATH: &str = "ice-servers";

/// JSON-over-HTTP signaling client.
#[derive(Debug, Clone)]
pub struct RestSignaling {
    base_url: String,
    headers: Vec<(String, String)>,
}

impl RestSignaling {
    /// `base_url` points at the call API root, e.g.
    /// `https://chat.example.com/api/v1/calls`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: Vec::new(),
        }
    }

    /// Attach a default header to every request (session cookie, tenant id).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Vec<u8>, CallError> {
        let url = self.url_for(path);
        let headers = self.headers.clone();
        let payload =
            serde_json::to_vec(body).map_err(|e| CallError::Signaling(e.to_string()))?;

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            let mut request = ureq::post(&url).header("content-type", "application/json");
            for (name, value) in &headers {
                request = request.header(name, value);
            }
            let response = request.send(&payload[..])?;
            let mut body = response.into_body();
            Ok(body.read_to_vec()?)
        })
        .await
        .map_err(|e| CallError::Signaling(format!("request task failed: {}", e)))?
        .map_err(|e| CallError::Signaling(e.to_string()))
    }

    async fn post_for<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, CallError> {
        let bytes = self.post_json(path, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CallError::Signaling(format!("invalid response payload: {}", e)))
    }
}

#[async_trait]
impl SignalingApi for RestSignaling {
    async fn invite(&self, request: InviteRequest) -> Result<InviteResponse, CallError> {
        self.post_for(INVITE_PATH, &request).await
    }

    async fn answer(&self, request: AnswerRequest) -> Result<(), CallError> {
        self.post_json(ANSWER_PATH, &request).await.map(|_| ())
    }

    async fn candidate(&self, request: CandidateRequest) -> Result<(), CallError> {
        self.post_json(CANDIDATE_PATH, &request).await.map(|_| ())
    }

    async fn end(&self, request: EndRequest) -> Result<(), CallError> {
        self.post_json(END_PATH, &request).await.map(|_| ())
    }
}

#[async_trait]
impl IceServerResolver for RestSignaling {
    async fn resolve_ice_servers(&self) -> Result<Vec<IceServer>, CallError> {
        let url = self.url_for(ICE_SERVERS_PATH);
        let headers = self.headers.clone();

        let bytes = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            let mut request = ureq::get(&url);
            for (name, value) in &headers {
                request = request.header(name, value);
            }
            let response = request.call()?;
            let mut body = response.into_body();
            Ok(body.read_to_vec()?)
        })
        .await
        .map_err(|e| CallError::IceServers(format!("request task failed: {}", e)))?
        .map_err(|e| CallError::IceServers(e.to_string()))?;

        let response: IceServersResponse = serde_json::from_slice(&bytes)
            .map_err(|e| CallError::IceServers(format!("invalid response payload: {}", e)))?;
        Ok(response.ice_servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_handles_trailing_slash() {
        let client = RestSignaling::new("https://chat.example.com/api/v1/calls/");
        assert_eq!(
            client.url_for(INVITE_PATH),
            "https://chat.example.com/api/v1/calls/invite"
        );
    }
}
