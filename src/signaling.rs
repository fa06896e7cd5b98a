//! Signaling wire types and the outbound signaling contract.
//!
//! Outbound actions are request/response calls against the platform's call
//! API; inbound events arrive over the realtime push channel. The transport
//! behind either direction is the embedder's concern — [`SignalingApi`] is
//! the seam, [`crate::rest::RestSignaling`] the reference implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::types::{CallId, CallMode, UserRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network path proposed by one peer for the media connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub mode: CallMode,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_invite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub call_id: CallId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRequest {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outbound signaling actions.
///
/// Every method is a single attempt; the orchestrator decides which failures
/// are fatal (invite, answer) and which are discarded (candidate, end).
#[async_trait]
pub trait SignalingApi: Send + Sync {
    async fn invite(&self, request: InviteRequest) -> Result<InviteResponse, CallError>;
    async fn answer(&self, request: AnswerRequest) -> Result<(), CallError>;
    async fn candidate(&self, request: CandidateRequest) -> Result<(), CallError>;
    async fn end(&self, request: EndRequest) -> Result<(), CallError>;
}

/// Inbound push events. Delivery is FIFO within the push direction only; no
/// ordering holds between pushes and request responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum CallPush {
    #[serde(rename = "call:incoming", rename_all = "camelCase")]
    Incoming {
        call_id: CallId,
        from_user: UserRef,
        mode: CallMode,
        offer: SessionDescription,
    },
    #[serde(rename = "call:answer", rename_all = "camelCase")]
    Answer {
        call_id: CallId,
        answer: SessionDescription,
    },
    #[serde(rename = "call:candidate", rename_all = "camelCase")]
    Candidate { candidate: IceCandidate },
    #[serde(rename = "call:ended", rename_all = "camelCase")]
    Ended {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_request_omits_absent_identifiers() {
        let request = InviteRequest {
            callee_id: None,
            phone_number: Some("+15551230000".into()),
            mode: CallMode::Audio,
            offer: SessionDescription::offer("v=0"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("calleeId"));
        assert!(json.contains("\"phoneNumber\":\"+15551230000\""));
        assert!(json.contains("\"mode\":\"audio\""));
        assert!(json.contains("\"type\":\"offer\""));
    }

    #[test]
    fn test_invite_response_optional_fields_default() {
        let response: InviteResponse =
            serde_json::from_str(r#"{"callId":"call-9"}"#).unwrap();
        assert_eq!(response.call_id.as_str(), "call-9");
        assert!(response.peer_id.is_none());
        assert!(response.requires_invite.is_none());
    }

    #[test]
    fn test_candidate_wire_shape() {
        let request = CandidateRequest {
            call_id: CallId::new("call-9"),
            to_user_id: Some("42".into()),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.2 54400 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"toUserId\":\"42\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
    }

    #[test]
    fn test_push_events_parse() {
        let incoming: CallPush = serde_json::from_str(
            r#"{"event":"call:incoming","callId":"call-3","fromUser":{"id":"7"},"mode":"video","offer":{"type":"offer","sdp":"v=0"}}"#,
        )
        .unwrap();
        match incoming {
            CallPush::Incoming {
                call_id,
                from_user,
                mode,
                offer,
            } => {
                assert_eq!(call_id.as_str(), "call-3");
                assert_eq!(from_user.id, "7");
                assert_eq!(mode, CallMode::Video);
                assert_eq!(offer.kind, SdpType::Offer);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let ended: CallPush = serde_json::from_str(r#"{"event":"call:ended"}"#).unwrap();
        assert!(matches!(ended, CallPush::Ended { reason: None }));
    }
}
