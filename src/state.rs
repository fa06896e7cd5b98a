//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::signaling::SessionDescription;
use crate::types::{CallDirection, CallId, CallMode, EndReason, UserRef};

/// Current phase of a call session.
#[derive(Debug, Clone, Serialize)]
pub enum CallPhase {
    /// Outbound call: invite sent (or being sent), waiting for the remote answer.
    Dialing { started_at: DateTime<Utc> },
    /// Inbound call: offer received, ringing locally.
    Ringing { received_at: DateTime<Utc> },
    /// Negotiation finished, media flowing (or about to).
    Active {
        connected_at: DateTime<Utc>,
        audio_muted: bool,
        video_off: bool,
    },
    /// Call over. Sessions in this phase are discarded by cleanup.
    Ended {
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallPhase {
    pub fn is_dialing(&self) -> bool {
        matches!(self, Self::Dialing { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }
}

/// State transitions applied to a session.
#[derive(Debug, Clone)]
pub enum CallTransition {
    RemoteAnswered,
    LocalAccepted,
    Terminated { reason: EndReason },
    AudioMuteChanged { muted: bool },
    VideoStateChanged { off: bool },
}

/// One logical call. At most one session is live at any time.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    /// Assigned by the signaling service once the invite is acknowledged;
    /// present from the start for inbound calls.
    pub call_id: Option<CallId>,
    /// Absent when dialing a bare phone number before resolution.
    pub peer_id: Option<String>,
    pub phone_number: Option<String>,
    pub mode: CallMode,
    pub direction: CallDirection,
    pub phase: CallPhase,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new_outbound(mode: CallMode) -> Self {
        Self {
            call_id: None,
            peer_id: None,
            phone_number: None,
            mode,
            direction: CallDirection::Outbound,
            phase: CallPhase::Dialing {
                started_at: Utc::now(),
            },
            created_at: Utc::now(),
        }
    }

    pub fn new_inbound(call_id: CallId, peer_id: impl Into<String>, mode: CallMode) -> Self {
        Self {
            call_id: Some(call_id),
            peer_id: Some(peer_id.into()),
            phone_number: None,
            mode,
            direction: CallDirection::Inbound,
            phase: CallPhase::Ringing {
                received_at: Utc::now(),
            },
            created_at: Utc::now(),
        }
    }

    /// Record the identifiers returned by the invite acknowledgment. The
    /// phase stays Dialing; the remote answer makes the session active.
    pub fn register_invite_ack(
        &mut self,
        call_id: CallId,
        peer_id: Option<String>,
        phone_number: Option<String>,
    ) {
        self.call_id = Some(call_id);
        if peer_id.is_some() {
            self.peer_id = peer_id;
        }
        if phone_number.is_some() {
            self.phone_number = phone_number;
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == CallDirection::Outbound
    }

    /// Apply a state transition. Returns an error if the transition is not
    /// legal from the current phase.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_phase = match (&self.phase, transition) {
            (CallPhase::Dialing { .. }, CallTransition::RemoteAnswered) => CallPhase::Active {
                connected_at: Utc::now(),
                audio_muted: false,
                video_off: !self.mode.wants_video(),
            },
            (CallPhase::Ringing { .. }, CallTransition::LocalAccepted) => CallPhase::Active {
                connected_at: Utc::now(),
                audio_muted: false,
                video_off: !self.mode.wants_video(),
            },
            (
                CallPhase::Dialing { .. } | CallPhase::Ringing { .. },
                CallTransition::Terminated { reason },
            ) => CallPhase::Ended {
                reason,
                ended_at: Utc::now(),
                duration_secs: None,
            },
            (CallPhase::Active { connected_at, .. }, CallTransition::Terminated { reason }) => {
                let duration = Utc::now()
                    .signed_duration_since(*connected_at)
                    .num_seconds();
                CallPhase::Ended {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (
                CallPhase::Active {
                    connected_at,
                    video_off,
                    ..
                },
                CallTransition::AudioMuteChanged { muted },
            ) => CallPhase::Active {
                connected_at: *connected_at,
                audio_muted: muted,
                video_off: *video_off,
            },
            (
                CallPhase::Active {
                    connected_at,
                    audio_muted,
                    ..
                },
                CallTransition::VideoStateChanged { off },
            ) => CallPhase::Active {
                connected_at: *connected_at,
                audio_muted: *audio_muted,
                video_off: off,
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_phase: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.phase = new_phase;
        Ok(())
    }
}

/// An inbound offer waiting for a local accept or reject decision.
#[derive(Debug, Clone)]
pub struct IncomingOffer {
    pub call_id: CallId,
    pub from: UserRef,
    pub mode: CallMode,
    pub offer: SessionDescription,
    pub received_at: DateTime<Utc>,
}

/// Produced for phone-number calls when the remote party is not a resolvable
/// user and must be invited out of band.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteHint {
    pub requires_invite: bool,
    pub invite_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_phase: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in phase {}",
            self.attempted, self.current_phase
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outbound_call() -> CallSession {
        CallSession::new_outbound(CallMode::Audio)
    }

    fn make_inbound_call() -> CallSession {
        CallSession::new_inbound(CallId::new("call-7f3a"), "42", CallMode::Video)
    }

    /// Full outbound flow: Dialing → Active → Ended.
    #[test]
    fn test_outbound_call_flow() {
        let mut call = make_outbound_call();
        assert!(call.phase.is_dialing());
        assert!(call.call_id.is_none());

        call.register_invite_ack(CallId::new("call-1"), Some("42".into()), None);
        assert!(call.phase.is_dialing(), "invite ack must not activate");
        assert_eq!(call.call_id.as_ref().unwrap().as_str(), "call-1");

        call.apply_transition(CallTransition::RemoteAnswered).unwrap();
        assert!(call.phase.is_active());

        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Hangup,
        })
        .unwrap();
        assert!(call.phase.is_ended());

        if let CallPhase::Ended { duration_secs, .. } = call.phase {
            assert!(duration_secs.is_some());
        }
    }

    /// Full inbound flow: Ringing → Active → Ended.
    #[test]
    fn test_inbound_call_flow() {
        let mut call = make_inbound_call();
        assert!(call.phase.is_ringing());

        call.apply_transition(CallTransition::LocalAccepted).unwrap();
        assert!(call.phase.is_active());

        // Video call starts with video on.
        if let CallPhase::Active { video_off, .. } = call.phase {
            assert!(!video_off);
        }

        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Remote,
        })
        .unwrap();
        assert!(call.phase.is_ended());
    }

    /// A call that never became active records no duration.
    #[test]
    fn test_dialing_terminated_has_no_duration() {
        let mut call = make_outbound_call();
        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Rejected,
        })
        .unwrap();
        if let CallPhase::Ended {
            reason,
            duration_secs,
            ..
        } = call.phase
        {
            assert_eq!(reason, EndReason::Rejected);
            assert!(duration_secs.is_none());
        } else {
            panic!("expected Ended phase");
        }
    }

    /// Mute toggles only apply to active sessions and are preserved across
    /// further toggles of the other control.
    #[test]
    fn test_mute_toggles() {
        let mut call = make_outbound_call();
        assert!(
            call.apply_transition(CallTransition::AudioMuteChanged { muted: true })
                .is_err()
        );

        call.apply_transition(CallTransition::RemoteAnswered).unwrap();
        call.apply_transition(CallTransition::AudioMuteChanged { muted: true })
            .unwrap();
        call.apply_transition(CallTransition::VideoStateChanged { off: true })
            .unwrap();

        if let CallPhase::Active {
            audio_muted,
            video_off,
            ..
        } = call.phase
        {
            assert!(audio_muted);
            assert!(video_off);
        } else {
            panic!("expected Active phase");
        }
    }

    /// Audio calls come up with video off.
    #[test]
    fn test_audio_call_video_off() {
        let mut call = make_outbound_call();
        call.apply_transition(CallTransition::RemoteAnswered).unwrap();
        if let CallPhase::Active { video_off, .. } = call.phase {
            assert!(video_off);
        }
    }

    /// Illegal edges are rejected.
    #[test]
    fn test_invalid_transitions() {
        let mut outbound = make_outbound_call();
        assert!(
            outbound
                .apply_transition(CallTransition::LocalAccepted)
                .is_err()
        );

        let mut inbound = make_inbound_call();
        assert!(
            inbound
                .apply_transition(CallTransition::RemoteAnswered)
                .is_err()
        );
    }

    /// Ended sessions reject every further transition.
    #[test]
    fn test_ended_call_rejects_transitions() {
        let mut call = make_inbound_call();
        call.apply_transition(CallTransition::Terminated {
            reason: EndReason::Rejected,
        })
        .unwrap();

        assert!(call.apply_transition(CallTransition::LocalAccepted).is_err());
        assert!(
            call.apply_transition(CallTransition::Terminated {
                reason: EndReason::Hangup,
            })
            .is_err()
        );
    }

    #[test]
    fn test_call_direction() {
        assert_eq!(make_outbound_call().direction, CallDirection::Outbound);
        assert_eq!(make_inbound_call().direction, CallDirection::Inbound);
    }
}
