//! Session lifecycle broadcast payloads.

use serde::Serialize;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecyclePhase {
    Started,
    Restored,
    TurnCompleted,
    Expired,
    Deleted,
}

impl SessionLifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionLifecyclePhase::Started => "started",
            SessionLifecyclePhase::Restored => "restored",
            SessionLifecyclePhase::TurnCompleted => "turn_completed",
            SessionLifecyclePhase::Expired => "expired",
            SessionLifecyclePhase::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionLifecyclePayload {
    #[default]
    None,
    Turn(TurnPayload),
}

/// Summary of a committed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPayload {
    pub turn: u64,
    pub node_id: String,
    pub end_call: bool,
}

#[derive(Debug, Clone)]
pub struct SessionLifecycleUpdate {
    pub session_id: String,
    pub phase: SessionLifecyclePhase,
    pub issued_at: SystemTime,
    pub payload: SessionLifecyclePayload,
}

impl SessionLifecycleUpdate {
    pub fn new<S: Into<String>>(session_id: S, phase: SessionLifecyclePhase) -> Self {
        Self {
            session_id: session_id.into(),
            phase,
            issued_at: SystemTime::now(),
            payload: SessionLifecyclePayload::None,
        }
    }

    pub fn turn_completed<S: Into<String>>(
        session_id: S,
        turn: u64,
        node_id: impl Into<String>,
        end_call: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phase: SessionLifecyclePhase::TurnCompleted,
            issued_at: SystemTime::now(),
            payload: SessionLifecyclePayload::Turn(TurnPayload {
                turn,
                node_id: node_id.into(),
                end_call,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_helper_sets_payload() {
        let update = SessionLifecycleUpdate::turn_completed("session", 3, "offer", true);
        assert_eq!(update.phase, SessionLifecyclePhase::TurnCompleted);

        match update.payload {
            SessionLifecyclePayload::Turn(payload) => {
                assert_eq!(payload.turn, 3);
                assert_eq!(payload.node_id, "offer");
                assert!(payload.end_call);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn plain_updates_carry_no_payload() {
        let update = SessionLifecycleUpdate::new("session", SessionLifecyclePhase::Expired);
        assert_eq!(update.payload, SessionLifecyclePayload::None);
        assert_eq!(update.phase.as_str(), "expired");
    }
}
