use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::call_flow";
pub(crate) const EVENT_TURN: &str = "turn_completed";
pub(crate) const EVENT_TRANSITION: &str = "transition_taken";
pub(crate) const EVENT_FALLBACK: &str = "specialist_fallback";
pub(crate) const EVENT_LIFECYCLE: &str = "session_lifecycle";

#[derive(Debug, Serialize)]
pub struct TurnCompletedEvent<'a> {
    pub session_id: &'a str,
    pub turn: u64,
    pub node_id: &'a str,
    pub decision: &'static str,
    pub transitioned: bool,
    pub end_call: bool,
    pub extracted: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TransitionEvent<'a> {
    pub session_id: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub decision: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SpecialistFallbackEvent<'a> {
    pub specialist: &'static str,
    pub reason: &'a str,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleEvent<'a> {
    pub session_id: &'a str,
    pub phase: &'static str,
}

pub fn record_turn_completed(event: TurnCompletedEvent<'_>) {
    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TURN,
            session_id = event.session_id,
            turn = event.turn,
            node_id = event.node_id,
            decision = event.decision,
            latency_ms = event.latency_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TURN,
            %err,
            "failed to encode turn event"
        ),
    }
}

pub fn record_transition(session_id: &str, from: &str, to: &str, decision: &'static str) {
    let event = TransitionEvent {
        session_id,
        from,
        to,
        decision,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TRANSITION,
            session_id,
            from,
            to,
            decision,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TRANSITION,
            %err,
            "failed to encode transition event"
        ),
    }
}

pub fn record_specialist_fallback(specialist: &'static str, reason: &str, elapsed: Duration) {
    let event = SpecialistFallbackEvent {
        specialist,
        reason,
        elapsed_ms: duration_to_ms(elapsed),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_FALLBACK,
            specialist,
            elapsed_ms = event.elapsed_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_FALLBACK,
            %err,
            "failed to encode specialist fallback event"
        ),
    }
}

pub fn record_session_lifecycle(session_id: &str, phase: &'static str) {
    let event = LifecycleEvent { session_id, phase };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_LIFECYCLE,
            session_id,
            phase,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_LIFECYCLE,
            %err,
            "failed to encode lifecycle event"
        ),
    }
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_to_u64() {
        let duration = Duration::new(u64::MAX, 0);
        assert_eq!(duration_to_ms(duration), u64::MAX);
    }

    #[test]
    fn turn_event_payload_names_fields() {
        let event = TurnCompletedEvent {
            session_id: "s-1",
            turn: 3,
            node_id: "b",
            decision: "affirmative",
            transitioned: true,
            end_call: false,
            extracted: 0,
            latency_ms: 42,
        };
        let payload = serde_json::to_value(&event).expect("encode");
        assert_eq!(payload["decision"], "affirmative");
        assert_eq!(payload["latency_ms"], 42);
        assert_eq!(payload["transitioned"], true);
    }
}
