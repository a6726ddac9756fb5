//! Call-flow engine: walks an agent's conversation graph one caller turn at a time.

pub mod computed;
pub mod engine;
pub mod extraction;
pub mod placeholders;
pub mod state;
pub mod transitions;

pub use engine::{
    CallFlowEngine, PendingTurn, TransitionRecord, TurnJob, TurnOutcome, WebhookDispatch,
    FALLBACK_UTTERANCE, GENERIC_CONTINUATION,
};
pub use state::{
    ConversationHistory, ConversationTurn, EngineState, SessionVariables, Speaker, VarValue,
};
pub use transitions::{DecisionPath, TransitionDecision, TransitionJudge};
