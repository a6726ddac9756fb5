use serde::Serialize;

use crate::flow::{
    ConversationTurn, EngineState, SessionVariables, TransitionRecord, TurnOutcome,
    WebhookDispatch,
};

/// Parameters for opening a session.
#[derive(Debug, Clone, Default)]
pub struct StartSession {
    pub agent_id: String,
    pub start_node_id: Option<String>,
    pub seed: SessionVariables,
    pub user_id: Option<String>,
}

impl StartSession {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.start_node_id = Some(node_id.into());
        self
    }

    pub fn with_seed(mut self, seed: SessionVariables) -> Self {
        self.seed = seed;
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedSession {
    pub session_id: String,
    pub current_node_id: String,
    pub opening_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendMessageResponse {
    pub response_text: String,
    pub current_node_id: String,
    pub node_label: String,
    pub should_end_call: bool,
    pub variables: SessionVariables,
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookDispatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl SendMessageResponse {
    pub(crate) fn new(outcome: TurnOutcome, state: &EngineState) -> Self {
        Self {
            response_text: outcome.response_text,
            current_node_id: outcome.current_node_id,
            node_label: outcome.node_label,
            should_end_call: outcome.end_call,
            variables: state.session_variables.clone(),
            conversation_history: state.conversation_history.turns().to_vec(),
            transition: outcome.transition,
            webhook: outcome.webhook,
            diagnostic: outcome.diagnostic,
        }
    }
}
