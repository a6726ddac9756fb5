use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::graph::{AgentDefinition, Node, NodeMode};
use crate::specialists::prompts::strip_end_call;
use crate::specialists::{Advice, SpecialistTeam, TurnContext};
use crate::telemetry::events::{
    duration_to_ms, record_transition, record_turn_completed, TurnCompletedEvent,
};

use super::computed::apply_computed;
use super::extraction::apply_extraction;
use super::placeholders::render;
use super::state::{ConversationTurn, EngineState, SessionVariables, Speaker, VarValue};
use super::transitions::{self, eligible_transitions, DecisionPath};

const TARGET: &str = "call_flow";

/// Spoken when a prompt node has nothing usable to say.
pub const GENERIC_CONTINUATION: &str = "I see. Could you tell me a little more about that?";
/// Spoken when a turn failed unexpectedly.
pub const FALLBACK_UTTERANCE: &str = "Sorry, I didn't quite catch that. Could you say it again?";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub path: DecisionPath,
}

/// Request for an outbound webhook on entering a node. Only declared variables
/// that are set are included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookDispatch {
    pub node_id: String,
    pub url: String,
    pub method: String,
    pub payload: BTreeMap<String, VarValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub response_text: String,
    pub end_call: bool,
    pub current_node_id: String,
    pub node_label: String,
    pub transition: Option<TransitionRecord>,
    pub extracted: Vec<String>,
    pub webhook: Option<WebhookDispatch>,
    pub diagnostic: Option<String>,
}

/// A prepared turn: the full next state plus what to say. Nothing is visible to
/// the engine until [`CallFlowEngine::commit`].
#[derive(Debug)]
pub struct PendingTurn {
    state: EngineState,
    outcome: TurnOutcome,
    turn: u64,
    started: Instant,
    path: DecisionPath,
}

impl PendingTurn {
    pub fn outcome(&self) -> &TurnOutcome {
        &self.outcome
    }
}

/// Owned inputs for one turn, detached from the engine so the work can be
/// spawned, timed out, or abandoned without touching session state.
pub struct TurnJob {
    session_id: String,
    agent: Arc<AgentDefinition>,
    team: Arc<SpecialistTeam>,
    state: EngineState,
    turn: u64,
    user_text: String,
    started: Instant,
}

/// Drives one conversation through its agent's graph.
pub struct CallFlowEngine {
    session_id: String,
    agent: Arc<AgentDefinition>,
    team: Arc<SpecialistTeam>,
    state: EngineState,
    turn_count: u64,
}

impl CallFlowEngine {
    /// Begins a session. Unknown start ids fall back to the declared start node.
    /// A script start node is spoken immediately as the opening agent turn.
    pub fn start(
        session_id: impl Into<String>,
        agent: Arc<AgentDefinition>,
        team: Arc<SpecialistTeam>,
        seed: SessionVariables,
        start_node_id: Option<&str>,
    ) -> Self {
        let session_id = session_id.into();
        let node = agent.graph.resolve_start(start_node_id);
        let mut state = EngineState {
            current_node_id: node.id.clone(),
            session_variables: seed,
            conversation_history: Default::default(),
            should_end_call: false,
        };

        if let NodeMode::Script(script) = &node.mode {
            let opening = render(script, &state.session_variables);
            if !opening.trim().is_empty() {
                state
                    .conversation_history
                    .push(ConversationTurn::new(Speaker::Agent, opening, node.id.clone()));
            }
        }

        info!(
            target: TARGET,
            session_id = %session_id,
            agent_id = %agent.agent_id,
            node_id = %state.current_node_id,
            "call flow started"
        );

        Self {
            session_id,
            agent,
            team,
            state,
            turn_count: 0,
        }
    }

    /// Rebuilds an engine from persisted state. A current node that no longer
    /// exists in the graph falls back to the start node.
    pub fn restore(
        session_id: impl Into<String>,
        agent: Arc<AgentDefinition>,
        team: Arc<SpecialistTeam>,
        mut state: EngineState,
        turn_count: u64,
    ) -> Self {
        let session_id = session_id.into();
        if !agent.graph.contains(&state.current_node_id) {
            warn!(
                target: TARGET,
                session_id = %session_id,
                node_id = %state.current_node_id,
                "stored node missing from graph, resuming at start node"
            );
            state.current_node_id = agent.graph.start_node_id().to_string();
        }

        Self {
            session_id,
            agent,
            team,
            state,
            turn_count,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent(&self) -> &Arc<AgentDefinition> {
        &self.agent
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn current_node(&self) -> Option<&Node> {
        self.agent.graph.node(&self.state.current_node_id)
    }

    /// The greeting recorded at start, if the start node was a script node.
    pub fn opening_text(&self) -> Option<&str> {
        self.state
            .conversation_history
            .turns()
            .first()
            .filter(|turn| turn.speaker == Speaker::Agent)
            .map(|turn| turn.text.as_str())
    }

    pub fn begin_turn(&self, user_text: impl Into<String>) -> TurnJob {
        TurnJob {
            session_id: self.session_id.clone(),
            agent: self.agent.clone(),
            team: self.team.clone(),
            state: self.state.clone(),
            turn: self.turn_count + 1,
            user_text: user_text.into(),
            started: Instant::now(),
        }
    }

    /// Installs a prepared turn. Turns prepared against an older state are still
    /// applied; callers serialize preparation and commit per session.
    pub fn commit(&mut self, pending: PendingTurn) -> TurnOutcome {
        let PendingTurn {
            state,
            outcome,
            turn,
            started,
            path,
        } = pending;

        self.state = state;
        self.turn_count = turn;

        if let Some(transition) = &outcome.transition {
            record_transition(&self.session_id, &transition.from, &transition.to, path.as_str());
        }
        record_turn_completed(TurnCompletedEvent {
            session_id: &self.session_id,
            turn,
            node_id: &outcome.current_node_id,
            decision: path.as_str(),
            transitioned: outcome.transition.is_some(),
            end_call: outcome.end_call,
            extracted: outcome.extracted.len(),
            latency_ms: duration_to_ms(started.elapsed()),
        });

        outcome
    }

    pub async fn process_turn(&mut self, user_text: impl Into<String>) -> TurnOutcome {
        let pending = self.begin_turn(user_text).run().await;
        self.commit(pending)
    }

    /// Records a turn whose processing failed: the caller's words are kept, the
    /// node is unchanged, and a fixed apology is spoken.
    pub fn commit_fallback(&mut self, user_text: &str, diagnostic: impl Into<String>) -> TurnOutcome {
        let node_id = self.state.current_node_id.clone();
        let node_label = self
            .current_node()
            .map(|node| node.label.clone())
            .unwrap_or_default();
        let diagnostic = diagnostic.into();

        warn!(
            target: TARGET,
            session_id = %self.session_id,
            node_id = %node_id,
            turn = self.turn_count + 1,
            diagnostic = %diagnostic,
            "turn failed, speaking fallback"
        );

        let history = &mut self.state.conversation_history;
        history.push(ConversationTurn::new(Speaker::User, user_text, node_id.clone()));
        history.push(ConversationTurn::new(
            Speaker::Agent,
            FALLBACK_UTTERANCE,
            node_id.clone(),
        ));
        self.turn_count += 1;

        TurnOutcome {
            response_text: FALLBACK_UTTERANCE.to_string(),
            end_call: self.state.should_end_call,
            current_node_id: node_id,
            node_label,
            transition: None,
            extracted: Vec::new(),
            webhook: None,
            diagnostic: Some(diagnostic),
        }
    }
}

fn prior_window(state: &EngineState, window: usize) -> &[ConversationTurn] {
    let turns = state.conversation_history.turns();
    let prior = &turns[..turns.len().saturating_sub(1)];
    &prior[prior.len().saturating_sub(window)..]
}

fn context<'a>(
    job: &'a TurnJob,
    node: &'a Node,
    state: &'a EngineState,
) -> TurnContext<'a> {
    TurnContext {
        agent_id: &job.agent.agent_id,
        node,
        user_text: &job.user_text,
        history: prior_window(state, job.team.settings().history_window),
        variables: &state.session_variables,
        global_prompt: &job.agent.global_prompt,
    }
}

fn webhook_for(node: &Node, vars: &SessionVariables) -> Option<WebhookDispatch> {
    let spec = node.webhook.as_ref()?;
    let payload = spec
        .variables
        .iter()
        .filter_map(|name| vars.get(name).map(|value| (name.clone(), value.clone())))
        .collect();
    Some(WebhookDispatch {
        node_id: node.id.clone(),
        url: spec.url.clone(),
        method: spec.method.clone(),
        payload,
    })
}

impl TurnJob {
    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    /// Runs extraction, computed rules, transition evaluation and response
    /// synthesis on a private copy of the state.
    pub async fn run(self) -> PendingTurn {
        let graph = self.agent.graph.clone();
        let mut state = self.state.clone();
        let mut extracted = Vec::new();

        state.conversation_history.push(ConversationTurn::new(
            Speaker::User,
            self.user_text.clone(),
            state.current_node_id.clone(),
        ));

        let Some(node) = graph.node(&state.current_node_id) else {
            warn!(
                target: TARGET,
                session_id = %self.session_id,
                node_id = %state.current_node_id,
                "current node missing, continuing generically"
            );
            return self.finish_without_node(state);
        };

        if let Some(spec) = node.extraction.as_ref().filter(|spec| !spec.variables.is_empty()) {
            let reply = self
                .team
                .extract(&context(&self, node, &state), &spec.variables)
                .await;
            extracted = apply_extraction(
                &spec.variables,
                reply.as_deref(),
                &mut state.session_variables,
            );
        }

        let node_rules = node.extraction.iter().flat_map(|spec| spec.computed.iter());
        extracted.extend(apply_computed(
            graph.computed().iter().chain(node_rules),
            &mut state.session_variables,
        ));

        let ctx = context(&self, node, &state);
        let needs_advice = node.mode.is_prompt()
            || eligible_transitions(node, &state.session_variables)
                .iter()
                .any(|(_, transition)| {
                    graph
                        .node(&transition.target)
                        .is_some_and(|target| target.mode.is_prompt())
                });

        let (decision, advice) = tokio::join!(
            transitions::evaluate(self.team.as_ref(), &ctx),
            async {
                if needs_advice {
                    self.team.advise(&ctx).await
                } else {
                    Advice::default()
                }
            }
        );

        let destination = match decision.chosen.map(|index| &node.transitions[index]) {
            Some(transition) => match graph.node(&transition.target) {
                Some(target) => Some(target),
                None => {
                    warn!(
                        target: TARGET,
                        session_id = %self.session_id,
                        node_id = %node.id,
                        target_node = %transition.target,
                        turn = self.turn,
                        "transition target missing, staying on node"
                    );
                    None
                }
            },
            None => None,
        };
        let transitioned = destination.is_some();
        let dest = destination.unwrap_or(node);

        let (response_text, marker) = self.respond(node, dest, transitioned, &state, &advice).await;

        let transition = transitioned.then(|| TransitionRecord {
            from: node.id.clone(),
            to: dest.id.clone(),
            path: decision.path,
        });
        let webhook = if transitioned {
            webhook_for(dest, &state.session_variables)
        } else {
            None
        };

        state.current_node_id = dest.id.clone();
        state.should_end_call = dest.end_call || marker;
        state.conversation_history.push(ConversationTurn::new(
            Speaker::Agent,
            response_text.clone(),
            dest.id.clone(),
        ));

        debug!(
            target: TARGET,
            session_id = %self.session_id,
            node_id = %dest.id,
            turn = self.turn,
            decision = decision.path.as_str(),
            "turn prepared"
        );

        PendingTurn {
            outcome: TurnOutcome {
                response_text,
                end_call: state.should_end_call,
                current_node_id: dest.id.clone(),
                node_label: dest.label.clone(),
                transition,
                extracted,
                webhook,
                diagnostic: None,
            },
            state,
            turn: self.turn,
            started: self.started,
            path: decision.path,
        }
    }

    /// Picks the spoken text. Entering a script node is always literal; staying on
    /// one re-asks it; prompt nodes are synthesized. Returns the text and whether
    /// the model asked to end the call.
    async fn respond(
        &self,
        current: &Node,
        dest: &Node,
        transitioned: bool,
        state: &EngineState,
        advice: &Advice,
    ) -> (String, bool) {
        let rendered = render(dest.mode.text(), &state.session_variables);
        if rendered.trim().is_empty() {
            warn!(
                target: TARGET,
                session_id = %self.session_id,
                node_id = %dest.id,
                "node has no content, using generic continuation"
            );
            return (GENERIC_CONTINUATION.to_string(), false);
        }

        match &dest.mode {
            NodeMode::Script(_) if transitioned => (rendered, false),
            NodeMode::Script(_) => {
                let ctx = context(self, current, state);
                match self.team.synthesize_loop(&ctx, &rendered).await {
                    Some(reply) => {
                        let (text, marker) = strip_end_call(&reply);
                        if text.is_empty() {
                            (rendered, marker)
                        } else {
                            (text, marker)
                        }
                    }
                    None => (rendered, false),
                }
            }
            NodeMode::Prompt(_) => {
                let ctx = context(self, dest, state);
                match self.team.synthesize(&ctx, &rendered, advice).await {
                    Some(reply) => {
                        let (text, marker) = strip_end_call(&reply);
                        if text.is_empty() {
                            (GENERIC_CONTINUATION.to_string(), marker)
                        } else {
                            (text, marker)
                        }
                    }
                    None => (GENERIC_CONTINUATION.to_string(), false),
                }
            }
        }
    }

    fn finish_without_node(self, mut state: EngineState) -> PendingTurn {
        state.conversation_history.push(ConversationTurn::new(
            Speaker::Agent,
            GENERIC_CONTINUATION,
            state.current_node_id.clone(),
        ));
        PendingTurn {
            outcome: TurnOutcome {
                response_text: GENERIC_CONTINUATION.to_string(),
                end_call: state.should_end_call,
                current_node_id: state.current_node_id.clone(),
                node_label: String::new(),
                transition: None,
                extracted: Vec::new(),
                webhook: None,
                diagnostic: Some("current node missing from graph".into()),
            },
            state,
            turn: self.turn,
            started: self.started,
            path: DecisionPath::NoneEligible,
        }
    }
}
