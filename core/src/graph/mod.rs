//! Conversation graph model, parsed once when an agent definition is loaded.
//!
//! Agent documents are loose JSON. Everything is converted into typed nodes here so
//! the engine never performs ad hoc lookups on raw maps at runtime. Shapes that
//! cannot be understood are logged and dropped; only a graph with no usable nodes
//! is rejected outright.

pub mod expr;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use expr::{CompareOp, Expr, ExprError, VariableCheck};

const TARGET: &str = "call_flow";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("agent definition is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("agent {0} has no usable nodes")]
    NoNodes(String),
}

/// What a node says: fixed text or LLM instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMode {
    Script(String),
    Prompt(String),
}

impl NodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeMode::Script(_) => "script",
            NodeMode::Prompt(_) => "prompt",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            NodeMode::Script(text) | NodeMode::Prompt(text) => text,
        }
    }

    pub fn is_prompt(&self) -> bool {
        matches!(self, NodeMode::Prompt(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: String,
    pub condition: String,
    pub checks: Vec<VariableCheck>,
}

impl Transition {
    pub fn is_eligible(&self, vars: &crate::flow::state::SessionVariables) -> bool {
        self.checks.iter().all(|check| check.is_met(vars))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    #[serde(alias = "text", alias = "str")]
    String,
    #[serde(alias = "integer", alias = "float", alias = "amount")]
    Number,
    #[serde(alias = "bool")]
    Boolean,
}

impl VarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarKind::String => "string",
            VarKind::Number => "number",
            VarKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    pub name: String,
    pub kind: VarKind,
    pub description: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedRule {
    pub target: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionSpec {
    pub variables: Vec<VariableSpec>,
    pub computed: Vec<ComputedRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSpec {
    pub url: String,
    pub method: String,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub mode: NodeMode,
    pub transitions: Vec<Transition>,
    pub extraction: Option<ExtractionSpec>,
    pub webhook: Option<WebhookSpec>,
    pub end_call: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    start_node_id: String,
    computed: Vec<ComputedRule>,
}

impl ConversationGraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|position| &self.nodes[*position])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn start_node(&self) -> &Node {
        &self.nodes[self.index[&self.start_node_id]]
    }

    /// Graph-wide computed rules, applied every turn before node rules.
    pub fn computed(&self) -> &[ComputedRule] {
        &self.computed
    }

    /// Resolves the node a session should begin on. Unknown ids fall back to the
    /// declared start node.
    pub fn resolve_start(&self, requested: Option<&str>) -> &Node {
        match requested {
            Some(id) => match self.node(id) {
                Some(node) => node,
                None => {
                    warn!(
                        target: TARGET,
                        requested = id,
                        fallback = %self.start_node_id,
                        "requested start node missing, using declared start"
                    );
                    self.start_node()
                }
            },
            None => self.start_node(),
        }
    }
}

/// Agent definition: graph plus the behavioural prompt shared by every node.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub name: String,
    pub global_prompt: String,
    pub graph: Arc<ConversationGraph>,
}

impl AgentDefinition {
    pub fn from_json(source: &str) -> Result<Self, GraphError> {
        let raw: RawAgent = serde_json::from_str(source)?;
        Self::from_raw(raw)
    }

    pub fn from_value(value: JsonValue) -> Result<Self, GraphError> {
        let raw: RawAgent = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawAgent) -> Result<Self, GraphError> {
        let agent_id = raw.agent_id;
        let mut nodes = Vec::with_capacity(raw.nodes.len());
        let mut index = HashMap::new();

        for raw_node in raw.nodes {
            let Some(node) = build_node(&agent_id, raw_node) else {
                continue;
            };
            if index.contains_key(&node.id) {
                warn!(target: TARGET, agent_id = %agent_id, node_id = %node.id, "duplicate node id dropped");
                continue;
            }
            index.insert(node.id.clone(), nodes.len());
            nodes.push(node);
        }

        if nodes.is_empty() {
            return Err(GraphError::NoNodes(agent_id));
        }

        for node in &nodes {
            for transition in &node.transitions {
                if !index.contains_key(&transition.target) {
                    warn!(
                        target: TARGET,
                        agent_id = %agent_id,
                        node_id = %node.id,
                        target_node = %transition.target,
                        "transition targets unknown node; taking it will stay on the node"
                    );
                }
            }
        }

        let start_node_id = match raw.start_node_id {
            Some(id) if index.contains_key(&id) => id,
            Some(id) => {
                warn!(target: TARGET, agent_id = %agent_id, start_node_id = %id, "declared start node missing, using first node");
                nodes[0].id.clone()
            }
            None => nodes[0].id.clone(),
        };

        let computed = build_computed(&agent_id, "<graph>", raw.computed_variables);

        Ok(Self {
            agent_id,
            name: raw.name,
            global_prompt: raw.global_prompt,
            graph: Arc::new(ConversationGraph {
                nodes,
                index,
                start_node_id,
                computed,
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawAgent {
    agent_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    global_prompt: String,
    #[serde(default)]
    start_node_id: Option<String>,
    nodes: Vec<RawNode>,
    #[serde(default)]
    computed_variables: Vec<RawComputed>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    transitions: Vec<RawTransition>,
    #[serde(default)]
    extract: Option<RawExtraction>,
    #[serde(default)]
    webhook: Option<RawWebhook>,
    #[serde(default)]
    end_call: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawTransition {
    target: String,
    #[serde(default)]
    condition: String,
    #[serde(default)]
    check_variables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    variables: Vec<RawVariable>,
    #[serde(default)]
    computed: Vec<RawComputed>,
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    name: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: JsonValue,
    #[serde(default)]
    description: String,
    #[serde(default)]
    overwrite: bool,
}

fn default_kind() -> JsonValue {
    JsonValue::String("string".into())
}

#[derive(Debug, Deserialize)]
struct RawComputed {
    name: String,
    expression: String,
}

#[derive(Debug, Deserialize)]
struct RawWebhook {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    variables: Vec<String>,
}

fn default_method() -> String {
    "POST".into()
}

fn build_node(agent_id: &str, raw: RawNode) -> Option<Node> {
    if !raw.extra.is_empty() {
        let keys: Vec<&str> = raw.extra.keys().map(String::as_str).collect();
        warn!(target: TARGET, agent_id, node_id = %raw.id, ?keys, "ignoring unknown node fields");
    }

    let mode = match raw.mode.as_deref().map(|mode| mode.trim().to_ascii_lowercase()) {
        Some(mode) if mode == "script" => {
            NodeMode::Script(first_text([raw.content, raw.script, raw.prompt, raw.instructions]))
        }
        Some(mode) if mode == "prompt" => {
            NodeMode::Prompt(first_text([raw.content, raw.prompt, raw.instructions, raw.script]))
        }
        Some(other) => {
            warn!(target: TARGET, agent_id, node_id = %raw.id, mode = %other, "unknown node mode, node dropped");
            return None;
        }
        None => match (raw.script, raw.prompt.or(raw.instructions), raw.content) {
            (Some(script), _, _) => NodeMode::Script(script),
            (None, Some(prompt), _) => NodeMode::Prompt(prompt),
            (None, None, Some(content)) => NodeMode::Script(content),
            (None, None, None) => NodeMode::Script(String::new()),
        },
    };

    if mode.text().trim().is_empty() {
        warn!(target: TARGET, agent_id, node_id = %raw.id, "node has empty content; responses fall back to a generic continuation");
    }

    let transitions = raw
        .transitions
        .into_iter()
        .filter_map(|transition| build_transition(agent_id, &raw.id, transition))
        .collect();

    let extraction = raw.extract.map(|extract| ExtractionSpec {
        variables: extract
            .variables
            .into_iter()
            .filter_map(|variable| build_variable(agent_id, &raw.id, variable))
            .collect(),
        computed: build_computed(agent_id, &raw.id, extract.computed),
    });

    let webhook = raw.webhook.map(|webhook| WebhookSpec {
        url: webhook.url,
        method: webhook.method.to_ascii_uppercase(),
        variables: webhook.variables,
    });

    Some(Node {
        label: raw.label.unwrap_or_else(|| raw.id.clone()),
        id: raw.id,
        mode,
        transitions,
        extraction,
        webhook,
        end_call: raw.end_call,
    })
}

fn first_text<const N: usize>(candidates: [Option<String>; N]) -> String {
    candidates.into_iter().flatten().next().unwrap_or_default()
}

fn build_transition(agent_id: &str, node_id: &str, raw: RawTransition) -> Option<Transition> {
    let mut checks = Vec::with_capacity(raw.check_variables.len());
    for source in &raw.check_variables {
        match VariableCheck::parse(source) {
            Ok(check) => checks.push(check),
            Err(err) => {
                warn!(
                    target: TARGET,
                    agent_id,
                    node_id,
                    target_node = %raw.target,
                    check = %source,
                    %err,
                    "unparseable variable check, transition dropped"
                );
                return None;
            }
        }
    }

    Some(Transition {
        target: raw.target,
        condition: raw.condition,
        checks,
    })
}

fn build_variable(agent_id: &str, node_id: &str, raw: RawVariable) -> Option<VariableSpec> {
    match serde_json::from_value::<VarKind>(raw.kind.clone()) {
        Ok(kind) => Some(VariableSpec {
            name: raw.name,
            kind,
            description: raw.description,
            overwrite: raw.overwrite,
        }),
        Err(err) => {
            warn!(
                target: TARGET,
                agent_id,
                node_id,
                variable = %raw.name,
                kind = %raw.kind,
                %err,
                "unknown variable type, variable dropped"
            );
            None
        }
    }
}

fn build_computed(agent_id: &str, scope: &str, raw: Vec<RawComputed>) -> Vec<ComputedRule> {
    raw.into_iter()
        .filter_map(|rule| match Expr::parse(&rule.expression) {
            Ok(expr) => Some(ComputedRule {
                target: rule.name,
                expr,
            }),
            Err(err) => {
                warn!(
                    target: TARGET,
                    agent_id,
                    scope,
                    variable = %rule.name,
                    expression = %rule.expression,
                    %err,
                    "unparseable computed variable, rule dropped"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonValue {
        json!({
            "agent_id": "loan-agent",
            "name": "Loan Agent",
            "global_prompt": "Be warm and brief.",
            "start_node_id": "greeting",
            "computed_variables": [
                {"name": "amount_reference", "expression": "employed_yearly_income / 12"}
            ],
            "nodes": [
                {
                    "id": "greeting",
                    "mode": "script",
                    "content": "Hi {{customer_name}}",
                    "transitions": [{"target": "income", "condition": "caller agrees to continue"}]
                },
                {
                    "id": "income",
                    "label": "Income",
                    "prompt": "Ask for their yearly income.",
                    "extract": {
                        "variables": [
                            {"name": "employed_yearly_income", "type": "number", "description": "yearly income"},
                            {"name": "broken", "type": "matrix"}
                        ]
                    },
                    "transitions": [
                        {"target": "qualified", "condition": "high income", "check_variables": ["amount_reference > 8000"]},
                        {"target": "qualified", "condition": "bad", "check_variables": ["not a name"]},
                        {"target": "ghost", "condition": "never valid"}
                    ],
                    "webhook": {"url": "https://crm.example/leads", "variables": ["customer_name"]},
                    "colour": "blue"
                },
                {"id": "weird", "mode": "carousel", "content": "x"},
                {"id": "qualified", "mode": "script", "content": "Great, you qualify.", "end_call": true}
            ]
        })
    }

    #[test]
    fn parses_typed_nodes() {
        let agent = AgentDefinition::from_value(sample()).expect("agent parses");
        let graph = &agent.graph;

        assert_eq!(agent.agent_id, "loan-agent");
        assert_eq!(graph.start_node_id(), "greeting");
        assert_eq!(graph.nodes().len(), 3, "unknown mode node dropped");
        assert!(!graph.contains("weird"));

        let greeting = graph.node("greeting").expect("greeting");
        assert_eq!(greeting.mode, NodeMode::Script("Hi {{customer_name}}".into()));
        assert_eq!(greeting.label, "greeting");

        let income = graph.node("income").expect("income");
        assert!(income.mode.is_prompt());
        assert_eq!(income.label, "Income");
        let extraction = income.extraction.as_ref().expect("extraction");
        assert_eq!(extraction.variables.len(), 1);
        assert_eq!(extraction.variables[0].kind, VarKind::Number);
        assert_eq!(income.transitions.len(), 2, "unparseable check drops transition");
        assert_eq!(income.webhook.as_ref().map(|w| w.method.as_str()), Some("POST"));

        assert!(graph.node("qualified").expect("qualified").end_call);
        assert_eq!(graph.computed().len(), 1);
    }

    #[test]
    fn resolve_start_falls_back_on_unknown_id() {
        let agent = AgentDefinition::from_value(sample()).expect("agent parses");
        assert_eq!(agent.graph.resolve_start(Some("income")).id, "income");
        assert_eq!(agent.graph.resolve_start(Some("nope")).id, "greeting");
        assert_eq!(agent.graph.resolve_start(None).id, "greeting");
    }

    #[test]
    fn missing_declared_start_uses_first_node() {
        let agent = AgentDefinition::from_value(json!({
            "agent_id": "a",
            "start_node_id": "missing",
            "nodes": [{"id": "first", "script": "Hello"}]
        }))
        .expect("agent parses");
        assert_eq!(agent.graph.start_node_id(), "first");
    }

    #[test]
    fn rejects_graph_without_nodes() {
        let err = AgentDefinition::from_value(json!({
            "agent_id": "empty",
            "nodes": [{"id": "x", "mode": "unknown"}]
        }))
        .expect_err("no usable nodes");
        assert!(matches!(err, GraphError::NoNodes(id) if id == "empty"));
    }
}
