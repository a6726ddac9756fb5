use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flow::state::{ConversationTurn, SessionVariables};
use crate::graph::Node;

/// Which narrow decision an LLM call serves. Carried on every request so logs,
/// telemetry and test fakes can tell the calls apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Intent,
    Style,
    Context,
    Tactic,
    Transition,
    Extraction,
    Synthesis,
}

impl SpecialistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistKind::Intent => "intent",
            SpecialistKind::Style => "style",
            SpecialistKind::Context => "context",
            SpecialistKind::Tactic => "tactic",
            SpecialistKind::Transition => "transition",
            SpecialistKind::Extraction => "extraction",
            SpecialistKind::Synthesis => "synthesis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: SpecialistKind,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The single LLM seam used by every specialist and the synthesizer.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub content: String,
    pub source: String,
    pub similarity: f32,
}

/// Knowledge-base lookup. Implementations return an empty list on no match or on
/// error; they never fail the caller.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, agent_id: &str, query: &str, top_k: Option<usize>)
        -> Vec<RetrievedSnippet>;
}

#[derive(Debug, Default)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn retrieve(
        &self,
        _agent_id: &str,
        _query: &str,
        _top_k: Option<usize>,
    ) -> Vec<RetrievedSnippet> {
        Vec::new()
    }
}

/// Read-only view of one turn handed to every specialist. Specialists never get
/// mutable access to session state.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub agent_id: &'a str,
    pub node: &'a Node,
    pub user_text: &'a str,
    pub history: &'a [ConversationTurn],
    pub variables: &'a SessionVariables,
    pub global_prompt: &'a str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no credential configured for service `{0}`")]
    NotFound(String),
}

/// Resolves API keys for downstream services.
pub trait CredentialResolver: Send + Sync {
    fn get_api_key(&self, service_name: &str) -> Result<String, CredentialError>;
}

/// Reads `<SERVICE>_API_KEY` from the environment, e.g. `LLM_API_KEY`.
#[derive(Debug, Default)]
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    pub fn variable_name(service_name: &str) -> String {
        let normalized: String = service_name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{normalized}_API_KEY")
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn get_api_key(&self, service_name: &str) -> Result<String, CredentialError> {
        std::env::var(Self::variable_name(service_name))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CredentialError::NotFound(service_name.to_string()))
    }
}

/// Fixed key, used by tests and single-tenant deployments.
#[derive(Debug, Clone)]
pub struct StaticCredentialResolver(pub Option<String>);

impl CredentialResolver for StaticCredentialResolver {
    fn get_api_key(&self, service_name: &str) -> Result<String, CredentialError> {
        self.0
            .clone()
            .ok_or_else(|| CredentialError::NotFound(service_name.to_string()))
    }
}
