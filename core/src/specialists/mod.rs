//! Specialist response team: narrow, concurrent LLM micro-calls.

pub mod http;
pub mod labels;
pub mod prompts;
pub mod team;
pub mod traits;

pub use http::OpenAiCompatibleModel;
pub use labels::{Intent, Style, Tactic};
pub use team::{Advice, SpecialistTeam};
pub use traits::{
    ChatMessage, ChatRole, CompletionRequest, CredentialError, CredentialResolver,
    EnvCredentialResolver, LanguageModel, NoopRetriever, RetrievedSnippet, Retriever,
    SpecialistKind, StaticCredentialResolver, TurnContext,
};

#[cfg(test)]
pub(crate) mod testing;
