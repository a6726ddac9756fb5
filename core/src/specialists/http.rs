//! OpenAI-compatible chat-completions client.
//!
//! `ureq` is blocking, so each request runs on the blocking pool. The API key is
//! resolved per request so rotated credentials take effect without a restart.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::LlmSettings;

use super::traits::{ChatMessage, CompletionRequest, CredentialResolver, LanguageModel};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatibleModel {
    agent: ureq::Agent,
    endpoint: String,
    credential_service: String,
    credentials: Arc<dyn CredentialResolver>,
}

impl OpenAiCompatibleModel {
    pub fn new(settings: &LlmSettings, credentials: Arc<dyn CredentialResolver>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.request_timeout())
            .build();
        Self {
            agent,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            credential_service: settings.credential_service.clone(),
            credentials,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let api_key = self
            .credentials
            .get_api_key(&self.credential_service)
            .context("llm credential unavailable")?;
        let body = serde_json::to_value(ChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        })
        .context("failed to encode chat request")?;

        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let purpose = request.purpose;

        let response = tokio::task::spawn_blocking(move || -> Result<ChatResponse> {
            let response = agent
                .post(&endpoint)
                .set("Authorization", &format!("Bearer {api_key}"))
                .send_json(body)
                .map_err(|err| anyhow!("chat completion request failed: {err}"))?;
            response
                .into_json::<ChatResponse>()
                .context("failed to decode chat completion response")
        })
        .await
        .context("chat completion task panicked")??;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))?;

        debug!(target: "specialists", specialist = purpose.as_str(), chars = text.len(), "completion received");
        Ok(text.trim().to_string())
    }
}
