use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::TeamSettings;
use crate::flow::transitions::TransitionJudge;
use crate::graph::{Transition, VariableSpec};
use crate::telemetry::events::record_specialist_fallback;

use super::labels::{parse_yes, Intent, Style, Tactic};
use super::prompts;
use super::traits::{
    ChatMessage, CompletionRequest, LanguageModel, RetrievedSnippet, Retriever, SpecialistKind,
    TurnContext,
};

const TARGET: &str = "specialists";

/// What the advisory specialists concluded about the caller this turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Advice {
    pub intent: Intent,
    pub style: Style,
    pub tactic: Tactic,
    pub snippets: Vec<RetrievedSnippet>,
}

/// Narrow LLM micro-calls sharing one model client. Every method returns a usable
/// value: failures and timeouts map to fixed defaults and are logged.
pub struct SpecialistTeam {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    settings: TeamSettings,
}

impl SpecialistTeam {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        settings: TeamSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            settings,
        }
    }

    pub fn settings(&self) -> &TeamSettings {
        &self.settings
    }

    /// One bounded LLM call. `None` means the caller must use its default.
    pub async fn ask(
        &self,
        kind: SpecialistKind,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Option<String> {
        let started = Instant::now();
        let request = CompletionRequest {
            purpose: kind,
            messages,
            model: model.to_string(),
            temperature,
            max_tokens,
        };

        match tokio::time::timeout(timeout, self.llm.complete(request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!(
                    target: TARGET,
                    specialist = kind.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "specialist answered"
                );
                Some(text)
            }
            Ok(Ok(_)) => {
                warn!(target: TARGET, specialist = kind.as_str(), "specialist returned empty text");
                record_specialist_fallback(kind.as_str(), "empty", started.elapsed());
                None
            }
            Ok(Err(err)) => {
                warn!(target: TARGET, specialist = kind.as_str(), %err, "specialist call failed");
                record_specialist_fallback(kind.as_str(), "error", started.elapsed());
                None
            }
            Err(_) => {
                warn!(
                    target: TARGET,
                    specialist = kind.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "specialist timed out"
                );
                record_specialist_fallback(kind.as_str(), "timeout", started.elapsed());
                None
            }
        }
    }

    async fn classify<T: Default>(
        &self,
        kind: SpecialistKind,
        messages: Vec<ChatMessage>,
        timeout: Duration,
        parse: impl Fn(&str) -> Option<T>,
    ) -> T {
        let started = Instant::now();
        let Some(raw) = self
            .ask(
                kind,
                messages,
                &self.settings.fast_model,
                0.0,
                self.settings.label_max_tokens,
                timeout,
            )
            .await
        else {
            return T::default();
        };

        match parse(&raw) {
            Some(label) => label,
            None => {
                debug!(target: TARGET, specialist = kind.as_str(), raw = %raw, "unrecognised label");
                record_specialist_fallback(kind.as_str(), "unrecognised_label", started.elapsed());
                T::default()
            }
        }
    }

    pub async fn classify_intent(&self, ctx: &TurnContext<'_>) -> Intent {
        self.classify(
            SpecialistKind::Intent,
            prompts::intent_messages(ctx),
            self.settings.intent_timeout(),
            Intent::from_label,
        )
        .await
    }

    pub async fn classify_style(&self, ctx: &TurnContext<'_>) -> Style {
        self.classify(
            SpecialistKind::Style,
            prompts::style_messages(ctx),
            self.settings.style_timeout(),
            Style::from_label,
        )
        .await
    }

    pub async fn select_tactic(&self, ctx: &TurnContext<'_>, intent: Intent) -> Tactic {
        self.classify(
            SpecialistKind::Tactic,
            prompts::tactic_messages(ctx, intent),
            self.settings.tactic_timeout(),
            Tactic::from_label,
        )
        .await
    }

    pub async fn retrieve_context(&self, ctx: &TurnContext<'_>) -> Vec<RetrievedSnippet> {
        let started = Instant::now();
        let lookup = self.retriever.retrieve(
            ctx.agent_id,
            ctx.user_text,
            Some(self.settings.retrieval_top_k),
        );
        match tokio::time::timeout(self.settings.context_timeout(), lookup).await {
            Ok(snippets) => snippets,
            Err(_) => {
                warn!(target: TARGET, agent_id = ctx.agent_id, "context retrieval timed out");
                record_specialist_fallback(
                    SpecialistKind::Context.as_str(),
                    "timeout",
                    started.elapsed(),
                );
                Vec::new()
            }
        }
    }

    /// First wave runs intent, style and retrieval together; the tactic selector
    /// needs the intent and runs as a second wave.
    pub async fn advise(&self, ctx: &TurnContext<'_>) -> Advice {
        let (intent, style, snippets) = tokio::join!(
            self.classify_intent(ctx),
            self.classify_style(ctx),
            self.retrieve_context(ctx)
        );
        let tactic = self.select_tactic(ctx, intent).await;

        Advice {
            intent,
            style,
            tactic,
            snippets,
        }
    }

    /// Yes/no judgement of one transition condition. Failure counts as "no".
    pub async fn judge_condition(&self, ctx: &TurnContext<'_>, condition: &str) -> bool {
        self.ask(
            SpecialistKind::Transition,
            prompts::transition_messages(ctx, condition),
            &self.settings.fast_model,
            0.0,
            self.settings.yes_no_max_tokens,
            self.settings.transition_timeout(),
        )
        .await
        .map(|raw| parse_yes(&raw))
        .unwrap_or(false)
    }

    /// Raw extraction reply; parsing and coercion belong to the engine.
    pub async fn extract(
        &self,
        ctx: &TurnContext<'_>,
        variables: &[VariableSpec],
    ) -> Option<String> {
        if variables.is_empty() {
            return None;
        }
        self.ask(
            SpecialistKind::Extraction,
            prompts::extraction_messages(ctx, variables),
            &self.settings.fast_model,
            0.0,
            self.settings.extraction_max_tokens,
            self.settings.extraction_timeout(),
        )
        .await
    }

    pub async fn synthesize(
        &self,
        ctx: &TurnContext<'_>,
        instructions: &str,
        advice: &Advice,
    ) -> Option<String> {
        self.ask(
            SpecialistKind::Synthesis,
            prompts::response_messages(ctx, instructions, advice),
            &self.settings.reasoning_model,
            self.settings.synthesis_temperature,
            self.settings.synthesis_max_tokens,
            self.settings.synthesis_timeout(),
        )
        .await
    }

    pub async fn synthesize_loop(&self, ctx: &TurnContext<'_>, script: &str) -> Option<String> {
        self.ask(
            SpecialistKind::Synthesis,
            prompts::loop_messages(ctx, script),
            &self.settings.reasoning_model,
            self.settings.synthesis_temperature,
            self.settings.synthesis_max_tokens,
            self.settings.synthesis_timeout(),
        )
        .await
    }
}

#[async_trait]
impl TransitionJudge for SpecialistTeam {
    async fn judge(&self, ctx: &TurnContext<'_>, transition: &Transition) -> bool {
        self.judge_condition(ctx, &transition.condition).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::state::SessionVariables;
    use crate::graph::{Node, NodeMode};
    use crate::specialists::testing::{team_with, ScriptedModel};

    fn node() -> Node {
        Node {
            id: "pitch".into(),
            label: "Pitch".into(),
            mode: NodeMode::Prompt("Explain the offer".into()),
            transitions: Vec::new(),
            extraction: None,
            webhook: None,
            end_call: false,
        }
    }

    #[tokio::test]
    async fn advice_uses_defaults_for_failed_specialists() {
        let model = Arc::new(
            ScriptedModel::new()
                .reply(SpecialistKind::Intent, "objection")
                .reply(SpecialistKind::Tactic, "reassure")
                .reply(SpecialistKind::Style, "driver")
                .delay(SpecialistKind::Style, Duration::from_secs(5)),
        );
        let team = team_with(model.clone());

        let node = node();
        let vars = SessionVariables::new();
        let ctx = TurnContext {
            agent_id: "agent",
            node: &node,
            user_text: "that sounds expensive",
            history: &[],
            variables: &vars,
            global_prompt: "",
        };

        let advice = tokio::time::timeout(Duration::from_secs(3), team.advise(&ctx))
            .await
            .expect("advice finishes within budget");

        assert_eq!(advice.intent, Intent::Objection);
        assert_eq!(advice.style, Style::Neutral);
        assert_eq!(advice.tactic, Tactic::Reassure);
        assert!(advice.snippets.is_empty());
        assert_eq!(model.total_calls(), 3);
        assert_eq!(model.calls(SpecialistKind::Style), 1);
    }

    #[tokio::test]
    async fn failed_judgement_counts_as_no() {
        let model = Arc::new(ScriptedModel::new());
        let team = team_with(model.clone());
        let node = node();
        let vars = SessionVariables::new();
        let ctx = TurnContext {
            agent_id: "agent",
            node: &node,
            user_text: "maybe",
            history: &[],
            variables: &vars,
            global_prompt: "",
        };
        assert!(!team.judge_condition(&ctx, "caller agreed").await);
        assert_eq!(model.calls(SpecialistKind::Transition), 1);
    }
}
