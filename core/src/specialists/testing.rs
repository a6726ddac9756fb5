//! Scripted language model shared by unit tests across the crate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::TeamSettings;

use super::team::SpecialistTeam;
use super::traits::{CompletionRequest, LanguageModel, NoopRetriever, SpecialistKind};

/// Answers per specialist kind: queued replies first, then a standing reply.
/// Kinds with neither fail, which exercises every fallback path.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    standing: HashMap<SpecialistKind, String>,
    queued: Mutex<HashMap<SpecialistKind, VecDeque<String>>>,
    delays: HashMap<SpecialistKind, Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, kind: SpecialistKind, text: &str) -> Self {
        self.standing.insert(kind, text.to_string());
        self
    }

    pub(crate) fn queue(self, kind: SpecialistKind, text: &str) -> Self {
        self.queued
            .lock()
            .expect("queue lock poisoned")
            .entry(kind)
            .or_default()
            .push_back(text.to_string());
        self
    }

    pub(crate) fn delay(mut self, kind: SpecialistKind, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    pub(crate) fn calls(&self, kind: SpecialistKind) -> usize {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .iter()
            .filter(|request| request.purpose == kind)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.requests.lock().expect("requests lock poisoned").len()
    }

    pub(crate) fn last_request(&self, kind: SpecialistKind) -> Option<CompletionRequest> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .iter()
            .rev()
            .find(|request| request.purpose == kind)
            .cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let kind = request.purpose;
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request);

        if let Some(delay) = self.delays.get(&kind) {
            sleep(*delay).await;
        }

        let queued = self
            .queued
            .lock()
            .expect("queue lock poisoned")
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        queued
            .or_else(|| self.standing.get(&kind).cloned())
            .ok_or_else(|| anyhow!("no scripted reply for {}", kind.as_str()))
    }
}

pub(crate) fn team_with(model: Arc<ScriptedModel>) -> Arc<SpecialistTeam> {
    Arc::new(SpecialistTeam::new(
        model,
        Arc::new(NoopRetriever),
        TeamSettings::default(),
    ))
}
