//! Durable session documents and the immutable agents collection.
//!
//! A session is stored as one document replaced as a whole, so variables, history
//! and current node are always written together.

#[cfg(feature = "sqlite-persistence")]
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::flow::state::EngineState;
use crate::graph::AgentDefinition;

#[cfg(feature = "sqlite-persistence")]
pub use sqlite::{SqliteConfig, SqlitePath, SqlitePersistence};

/// Durable projection of one call's conversational state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub start_node_id: String,
    pub state: EngineState,
    #[serde(default)]
    pub turn_count: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Atomically replaces the whole document, inserting it if absent.
    async fn replace_session(&self, record: &SessionRecord) -> Result<()>;

    /// Returns whether a document was removed.
    async fn delete_session(&self, session_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn load_agent(&self, agent_id: &str) -> Result<Option<Arc<AgentDefinition>>>;
}

/// Process-local store used by the offline harness and tests. Sessions are kept
/// as serialized documents so a load always yields a fresh copy.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, String>>,
    agents: RwLock<HashMap<String, Arc<AgentDefinition>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and registers an agent definition.
    pub async fn put_agent_json(&self, source: &str) -> Result<Arc<AgentDefinition>> {
        let agent = Arc::new(AgentDefinition::from_json(source).context("invalid agent definition")?);
        self.put_agent(agent.clone()).await;
        Ok(agent)
    }

    pub async fn put_agent(&self, agent: Arc<AgentDefinition>) {
        self.agents
            .write()
            .await
            .insert(agent.agent_id.clone(), agent);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let guard = self.sessions.read().await;
        guard
            .get(session_id)
            .map(|document| {
                serde_json::from_str(document)
                    .with_context(|| format!("corrupt session document {session_id}"))
            })
            .transpose()
    }

    async fn replace_session(&self, record: &SessionRecord) -> Result<()> {
        let document = serde_json::to_string(record).context("failed to encode session record")?;
        self.sessions
            .write()
            .await
            .insert(record.session_id.clone(), document);
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[async_trait]
impl AgentStore for InMemoryStore {
    async fn load_agent(&self, agent_id: &str) -> Result<Option<Arc<AgentDefinition>>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }
}

#[cfg(test)]
mod tests;
