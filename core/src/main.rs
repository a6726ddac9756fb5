//! Offline harness: drives one session of an agent from stdin lines.
//!
//! Usage: `callflow-core <agent.json> [name=value ...]`

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use callflow_core::config::CoreConfig;
use callflow_core::flow::{SessionVariables, VarValue};
use callflow_core::persistence::{AgentStore, InMemoryStore, SessionStore};
use callflow_core::session::{SessionManager, StartSession};
use callflow_core::specialists::{
    EnvCredentialResolver, NoopRetriever, OpenAiCompatibleModel, SpecialistTeam,
};
use callflow_core::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let config = CoreConfig::load()?;
    let _guard = init_tracing(&config.logging)?;

    let mut args = std::env::args().skip(1);
    let Some(agent_path) = args.next() else {
        bail!("usage: callflow-core <agent.json> [name=value ...]");
    };
    let seed = parse_seed(args)?;
    let definition = tokio::fs::read_to_string(&agent_path)
        .await
        .with_context(|| format!("failed to read agent definition {agent_path}"))?;

    let (sessions, agents, agent_id) = open_stores(&config, &definition).await?;

    let credentials = Arc::new(EnvCredentialResolver);
    let llm = Arc::new(OpenAiCompatibleModel::new(&config.llm, credentials));
    let team = Arc::new(SpecialistTeam::new(
        llm,
        Arc::new(NoopRetriever),
        config.team.clone().with_models(&config.llm),
    ));
    let manager = SessionManager::new(sessions, agents, team, config.session.clone());

    let started = manager
        .start_session(StartSession::new(agent_id).with_seed(seed))
        .await?;
    info!(target: "session_manager", session_id = %started.session_id, "offline session ready");
    if let Some(opening) = &started.opening_text {
        println!("agent> {opening}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = manager.send_message(&started.session_id, line).await?;
        println!("agent> {}", response.response_text);
        if let Some(diagnostic) = &response.diagnostic {
            eprintln!("[{}] {diagnostic}", response.current_node_id);
        }
        if response.should_end_call {
            break;
        }
    }

    let state = manager.get_session(&started.session_id).await?;
    println!("{}", serde_json::to_string_pretty(&state.session_variables)?);
    Ok(())
}

type Stores = (Arc<dyn SessionStore>, Arc<dyn AgentStore>, String);

#[cfg(feature = "sqlite-persistence")]
async fn open_stores(config: &CoreConfig, definition: &str) -> Result<Stores> {
    use callflow_core::persistence::{SqliteConfig, SqlitePersistence};

    if let Some(sqlite) = SqliteConfig::from_settings(&config.storage) {
        let store = Arc::new(SqlitePersistence::bootstrap(sqlite)?);
        let agent = store.write_agent(definition)?;
        let sessions: Arc<dyn SessionStore> = store.clone();
        let agents: Arc<dyn AgentStore> = store;
        return Ok((sessions, agents, agent.agent_id.clone()));
    }
    open_memory_stores(definition).await
}

#[cfg(not(feature = "sqlite-persistence"))]
async fn open_stores(_config: &CoreConfig, definition: &str) -> Result<Stores> {
    open_memory_stores(definition).await
}

async fn open_memory_stores(definition: &str) -> Result<Stores> {
    let store = Arc::new(InMemoryStore::new());
    let agent = store.put_agent_json(definition).await?;
    let sessions: Arc<dyn SessionStore> = store.clone();
    let agents: Arc<dyn AgentStore> = store;
    Ok((sessions, agents, agent.agent_id.clone()))
}

/// `name=value` pairs; values that parse as JSON scalars keep their type.
fn parse_seed(args: impl Iterator<Item = String>) -> Result<SessionVariables> {
    let mut seed = SessionVariables::new();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("expected name=value, got {arg:?}");
        };
        let value = serde_json::from_str::<VarValue>(value)
            .unwrap_or_else(|_| VarValue::from(value));
        seed.overwrite(name.trim(), value);
    }
    Ok(seed)
}
