use super::*;
use crate::flow::state::{ConversationTurn, SessionVariables, Speaker};
use serde_json::json;

fn record(session_id: &str, node: &str) -> SessionRecord {
    let mut state = EngineState {
        current_node_id: node.into(),
        session_variables: [("customer_name", "Mike")].into_iter().collect::<SessionVariables>(),
        conversation_history: Default::default(),
        should_end_call: false,
    };
    state
        .conversation_history
        .push(ConversationTurn::new(Speaker::Agent, "Hi Mike", "a"));
    state
        .conversation_history
        .push(ConversationTurn::new(Speaker::User, "sure", "a"));

    SessionRecord {
        session_id: session_id.into(),
        agent_id: "agent".into(),
        user_id: Some("user-1".into()),
        start_node_id: "a".into(),
        state,
        turn_count: 1,
        created_at_ms: 1_000,
        updated_at_ms: 2_000,
    }
}

fn agent_json() -> String {
    json!({
        "agent_id": "agent",
        "nodes": [{"id": "a", "mode": "script", "content": "Hi"}]
    })
    .to_string()
}

#[tokio::test]
async fn memory_store_replaces_whole_documents() {
    let store = InMemoryStore::new();
    store.replace_session(&record("s-1", "a")).await.expect("write");

    let mut updated = record("s-1", "b");
    updated.turn_count = 2;
    store.replace_session(&updated).await.expect("replace");

    let loaded = store.load_session("s-1").await.expect("read").expect("present");
    assert_eq!(loaded, updated);
    assert_eq!(store.session_count().await, 1);

    assert!(store.delete_session("s-1").await.expect("delete"));
    assert!(!store.delete_session("s-1").await.expect("delete again"));
    assert!(store.load_session("s-1").await.expect("read").is_none());
}

#[tokio::test]
async fn memory_store_serves_registered_agents() {
    let store = InMemoryStore::new();
    store.put_agent_json(&agent_json()).await.expect("agent");
    let agent = store.load_agent("agent").await.expect("read").expect("present");
    assert_eq!(agent.graph.start_node_id(), "a");
    assert!(store.load_agent("other").await.expect("read").is_none());
    assert!(store.put_agent_json("{").await.is_err());
}

#[cfg(feature = "sqlite-persistence")]
mod sqlite_store {
    use super::*;
    use crate::persistence::sqlite::{SqliteConfig, SqlitePersistence};
    use tempfile::NamedTempFile;

    #[test]
    fn bootstrap_runs_migrations() {
        let persistence = SqlitePersistence::bootstrap(SqliteConfig::memory()).expect("bootstrap");
        let conn = persistence.connection().expect("connection available");

        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN ('sessions', 'agents')",
                [],
                |row| row.get(0),
            )
            .expect("tables listed");
        assert_eq!(tables, 2);
    }

    #[test]
    fn memory_database_is_shared_across_calls() {
        let persistence = SqlitePersistence::bootstrap(SqliteConfig::memory()).expect("bootstrap");
        persistence.write_session(&record("s-1", "a")).expect("write");
        assert!(persistence.read_session("s-1").expect("read").is_some());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_reopen() {
        let file = NamedTempFile::new().expect("temp file");
        let path = file.path().to_path_buf();

        {
            let store = SqlitePersistence::bootstrap(SqliteConfig::file(&path)).expect("bootstrap");
            store.replace_session(&record("s-1", "a")).await.expect("write");
            let mut updated = record("s-1", "b");
            updated.updated_at_ms = 3_000;
            store.replace_session(&updated).await.expect("replace");
            store.write_agent(&agent_json()).expect("agent");
        }

        let reopened = SqlitePersistence::bootstrap(SqliteConfig::file(&path)).expect("reopen");
        assert_eq!(reopened.database_path(), Some(path.as_path()));

        let loaded = reopened
            .load_session("s-1")
            .await
            .expect("read")
            .expect("present");
        assert_eq!(loaded.state.current_node_id, "b");
        assert_eq!(loaded.updated_at_ms, 3_000);
        assert_eq!(loaded.state.conversation_history.len(), 2);

        let conn = reopened.connection().expect("connection");
        let (current, created): (String, i64) = conn
            .query_row(
                "SELECT current_node_id, created_at_ms FROM sessions WHERE session_id = 's-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(current, "b");
        assert_eq!(created, 1_000);

        let agent = reopened.load_agent("agent").await.expect("read").expect("present");
        assert_eq!(agent.agent_id, "agent");

        assert!(reopened.delete_session("s-1").await.expect("delete"));
        assert!(reopened.load_session("s-1").await.expect("read").is_none());
    }

    #[test]
    fn invalid_agent_is_rejected_before_storage() {
        let persistence = SqlitePersistence::bootstrap(SqliteConfig::memory()).expect("bootstrap");
        assert!(persistence.write_agent(r#"{"agent_id": "x", "nodes": []}"#).is_err());
        assert!(persistence.read_agent("x").expect("read").is_none());
    }
}
