use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::config::StorageSettings;
use crate::graph::AgentDefinition;

use super::{AgentStore, SessionRecord, SessionStore};

const TARGET: &str = "persistence";

/// Storage location of the session database.
#[derive(Debug, Clone)]
pub enum SqlitePath {
    File(PathBuf),
    Memory,
}

impl SqlitePath {
    fn to_manager(&self) -> SqliteConnectionManager {
        match self {
            SqlitePath::File(path) => {
                SqliteConnectionManager::file(path).with_flags(Self::open_flags())
            }
            SqlitePath::Memory => SqliteConnectionManager::memory().with_flags(Self::open_flags()),
        }
    }

    fn open_flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }

    fn as_path(&self) -> Option<&Path> {
        match self {
            SqlitePath::File(path) => Some(path.as_path()),
            SqlitePath::Memory => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: SqlitePath,
    pub pool_size: u32,
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    pub fn memory() -> Self {
        Self {
            path: SqlitePath::Memory,
            pool_size: 1,
            busy_timeout: Duration::from_millis(250),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: SqlitePath::File(path.into()),
            pool_size: 4,
            busy_timeout: Duration::from_millis(250),
        }
    }

    /// `None` when the settings ask for in-memory sessions only.
    pub fn from_settings(settings: &StorageSettings) -> Option<Self> {
        settings.sqlite_path.as_ref().map(|path| Self {
            path: SqlitePath::File(path.clone()),
            pool_size: settings.pool_size.max(1),
            busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
        })
    }
}

/// Session and agent documents in SQLite behind an r2d2 pool.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: Pool<SqliteConnectionManager>,
    db_path: Option<PathBuf>,
}

impl SqlitePersistence {
    /// Opens the pool and runs migrations. Every pooled connection to an in-memory
    /// database is a separate database, so memory stores use a single connection
    /// that is never recycled.
    pub fn bootstrap(config: SqliteConfig) -> Result<Self> {
        let busy_timeout = config.busy_timeout;
        let is_memory = matches!(config.path, SqlitePath::Memory);
        let manager = config
            .path
            .to_manager()
            .with_init(move |conn| Self::configure_connection(conn, busy_timeout, is_memory));

        let mut builder = Pool::builder().connection_timeout(Duration::from_secs(5));
        builder = if is_memory {
            builder.max_size(1).idle_timeout(None).max_lifetime(None)
        } else {
            builder.max_size(config.pool_size.max(1))
        };
        let pool = builder
            .build(manager)
            .context("failed to create SQLite connection pool")?;

        {
            let mut conn = pool
                .get()
                .context("failed to acquire SQLite bootstrap connection")?;
            Self::run_migrations(&mut conn)?;
        }

        let db_path = config.path.as_path().map(Path::to_path_buf);
        info!(target: TARGET, path = ?db_path, "session store ready");
        Ok(Self { pool, db_path })
    }

    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|err| anyhow!("failed to obtain SQLite connection: {err}"))
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn configure_connection(
        conn: &mut Connection,
        busy_timeout: Duration,
        is_memory: bool,
    ) -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;
        if !is_memory {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Ok(())
    }

    fn run_migrations(conn: &mut Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                user_id TEXT,
                start_node_id TEXT NOT NULL,
                current_node_id TEXT NOT NULL,
                document TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS sessions_updated_at ON sessions(updated_at_ms);

            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                definition TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );
            "#,
        )
        .context("failed to run session store migrations")?;
        Ok(())
    }

    /// Replaces the whole session document in one transaction.
    pub fn write_session(&self, record: &SessionRecord) -> Result<()> {
        let document =
            serde_json::to_string(record).context("failed to serialize session record")?;
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .context("failed to open transaction for session write")?;

        tx.execute(
            "INSERT INTO sessions (
                session_id,
                agent_id,
                user_id,
                start_node_id,
                current_node_id,
                document,
                created_at_ms,
                updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(session_id) DO UPDATE SET
                agent_id=excluded.agent_id,
                user_id=excluded.user_id,
                start_node_id=excluded.start_node_id,
                current_node_id=excluded.current_node_id,
                document=excluded.document,
                updated_at_ms=excluded.updated_at_ms
            ",
            params![
                record.session_id,
                record.agent_id,
                record.user_id.as_deref(),
                record.start_node_id,
                record.state.current_node_id,
                document,
                record.created_at_ms,
                record.updated_at_ms,
            ],
        )
        .context("failed to write session record")?;

        tx.commit().context("failed to commit session write")?;
        debug!(target: TARGET, session_id = %record.session_id, "session persisted");
        Ok(())
    }

    pub fn read_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.connection()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read session record")?;

        document
            .map(|document| {
                serde_json::from_str(&document)
                    .with_context(|| format!("corrupt session document {session_id}"))
            })
            .transpose()
    }

    pub fn remove_session(&self, session_id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn
            .execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
            .context("failed to delete session record")?;
        Ok(affected > 0)
    }

    /// Stores an agent definition after checking that it parses.
    pub fn write_agent(&self, definition: &str) -> Result<Arc<AgentDefinition>> {
        let agent = AgentDefinition::from_json(definition).context("invalid agent definition")?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO agents (agent_id, definition, created_at_ms) VALUES (?1, ?2, ?3)
            ON CONFLICT(agent_id) DO UPDATE SET definition=excluded.definition",
            params![agent.agent_id, definition, crate::flow::state::now_ms()],
        )
        .context("failed to write agent definition")?;
        Ok(Arc::new(agent))
    }

    pub fn read_agent(&self, agent_id: &str) -> Result<Option<Arc<AgentDefinition>>> {
        let conn = self.connection()?;
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read agent definition")?;

        definition
            .map(|source| {
                AgentDefinition::from_json(&source)
                    .map(Arc::new)
                    .with_context(|| format!("stored agent {agent_id} no longer parses"))
            })
            .transpose()
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePersistence) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(store))
            .await
            .context("SQLite task panicked")?
    }
}

#[async_trait]
impl SessionStore for SqlitePersistence {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.blocking(move |store| store.read_session(&session_id)).await
    }

    async fn replace_session(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |store| store.write_session(&record)).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.blocking(move |store| store.remove_session(&session_id)).await
    }
}

#[async_trait]
impl AgentStore for SqlitePersistence {
    async fn load_agent(&self, agent_id: &str) -> Result<Option<Arc<AgentDefinition>>> {
        let agent_id = agent_id.to_string();
        self.blocking(move |store| store.read_agent(&agent_id)).await
    }
}
