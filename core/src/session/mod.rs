//! Session lifecycle: one engine per live call, cached in process and persisted
//! after every turn.
//!
//! The durable store is the source of truth; the cache only saves a reload. Two
//! processes racing on the same session may both rebuild from one snapshot, in
//! which case the last persisted turn wins.

mod cache;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod live;
pub mod types;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::flow::state::now_ms;
use crate::flow::{CallFlowEngine, EngineState, PendingTurn, TurnOutcome};
use crate::persistence::{AgentStore, SessionRecord, SessionStore};
use crate::specialists::SpecialistTeam;
use crate::telemetry::events::record_session_lifecycle;

use cache::SessionCache;
use generation::{AbortOnDrop, GenerationTicket, GenerationTracker};

pub use error::SessionError;
pub use generation::GenerationStatus;
pub use lifecycle::{SessionLifecyclePayload, SessionLifecyclePhase, SessionLifecycleUpdate};
pub use live::LiveCallBridge;
pub use types::{SendMessageResponse, StartSession, StartedSession};

const TARGET: &str = "session_manager";
const LIFECYCLE_BUFFER: usize = 32;

/// A cached session: its engine behind an async lock that serializes turns, plus
/// the record fields the engine does not own.
pub struct ActiveSession {
    session_id: String,
    agent_id: String,
    user_id: Option<String>,
    start_node_id: String,
    created_at_ms: i64,
    last_active_ms: AtomicI64,
    deleted: AtomicBool,
    engine: Mutex<CallFlowEngine>,
}

impl ActiveSession {
    fn new(record: &SessionRecord, engine: CallFlowEngine) -> Self {
        Self {
            session_id: record.session_id.clone(),
            agent_id: record.agent_id.clone(),
            user_id: record.user_id.clone(),
            start_node_id: record.start_node_id.clone(),
            created_at_ms: record.created_at_ms,
            last_active_ms: AtomicI64::new(record.updated_at_ms),
            deleted: AtomicBool::new(false),
            engine: Mutex::new(engine),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Waits for any in-flight turn of this session to finish.
    pub async fn lock(&self) -> MutexGuard<'_, CallFlowEngine> {
        self.engine.lock().await
    }

    /// Set by teardown; a deleted session never runs or persists another turn.
    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    fn is_idle(&self) -> bool {
        self.engine.try_lock().is_ok()
    }

    fn touch(&self, now_ms: i64) {
        self.last_active_ms.store(now_ms, Ordering::Release);
    }

    fn is_stale(&self, now_ms: i64, window: Duration) -> bool {
        is_past_window(self.last_active_ms.load(Ordering::Acquire), now_ms, window)
    }

    fn record(&self, engine: &CallFlowEngine, updated_at_ms: i64) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            user_id: self.user_id.clone(),
            start_node_id: self.start_node_id.clone(),
            state: engine.state().clone(),
            turn_count: engine.turn_count(),
            created_at_ms: self.created_at_ms,
            updated_at_ms,
        }
    }
}

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    agents: Arc<dyn AgentStore>,
    team: Arc<SpecialistTeam>,
    settings: SessionSettings,
    cache: StdMutex<SessionCache<Arc<ActiveSession>>>,
    generations: GenerationTracker,
    lifecycle_tx: broadcast::Sender<SessionLifecycleUpdate>,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        agents: Arc<dyn AgentStore>,
        team: Arc<SpecialistTeam>,
        settings: SessionSettings,
    ) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_BUFFER);
        let cache = StdMutex::new(SessionCache::new(settings.cache_capacity));
        Self {
            sessions,
            agents,
            team,
            settings,
            cache,
            generations: GenerationTracker::new(),
            lifecycle_tx,
        }
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionLifecycleUpdate> {
        self.lifecycle_tx.subscribe()
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache().len()
    }

    /// Creates a session, speaks its opening script if any, and persists it
    /// before returning.
    pub async fn start_session(&self, request: StartSession) -> Result<StartedSession, SessionError> {
        let agent = self
            .agents
            .load_agent(&request.agent_id)
            .await
            .context("failed to load agent definition")?
            .ok_or_else(|| SessionError::AgentNotFound(request.agent_id.clone()))?;

        let session_id = Uuid::new_v4().to_string();
        let engine = CallFlowEngine::start(
            session_id.clone(),
            Arc::clone(&agent),
            Arc::clone(&self.team),
            request.seed,
            request.start_node_id.as_deref(),
        );

        let now = now_ms();
        let record = SessionRecord {
            session_id: session_id.clone(),
            agent_id: agent.agent_id.clone(),
            user_id: request.user_id,
            start_node_id: engine.state().current_node_id.clone(),
            state: engine.state().clone(),
            turn_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.sessions
            .replace_session(&record)
            .await
            .context("failed to persist new session")?;

        let started = StartedSession {
            session_id: session_id.clone(),
            current_node_id: engine.state().current_node_id.clone(),
            opening_text: engine.opening_text().map(str::to_string),
        };
        self.cache_insert(&session_id, Arc::new(ActiveSession::new(&record, engine)));

        info!(
            target: TARGET,
            session_id = %session_id,
            agent_id = %record.agent_id,
            node_id = %started.current_node_id,
            "session started"
        );
        self.emit_lifecycle(SessionLifecycleUpdate::new(
            session_id,
            SessionLifecyclePhase::Started,
        ));
        Ok(started)
    }

    /// Returns the live session, rebuilding it from the store on a cache miss.
    /// Sessions idle past the inactivity window are removed and reported missing.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<ActiveSession>, SessionError> {
        let window = self.settings.inactivity_window();
        let cached = self.cache().get(session_id);
        if let Some(session) = cached {
            if !session.is_stale(now_ms(), window) {
                return Ok(session);
            }
            self.cache().remove(session_id);
            return Err(self.expire(session_id).await);
        }

        let record = self
            .sessions
            .load_session(session_id)
            .await
            .context("failed to load session record")?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        if is_past_window(record.updated_at_ms, now_ms(), window) {
            return Err(self.expire(session_id).await);
        }

        let agent = self
            .agents
            .load_agent(&record.agent_id)
            .await
            .context("failed to load agent definition")?
            .ok_or_else(|| SessionError::AgentNotFound(record.agent_id.clone()))?;

        let engine = CallFlowEngine::restore(
            session_id,
            agent,
            Arc::clone(&self.team),
            record.state.clone(),
            record.turn_count,
        );
        let restored = Arc::new(ActiveSession::new(&record, engine));
        let session = self.cache_insert(session_id, Arc::clone(&restored));

        if Arc::ptr_eq(&session, &restored) {
            debug!(target: TARGET, session_id, turn = record.turn_count, "session restored from store");
            self.emit_lifecycle(SessionLifecycleUpdate::new(
                session_id,
                SessionLifecyclePhase::Restored,
            ));
        }
        Ok(session)
    }

    /// Runs one caller turn. Turns of the same session queue behind each other.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<SendMessageResponse, SessionError> {
        let session = self.get_or_create(session_id).await?;
        let mut engine = session.lock().await;
        if session.is_deleted() {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        let task = AbortOnDrop(tokio::spawn(engine.begin_turn(text).run()));
        let outcome = match await_turn(task).await {
            Ok(pending) => engine.commit(pending),
            Err(diagnostic) => engine.commit_fallback(text, diagnostic),
        };

        Ok(self.finish_turn(&session, &engine, outcome).await)
    }

    /// Submits a recognizer endpoint for a live call.
    ///
    /// The ticket is opened immediately, before the returned future is polled, so
    /// endpoints are ordered by submission. A previous turn of the same session
    /// that is still generating is cancelled and its words are folded into this
    /// one. Resolves to `None` when this turn is itself superseded.
    pub fn submit_endpoint(
        self: &Arc<Self>,
        session_id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Option<SendMessageResponse>, SessionError>>
           + Send
           + 'static {
        let ticket = self.generations.begin(session_id, text);
        let manager = Arc::clone(self);
        let session_id = session_id.to_string();
        async move {
            let result = manager.generate(&session_id, &ticket).await;
            manager.generations.finish(&session_id, &ticket);
            result
        }
    }

    async fn generate(
        &self,
        session_id: &str,
        ticket: &Arc<GenerationTicket>,
    ) -> Result<Option<SendMessageResponse>, SessionError> {
        let session = self.get_or_create(session_id).await?;
        let mut engine = session.lock().await;
        if session.is_deleted() {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        if ticket.status() == GenerationStatus::Cancelled {
            debug!(target: TARGET, session_id, ticket = ticket.id(), "turn superseded before start");
            return Ok(None);
        }

        let job = engine.begin_turn(ticket.utterance());
        let claim = Arc::clone(ticket);
        let mut task = AbortOnDrop(tokio::spawn(async move {
            let pending = job.run().await;
            let claimed = claim.try_commit();
            (pending, claimed)
        }));
        ticket.attach(task.0.abort_handle());

        let outcome = match (&mut task.0).await {
            Ok((pending, true)) => engine.commit(pending),
            Ok((_, false)) => {
                debug!(target: TARGET, session_id, ticket = ticket.id(), "turn superseded");
                return Ok(None);
            }
            Err(err) if err.is_cancelled() => {
                debug!(target: TARGET, session_id, ticket = ticket.id(), "turn cancelled");
                return Ok(None);
            }
            Err(err) => {
                // the ticket never reached its commit claim, so nothing else will answer
                engine.commit_fallback(ticket.utterance(), format!("turn task failed: {err}"))
            }
        };

        Ok(Some(self.finish_turn(&session, &engine, outcome).await))
    }

    /// Snapshot of the session's conversational state.
    pub async fn get_session(&self, session_id: &str) -> Result<EngineState, SessionError> {
        let session = self.get_or_create(session_id).await?;
        let engine = session.lock().await;
        Ok(engine.state().clone())
    }

    /// Tears a session down: cancels generation, drops the cached engine and
    /// deletes the durable record. A turn already running finishes first, so its
    /// persist cannot write the record back afterwards; turns queued behind it
    /// see the session as missing.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.generations.cancel(session_id);
        let cached = self.cache().remove(session_id);
        if let Some(session) = &cached {
            session.mark_deleted();
            let _in_flight = session.lock().await;
        }

        let stored = self
            .sessions
            .delete_session(session_id)
            .await
            .context("failed to delete session record")?;

        if cached.is_none() && !stored {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        info!(target: TARGET, session_id, "session deleted");
        self.emit_lifecycle(SessionLifecycleUpdate::new(
            session_id,
            SessionLifecyclePhase::Deleted,
        ));
        Ok(())
    }

    /// Overwrites the durable record with the engine's current state. Variables,
    /// history and node are written as one document.
    pub async fn persist(&self, session: &ActiveSession, engine: &CallFlowEngine) -> Result<(), SessionError> {
        let now = now_ms();
        self.sessions
            .replace_session(&session.record(engine, now))
            .await
            .context("failed to persist session")?;
        session.touch(now);
        Ok(())
    }

    async fn finish_turn(
        &self,
        session: &ActiveSession,
        engine: &CallFlowEngine,
        mut outcome: TurnOutcome,
    ) -> SendMessageResponse {
        let persisted = if session.is_deleted() {
            Ok(())
        } else {
            self.persist(session, engine).await
        };
        if let Err(err) = persisted {
            warn!(
                target: TARGET,
                session_id = %session.session_id,
                turn = engine.turn_count(),
                %err,
                "turn committed but not persisted"
            );
            session.touch(now_ms());
            let note = format!("session not persisted: {err}");
            outcome.diagnostic = Some(match outcome.diagnostic.take() {
                Some(existing) => format!("{existing}; {note}"),
                None => note,
            });
        }

        self.emit_lifecycle(SessionLifecycleUpdate::turn_completed(
            session.session_id.clone(),
            engine.turn_count(),
            outcome.current_node_id.clone(),
            outcome.end_call,
        ));
        SendMessageResponse::new(outcome, engine.state())
    }

    async fn expire(&self, session_id: &str) -> SessionError {
        info!(target: TARGET, session_id, "session expired after inactivity");
        self.generations.cancel(session_id);
        if let Err(err) = self.sessions.delete_session(session_id).await {
            warn!(target: TARGET, session_id, %err, "failed to remove expired session");
        }
        self.emit_lifecycle(SessionLifecycleUpdate::new(
            session_id,
            SessionLifecyclePhase::Expired,
        ));
        SessionError::SessionNotFound(session_id.to_string())
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, SessionCache<Arc<ActiveSession>>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_insert(&self, session_id: &str, session: Arc<ActiveSession>) -> Arc<ActiveSession> {
        self.cache()
            .insert_if_absent(session_id, session, |cached| cached.is_idle())
    }

    fn emit_lifecycle(&self, update: SessionLifecycleUpdate) {
        record_session_lifecycle(&update.session_id, update.phase.as_str());
        if self.lifecycle_tx.send(update).is_err() {
            debug!(target: TARGET, "no lifecycle subscribers");
        }
    }
}

/// Awaits a spawned turn. A panic inside the turn becomes a diagnostic for the
/// fallback response.
async fn await_turn(mut task: AbortOnDrop<PendingTurn>) -> Result<PendingTurn, String> {
    (&mut task.0)
        .await
        .map_err(|err| format!("turn task failed: {err}"))
}

fn is_past_window(updated_at_ms: i64, now_ms: i64, window: Duration) -> bool {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(updated_at_ms) > window_ms
}
