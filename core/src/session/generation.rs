//! Tracks the turn currently being generated for each live call so a newer
//! endpoint can supersede it.
//!
//! A ticket moves from `Generating` to exactly one of `Committed` or `Cancelled`
//! through a compare-and-swap, so a response that already claimed its commit can
//! never be cancelled, and a cancelled one can never be committed. The tracker is
//! process-local; replicas do not coordinate cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

const TARGET: &str = "session_manager";

const GENERATING: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Generating,
    Committed,
    Cancelled,
}

impl GenerationStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            GENERATING => GenerationStatus::Generating,
            COMMITTED => GenerationStatus::Committed,
            _ => GenerationStatus::Cancelled,
        }
    }
}

pub struct GenerationTicket {
    id: u64,
    utterance: String,
    status: AtomicU8,
    abort: Mutex<Option<AbortHandle>>,
}

impl GenerationTicket {
    fn new(id: u64, utterance: String) -> Self {
        Self {
            id,
            utterance,
            status: AtomicU8::new(GENERATING),
            abort: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Caller text for this turn, including any superseded utterances.
    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    pub fn status(&self) -> GenerationStatus {
        GenerationStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Claims the commit. Fails if the ticket was cancelled first.
    pub fn try_commit(&self) -> bool {
        self.status
            .compare_exchange(GENERATING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Cancels a ticket that is still generating and aborts its task. Fails if
    /// the turn already claimed its commit.
    pub fn try_cancel(&self) -> bool {
        let cancelled = self
            .status
            .compare_exchange(GENERATING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            if let Some(handle) = self.abort_slot().take() {
                handle.abort();
            }
        }
        cancelled
    }

    /// Registers the task doing the work. A ticket cancelled before the task
    /// existed aborts it right away.
    pub fn attach(&self, handle: AbortHandle) {
        let mut slot = self.abort_slot();
        if self.status() == GenerationStatus::Cancelled {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }

    fn abort_slot(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
pub struct GenerationTracker {
    next_id: AtomicU64,
    current: Mutex<HashMap<String, Arc<GenerationTicket>>>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a ticket for a new endpoint. If the session's previous turn is still
    /// generating it is cancelled and its utterance is prepended to this one.
    pub fn begin(&self, session_id: &str, utterance: &str) -> Arc<GenerationTicket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut current = self.lock();

        let utterance = match current.get(session_id) {
            Some(previous) if previous.try_cancel() => {
                debug!(
                    target: TARGET,
                    session_id,
                    superseded = previous.id,
                    ticket = id,
                    "superseding in-flight turn"
                );
                merge_utterances(&previous.utterance, utterance)
            }
            _ => utterance.trim().to_string(),
        };

        let ticket = Arc::new(GenerationTicket::new(id, utterance));
        current.insert(session_id.to_string(), Arc::clone(&ticket));
        ticket
    }

    /// Forgets the ticket unless a newer one already replaced it.
    pub fn finish(&self, session_id: &str, ticket: &GenerationTicket) {
        let mut current = self.lock();
        if current.get(session_id).is_some_and(|active| active.id == ticket.id) {
            current.remove(session_id);
        }
    }

    /// Cancels whatever the session is generating, if anything.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.lock()
            .remove(session_id)
            .is_some_and(|ticket| ticket.try_cancel())
    }

    pub fn active(&self, session_id: &str) -> Option<Arc<GenerationTicket>> {
        self.lock().get(session_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<GenerationTicket>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn merge_utterances(previous: &str, next: &str) -> String {
    match (previous.trim(), next.trim()) {
        ("", next) => next.to_string(),
        (previous, "") => previous.to_string(),
        (previous, next) => format!("{previous} {next}"),
    }
}

/// Aborts the wrapped task when dropped, so abandoning a turn never leaks its
/// generation past the caller.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn newer_endpoint_supersedes_generating_turn() {
        let tracker = GenerationTracker::new();
        let first = tracker.begin("s", "I was");
        let second = tracker.begin("s", " thinking about it ");

        assert_eq!(first.status(), GenerationStatus::Cancelled);
        assert!(!first.try_commit());
        assert_eq!(second.utterance(), "I was thinking about it");
        assert_eq!(second.status(), GenerationStatus::Generating);
    }

    #[test]
    fn committed_turn_is_never_cancelled() {
        let tracker = GenerationTracker::new();
        let first = tracker.begin("s", "yes");
        assert!(first.try_commit());

        let second = tracker.begin("s", "and another thing");
        assert_eq!(first.status(), GenerationStatus::Committed);
        assert!(!first.try_cancel());
        assert_eq!(second.utterance(), "and another thing");
    }

    #[test]
    fn finish_keeps_newer_tickets() {
        let tracker = GenerationTracker::new();
        let first = tracker.begin("s", "one");
        let second = tracker.begin("s", "two");

        tracker.finish("s", &first);
        assert_eq!(tracker.active("s").map(|ticket| ticket.id()), Some(second.id()));

        tracker.finish("s", &second);
        assert!(tracker.active("s").is_none());
    }

    #[test]
    fn sessions_are_tracked_independently() {
        let tracker = GenerationTracker::new();
        let a = tracker.begin("a", "hello");
        let b = tracker.begin("b", "hi");
        assert_eq!(a.status(), GenerationStatus::Generating);
        assert_eq!(b.utterance(), "hi");
    }

    #[tokio::test]
    async fn cancelling_aborts_the_attached_task() {
        let tracker = GenerationTracker::new();
        let ticket = tracker.begin("s", "hello");
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        ticket.attach(task.abort_handle());

        assert!(tracker.cancel("s"));
        let joined = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task finished");
        assert!(joined.expect_err("task aborted").is_cancelled());
    }

    #[tokio::test]
    async fn attaching_after_cancel_aborts_immediately() {
        let ticket = GenerationTracker::new().begin("s", "hello");
        assert!(ticket.try_cancel());

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        ticket.attach(task.abort_handle());
        let joined = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task finished");
        assert!(joined.is_err());
    }
}
