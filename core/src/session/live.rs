//! Bridges a call's transcription stream to its session.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::transcription::TranscriptEvent;

use super::{SendMessageResponse, SessionError, SessionManager};

const TARGET: &str = "session_manager";

type EndpointResult = Result<Option<SendMessageResponse>, SessionError>;

/// Feeds recognizer endpoints of one call into [`SessionManager::submit_endpoint`]
/// and forwards each committed response downstream, typically to speech synthesis.
pub struct LiveCallBridge {
    manager: Arc<SessionManager>,
    session_id: String,
}

impl LiveCallBridge {
    pub fn new(manager: Arc<SessionManager>, session_id: impl Into<String>) -> Self {
        Self {
            manager,
            session_id: session_id.into(),
        }
    }

    /// Runs until the transcript stream ends, the response receiver is dropped,
    /// or the session turns out not to exist. Turns still generating when the
    /// stream ends are awaited before returning.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<TranscriptEvent>,
        responses: mpsc::Sender<SendMessageResponse>,
    ) -> Result<(), SessionError> {
        let mut turns: JoinSet<EndpointResult> = JoinSet::new();
        let mut stream_open = true;

        info!(target: TARGET, session_id = %self.session_id, "live call bridge started");

        while stream_open || !turns.is_empty() {
            tokio::select! {
                event = events.recv(), if stream_open => match event {
                    Some(TranscriptEvent::Endpoint(text)) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        debug!(target: TARGET, session_id = %self.session_id, utterance = %text, "endpoint received");
                        turns.spawn(self.manager.submit_endpoint(&self.session_id, text));
                    }
                    Some(TranscriptEvent::Error { code, message }) => {
                        warn!(
                            target: TARGET,
                            session_id = %self.session_id,
                            code = ?code,
                            message = %message,
                            "transcription error"
                        );
                    }
                    Some(TranscriptEvent::Finished) | None => stream_open = false,
                    Some(_) => {}
                },
                Some(joined) = turns.join_next(), if !turns.is_empty() => match joined {
                    Ok(Ok(Some(response))) => {
                        let end_call = response.should_end_call;
                        if responses.send(response).await.is_err() {
                            debug!(target: TARGET, session_id = %self.session_id, "response receiver dropped");
                            break;
                        }
                        if end_call {
                            info!(target: TARGET, session_id = %self.session_id, "call ended by flow");
                            stream_open = false;
                        }
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(err)) if err.is_not_found() => return Err(err),
                    Ok(Err(err)) => {
                        warn!(target: TARGET, session_id = %self.session_id, %err, "endpoint turn failed");
                    }
                    Err(err) => {
                        warn!(target: TARGET, session_id = %self.session_id, %err, "endpoint task failed");
                    }
                },
            }
        }

        info!(target: TARGET, session_id = %self.session_id, "live call bridge stopped");
        Ok(())
    }
}
