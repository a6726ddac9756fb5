use thiserror::Error;

/// Errors that reach callers of the session API. Everything that goes wrong
/// inside a turn is absorbed by the engine instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("agent {0} not found")]
    AgentNotFound(String),
    #[error("session storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SessionError::SessionNotFound(_) | SessionError::AgentNotFound(_)
        )
    }
}
