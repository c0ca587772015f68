use thiserror::Error;

use crate::chat::SessionId;
use crate::llm::BackendError;

/// Errors from session store operations (used by the trait in gemchat-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,

    #[error("store error: {0}")]
    Internal(String),
}

/// Errors surfaced by the session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid seed history: {0}")]
    InvalidSeedHistory(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("backend call for session {session_id} failed: {source}")]
    Backend {
        session_id: SessionId,
        #[source]
        source: BackendError,
    },

    #[error("session store error: {0}")]
    InternalStore(String),
}

impl SessionError {
    /// Attach session context to a store error.
    pub fn from_store(session_id: SessionId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => SessionError::SessionNotFound(session_id),
            StoreError::Internal(msg) => SessionError::InternalStore(msg),
        }
    }

    pub fn backend(session_id: SessionId, source: BackendError) -> Self {
        SessionError::Backend { session_id, source }
    }

    /// True for backend failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Backend { source, .. } if source.is_transient())
    }
}

/// Errors raised while assembling runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {var} is not set")]
    MissingApiKey { var: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
