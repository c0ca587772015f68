//! Session store trait definition.

use chrono::{DateTime, Utc};

use gemchat_types::chat::{Message, Session, SessionId};
use gemchat_types::error::StoreError;
use gemchat_types::llm::GenerationParameters;

/// Owner of all session state.
///
/// Implementations must serialize mutations on one id and must never let a
/// reader see a half-applied turn. Readers receive cloned snapshots.
pub trait SessionStore: Send + Sync {
    /// Allocate a session with a fresh id and store the seed verbatim.
    fn create(
        &self,
        model_name: &str,
        default_params: GenerationParameters,
        seed_history: Vec<Message>,
    ) -> impl std::future::Future<Output = Result<Session, StoreError>> + Send;

    /// Snapshot of a session, or `None` when it does not exist.
    fn get(
        &self,
        id: &SessionId,
    ) -> impl std::future::Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Append a user/model pair in one step and bump `last_active_at`.
    ///
    /// Returns the updated snapshot. On `NotFound` nothing changes.
    fn append_turn(
        &self,
        id: &SessionId,
        user_message: Message,
        model_message: Message,
    ) -> impl std::future::Future<Output = Result<Session, StoreError>> + Send;

    /// Remove a session. A missing id reports `NotFound` every time.
    fn delete(
        &self,
        id: &SessionId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove sessions last active before `cutoff`, skipping those for which
    /// `is_busy` holds.
    ///
    /// `is_busy` must be evaluated atomically with each removal: a session
    /// must not be read between the check and its removal.
    fn evict_idle<F>(
        &self,
        cutoff: DateTime<Utc>,
        is_busy: F,
    ) -> impl std::future::Future<Output = Result<Vec<SessionId>, StoreError>> + Send
    where
        F: Fn(&SessionId) -> bool + Send;

    /// Number of live sessions.
    fn count(&self) -> impl std::future::Future<Output = Result<usize, StoreError>> + Send;
}
