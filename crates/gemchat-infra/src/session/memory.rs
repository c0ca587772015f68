//! In-memory [`SessionStore`] backed by a sharded concurrent map.
//!
//! Each session lives in one `DashMap` entry. A turn is appended while the
//! entry's shard write guard is held, so readers of that id observe either
//! the history before the turn or after it, never half of it. Sessions on
//! other shards are never blocked.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use gemchat_core::chat::store::SessionStore;
use gemchat_types::chat::{Message, Session, SessionId};
use gemchat_types::error::StoreError;
use gemchat_types::llm::GenerationParameters;

/// Process-local session store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        model_name: &str,
        default_params: GenerationParameters,
        seed_history: Vec<Message>,
    ) -> Result<Session, StoreError> {
        let session = Session::new(
            SessionId::new(),
            model_name.to_string(),
            default_params,
            seed_history,
        );

        // v7 ids do not collide in practice; a clash would be a bug elsewhere.
        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => Err(StoreError::Internal(format!(
                "session id {} already allocated",
                session.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                debug!(session_id = %session.id, "Session stored");
                Ok(session)
            }
        }
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(id).map(|entry| entry.value().clone()))
    }

    async fn append_turn(
        &self,
        id: &SessionId,
        user_message: Message,
        model_message: Message,
    ) -> Result<Session, StoreError> {
        let mut entry = self.sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        let session = entry.value_mut();
        session.history.reserve(2);
        session.history.push(user_message);
        session.history.push(model_message);
        session.last_active_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn evict_idle<F>(
        &self,
        cutoff: DateTime<Utc>,
        is_busy: F,
    ) -> Result<Vec<SessionId>, StoreError>
    where
        F: Fn(&SessionId) -> bool + Send,
    {
        let mut evicted = Vec::new();
        // `retain` holds each shard's write lock while deciding, so no reader
        // slips in between the busy check and the removal.
        self.sessions.retain(|id, session| {
            let idle = session.last_active_at < cutoff && !is_busy(id);
            if idle {
                evicted.push(*id);
            }
            !idle
        });
        Ok(evicted)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use gemchat_types::chat::Role;

    use super::*;

    async fn seeded(store: &InMemorySessionStore) -> Session {
        store
            .create(
                "gemini-test",
                GenerationParameters::default(),
                vec![Message::user("hello"), Message::model("hi there")],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_get_returns_seed() {
        let store = InMemorySessionStore::new();
        let session = seeded(&store).await;

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.model_name, "gemini-test");
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[0].role, Role::User);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_allocates_distinct_ids() {
        let store = InMemorySessionStore::new();
        let a = seeded(&store).await;
        let b = seeded(&store).await;
        assert_ne!(a.id, b.id);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get(&SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_turn_adds_pair_and_touches_session() {
        let store = InMemorySessionStore::new();
        let session = seeded(&store).await;

        let updated = store
            .append_turn(&session.id, Message::user("q"), Message::model("a"))
            .await
            .unwrap();
        assert_eq!(updated.history.len(), 4);
        assert_eq!(updated.history[2], Message::user("q"));
        assert_eq!(updated.history[3], Message::model("a"));
        assert!(updated.last_active_at >= session.last_active_at);
        assert_eq!(updated.created_at, session.created_at);
    }

    #[tokio::test]
    async fn append_turn_unknown_is_not_found() {
        let store = InMemorySessionStore::new();
        let err = store
            .append_turn(&SessionId::new(), Message::user("q"), Message::model("a"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn snapshots_are_detached() {
        let store = InMemorySessionStore::new();
        let session = seeded(&store).await;
        let before = store.get(&session.id).await.unwrap().unwrap();

        store
            .append_turn(&session.id, Message::user("q"), Message::model("a"))
            .await
            .unwrap();
        assert_eq!(before.history.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_not_idempotent() {
        let store = InMemorySessionStore::new();
        let session = seeded(&store).await;

        store.delete(&session.id).await.unwrap();
        assert_eq!(store.delete(&session.id).await.unwrap_err(), StoreError::NotFound);
        assert!(store.get(&session.id).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn evict_idle_respects_cutoff_and_busy_sessions() {
        let store = InMemorySessionStore::new();
        let a = seeded(&store).await;
        let b = seeded(&store).await;
        let c = seeded(&store).await;

        let future = Utc::now() + ChronoDuration::seconds(5);
        let mut evicted = store
            .evict_idle(future, |id: &SessionId| *id == b.id)
            .await
            .unwrap();
        evicted.sort();
        let mut expected = vec![a.id, c.id];
        expected.sort();
        assert_eq!(evicted, expected);

        assert!(store.get(&b.id).await.unwrap().is_some());
        assert_eq!(store.count().await.unwrap(), 1);

        let past = Utc::now() - ChronoDuration::seconds(60);
        assert!(store.evict_idle(past, |_: &SessionId| false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_keep_pairs_adjacent() {
        let store = Arc::new(InMemorySessionStore::new());
        let session = store
            .create("m", GenerationParameters::default(), vec![])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            let id = session.id;
            handles.push(tokio::spawn(async move {
                store
                    .append_turn(
                        &id,
                        Message::user(format!("q{i}")),
                        Message::model(format!("a{i}")),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = store.get(&session.id).await.unwrap().unwrap().history;
        assert_eq!(history.len(), 64);
        for pair in history.chunks(2) {
            let q = pair[0].text();
            let a = pair[1].text();
            assert_eq!(q.trim_start_matches('q'), a.trim_start_matches('a'));
        }
    }
}
