//! Scripted backend and map-backed store shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use gemchat_types::chat::{Message, Role, Session, SessionId};
use gemchat_types::error::StoreError;
use gemchat_types::llm::{BackendError, GenerationParameters, GenerationRequest, StreamFragment};

use crate::chat::store::SessionStore;
use crate::llm::backend::{FragmentStream, GenerativeBackend};

/// What the mock does for the next call.
#[derive(Clone)]
pub enum Script {
    /// Unary: this text. Stream: one delta with this text, then the terminal marker.
    Reply(String),
    /// Fail the call (stream: the first item is this error).
    Fail(BackendError),
    /// Stream exactly these items (unary: their concatenated text).
    Fragments(Vec<Result<StreamFragment, BackendError>>),
    /// Never answer.
    Hang,
}

/// Backend that plays queued scripts, then echoes the last user message.
pub struct MockBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    latency: Duration,
}

impl MockBackend {
    pub fn echo() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Handle for inspecting the requests the backend received.
    pub fn requests(&self) -> Arc<Mutex<Vec<GenerationRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_script(&self, request: &GenerationRequest) -> Script {
        self.requests.lock().unwrap().push(request.clone());
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            let last = request
                .contents
                .last()
                .map(Message::text)
                .unwrap_or_default();
            Script::Reply(format!("echo: {last}"))
        })
    }
}

impl GenerativeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Message, BackendError> {
        let script = self.next_script(request);
        tokio::time::sleep(self.latency).await;
        match script {
            Script::Reply(text) => Ok(Message::model(text)),
            Script::Fail(err) => Err(err),
            Script::Fragments(items) => {
                let mut text = String::new();
                for item in items {
                    text.push_str(&item?.text);
                }
                Ok(Message::model(text))
            }
            Script::Hang => std::future::pending().await,
        }
    }

    fn generate_stream(&self, request: GenerationRequest) -> FragmentStream {
        let script = self.next_script(&request);
        let latency = self.latency;
        Box::pin(async_stream::stream! {
            match script {
                Script::Reply(text) => {
                    tokio::time::sleep(latency).await;
                    yield Ok(StreamFragment::delta(text));
                    yield Ok(StreamFragment::terminal());
                }
                Script::Fail(err) => {
                    yield Err(err);
                }
                Script::Fragments(items) => {
                    for item in items {
                        tokio::time::sleep(latency).await;
                        yield item;
                    }
                }
                Script::Hang => std::future::pending::<()>().await,
            }
        })
    }
}

/// Store backed by a mutex-guarded map. The lock is never held across an await.
#[derive(Default)]
pub struct MapStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MapStore {
    /// Rewind a session's activity clock.
    pub fn set_last_active(&self, id: &SessionId, at: DateTime<Utc>) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.last_active_at = at;
        }
    }
}

impl SessionStore for MapStore {
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
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    async fn append_turn(
        &self,
        id: &SessionId,
        user_message: Message,
        model_message: Message,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        session.history.push(user_message);
        session.history.push(model_message);
        session.last_active_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .unwrap()
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
        let mut sessions = self.sessions.lock().unwrap();
        let idle: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.last_active_at < cutoff && !is_busy(&s.id))
            .map(|s| s.id)
            .collect();
        for id in &idle {
            sessions.remove(id);
        }
        Ok(idle)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.sessions.lock().unwrap().len())
    }
}

/// Assert that every model message directly follows the user message it answers.
pub fn assert_pairs_adjacent(history: &[Message]) {
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User, "history: {history:?}");
        assert_eq!(pair[1].role, Role::Model, "history: {history:?}");
        assert_eq!(
            pair[1].text(),
            format!("echo: {}", pair[0].text()),
            "history: {history:?}"
        );
    }
}
