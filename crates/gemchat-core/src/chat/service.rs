//! Chat service orchestrating the session lifecycle.
//!
//! ChatService validates requests, reads and mutates sessions through the
//! SessionStore, and talks to the backend either directly (unary turns) or
//! through the streaming coordinator. Every turn runs under its session's
//! turn permit, so concurrent sends on one session are applied one after
//! another, each on top of the history the previous one left behind.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use gemchat_types::chat::{Message, Role, Session, SessionId};
use gemchat_types::error::{SessionError, StoreError};
use gemchat_types::llm::{BackendError, GenerationParameters, GenerationRequest};

use crate::llm::box_backend::BoxBackend;
use crate::sync::TurnLocks;

use super::store::SessionStore;
use super::stream::{TurnInput, TurnStream, open_turn_stream};
use super::validate;

/// Input for [`ChatService::start_session`].
#[derive(Debug, Clone, Default)]
pub struct StartSession {
    pub model_name: String,
    pub seed_history: Vec<Message>,
    pub default_params: GenerationParameters,
}

/// A freshly created session.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: SessionId,
    pub history: Vec<Message>,
}

/// Input for [`ChatService::send_message`].
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub session_id: SessionId,
    pub content: Message,
    /// Replaces the session default for this call only.
    pub params: Option<GenerationParameters>,
    pub stream: bool,
}

/// Result of a completed unary turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub reply: Message,
    /// Full history including the new turn.
    pub history: Vec<Message>,
}

/// What [`ChatService::send_message`] hands back.
#[derive(Debug)]
pub enum SendOutcome {
    Complete(TurnReply),
    Streaming(TurnStream),
}

/// Backend call limits. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendTimeouts {
    /// Whole unary call.
    pub request: Option<Duration>,
    /// Gap between two stream fragments.
    pub stream_idle: Option<Duration>,
}

/// Session lifecycle manager.
///
/// Generic over `SessionStore` (gemchat-core never depends on gemchat-infra).
pub struct ChatService<S: SessionStore> {
    store: Arc<S>,
    backend: Arc<BoxBackend>,
    turn_locks: TurnLocks,
    timeouts: BackendTimeouts,
}

impl<S: SessionStore + 'static> ChatService<S> {
    pub fn new(store: Arc<S>, backend: BoxBackend) -> Self {
        Self {
            store,
            backend: Arc::new(backend),
            turn_locks: TurnLocks::new(),
            timeouts: BackendTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: BackendTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    // --- Session lifecycle ---

    /// Create a session, optionally seeded with prior turns.
    ///
    /// Fails with `InvalidRequest` for a blank model name and with
    /// `InvalidSeedHistory` for a malformed seed; neither creates a session.
    pub async fn start_session(&self, req: StartSession) -> Result<StartedSession, SessionError> {
        let model_name = validate::model_name(&req.model_name)?;
        validate::seed_history(&req.seed_history)?;

        let session = self
            .store
            .create(&model_name, req.default_params, req.seed_history)
            .await
            .map_err(|e| self.store_failure(None, e))?;

        info!(
            session_id = %session.id,
            model = %session.model_name,
            seed_len = session.history.len(),
            "Started chat session"
        );

        Ok(StartedSession {
            session_id: session.id,
            history: session.history,
        })
    }

    /// Ordered history of a session.
    pub async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Message>, SessionError> {
        Ok(self.load(session_id).await?.history)
    }

    /// Remove a session. Deleting a missing session reports `SessionNotFound`.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.store
            .delete(session_id)
            .await
            .map_err(|e| self.store_failure(Some(*session_id), e))?;
        info!(session_id = %session_id, "Deleted chat session");
        Ok(())
    }

    pub async fn session_count(&self) -> Result<usize, SessionError> {
        self.store
            .count()
            .await
            .map_err(|e| self.store_failure(None, e))
    }

    // --- Turns ---

    /// Submit user content, streamed or not according to `req.stream`.
    pub async fn send_message(&self, req: SendMessage) -> Result<SendOutcome, SessionError> {
        if req.stream {
            self.send_message_stream(&req.session_id, req.content, req.params)
                .await
                .map(SendOutcome::Streaming)
        } else {
            self.send_message_unary(&req.session_id, req.content, req.params)
                .await
                .map(SendOutcome::Complete)
        }
    }

    /// Run one unary turn.
    ///
    /// On any backend failure the history is left exactly as it was.
    pub async fn send_message_unary(
        &self,
        session_id: &SessionId,
        content: Message,
        params: Option<GenerationParameters>,
    ) -> Result<TurnReply, SessionError> {
        validate::user_content(&content)?;
        let started = Instant::now();

        let _permit = self.turn_locks.acquire(*session_id).await;
        let session = self.load(session_id).await?;
        let request = build_request(session, &content, params);

        let span = info_span!(
            "gen_ai.generate",
            gen_ai.system = self.backend.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.temperature = ?request.params.temperature,
            gen_ai.request.max_tokens = ?request.params.max_output_tokens,
            gen_ai.request.stream = false,
            session_id = %session_id,
        );

        let generated = with_timeout(self.timeouts.request, self.backend.generate(&request))
            .instrument(span)
            .await;
        let reply = match generated {
            Ok(message) => Message::new(Role::Model, message.parts),
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    error = %err,
                    transient = err.is_transient(),
                    "Backend call failed, turn not committed"
                );
                return Err(SessionError::backend(*session_id, err));
            }
        };

        let updated = self
            .store
            .append_turn(session_id, content, reply.clone())
            .await
            .map_err(|e| self.store_failure(Some(*session_id), e))?;

        info!(
            session_id = %session_id,
            history_len = updated.history.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn committed"
        );

        Ok(TurnReply {
            session_id: *session_id,
            reply,
            history: updated.history,
        })
    }

    /// Start a streamed turn.
    ///
    /// Waits for the session's turn permit, then returns a stream that owns
    /// it. Validation and lookup failures are returned here; backend
    /// failures arrive as stream items.
    pub async fn send_message_stream(
        &self,
        session_id: &SessionId,
        content: Message,
        params: Option<GenerationParameters>,
    ) -> Result<TurnStream, SessionError> {
        validate::user_content(&content)?;

        let permit = self.turn_locks.acquire(*session_id).await;
        let session = self.load(session_id).await?;
        let params = params.unwrap_or_else(|| session.default_params.clone());

        Ok(open_turn_stream(
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            TurnInput {
                session,
                user_message: content,
                params,
                permit,
            },
            self.timeouts.stream_idle,
        ))
    }

    // --- Idle eviction ---

    /// Remove sessions idle for longer than `ttl`. Sessions with a turn in
    /// flight or queued are skipped; the check is made as each session is
    /// removed, so a turn admitted mid-sweep keeps its session.
    ///
    /// Returns the number of sessions removed.
    pub async fn evict_idle(&self, ttl: Duration) -> Result<usize, SessionError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SessionError::InvalidRequest(format!("idle ttl out of range: {e}")))?;
        let cutoff = Utc::now() - ttl;
        let locks = &self.turn_locks;

        let evicted = self
            .store
            .evict_idle(cutoff, |id: &SessionId| locks.is_busy(id))
            .await
            .map_err(|e| self.store_failure(None, e))?;

        for id in &evicted {
            debug!(session_id = %id, "Evicted idle session");
        }
        Ok(evicted.len())
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until `cancel` fires.
    pub fn spawn_idle_sweeper(
        self: Arc<Self>,
        ttl: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Idle session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.evict_idle(ttl).await {
                            Ok(0) => {}
                            Ok(evicted) => info!(evicted, ttl_secs = ttl.as_secs(), "Evicted idle sessions"),
                            Err(e) => warn!(error = %e, "Idle session sweep failed"),
                        }
                    }
                }
            }
        })
    }

    // --- Helpers ---

    async fn load(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        self.store
            .get(session_id)
            .await
            .map_err(|e| self.store_failure(Some(*session_id), e))?
            .ok_or(SessionError::SessionNotFound(*session_id))
    }

    fn store_failure(&self, session_id: Option<SessionId>, err: StoreError) -> SessionError {
        match (session_id, err) {
            (Some(id), err) => {
                let mapped = SessionError::from_store(id, err);
                if let SessionError::InternalStore(msg) = &mapped {
                    error!(session_id = %id, error = %msg, "Session store failure");
                }
                mapped
            }
            (None, StoreError::NotFound) => {
                SessionError::InternalStore("store reported a missing session".to_string())
            }
            (None, StoreError::Internal(msg)) => {
                error!(error = %msg, "Session store failure");
                SessionError::InternalStore(msg)
            }
        }
    }
}

/// History plus the new user message, with the effective parameters.
fn build_request(
    session: Session,
    content: &Message,
    params: Option<GenerationParameters>,
) -> GenerationRequest {
    let params = params.unwrap_or(session.default_params);
    let mut contents = session.history;
    contents.push(content.clone());
    GenerationRequest {
        model: session.model_name,
        contents,
        params,
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                after_ms: limit.as_millis() as u64,
            }),
        },
        None => call.await,
    }
}
