//! Streaming turn coordinator.
//!
//! Bridges a backend fragment stream to a pull-based [`TurnStream`] and
//! commits the finished turn to the store exactly once. The commit happens
//! only after the backend's terminal fragment arrives; a failed, truncated
//! or dropped stream leaves the session untouched.
//!
//! The coordinator owns the session's turn permit for the whole turn so the
//! next `SendMessage` on the same session sees this turn's result. It holds
//! no store lock while waiting on the backend.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tracing::{Instrument, debug, info, info_span, warn};

use gemchat_types::chat::{Message, Session, SessionId};
use gemchat_types::error::SessionError;
use gemchat_types::llm::{BackendError, GenerationParameters, GenerationRequest, StreamFragment};

use crate::llm::backend::FragmentStream;
use crate::llm::box_backend::BoxBackend;
use crate::sync::TurnPermit;

use super::store::SessionStore;

/// Fragments of one streamed turn.
///
/// Yields the reply as non-terminal fragments, then exactly one terminal
/// fragment once the turn has been committed. An `Err` item ends the stream
/// and means nothing was committed. Dropping the stream early cancels the
/// backend call and commits nothing.
pub struct TurnStream {
    session_id: SessionId,
    inner: Pin<Box<dyn Stream<Item = Result<StreamFragment, SessionError>> + Send + 'static>>,
}

impl TurnStream {
    /// Session this turn belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Stream for TurnStream {
    type Item = Result<StreamFragment, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("session_id", &self.session_id)
            .field("inner", &"<stream>")
            .finish()
    }
}

/// Everything a streamed turn needs once the turn permit is held.
pub(crate) struct TurnInput {
    pub session: Session,
    pub user_message: Message,
    pub params: GenerationParameters,
    pub permit: TurnPermit,
}

/// Start a streamed turn. Nothing is sent to the backend until the first poll.
pub(crate) fn open_turn_stream<S: SessionStore + 'static>(
    store: Arc<S>,
    backend: Arc<BoxBackend>,
    input: TurnInput,
    idle_timeout: Option<Duration>,
) -> TurnStream {
    let TurnInput {
        session,
        user_message,
        params,
        permit,
    } = input;
    let session_id = session.id;

    let mut contents = session.history;
    contents.push(user_message.clone());
    let request = GenerationRequest {
        model: session.model_name,
        contents,
        params,
    };

    let span = info_span!(
        "gen_ai.stream",
        gen_ai.system = backend.name(),
        gen_ai.request.model = %request.model,
        gen_ai.request.stream = true,
        session_id = %session_id,
    );

    let inner = async_stream::try_stream! {
        let turn_permit = permit;
        let started = Instant::now();
        let mut upstream = backend.generate_stream(request);
        let mut reply = String::new();
        let mut fragments = 0usize;

        loop {
            let next = next_fragment(&mut upstream, idle_timeout)
                .instrument(span.clone())
                .await
                .map_err(|e| {
                    warn!(session_id = %session_id, error = %e, fragments, "Stream aborted, turn not committed");
                    SessionError::backend(session_id, e)
                })?;

            let Some(fragment) = next else {
                warn!(session_id = %session_id, fragments, "Stream ended without a final fragment");
                Err::<(), _>(SessionError::backend(
                    session_id,
                    BackendError::Unavailable("stream ended before the final fragment".to_string()),
                ))?;
                break;
            };

            if !fragment.is_final {
                fragments += 1;
                reply.push_str(&fragment.text);
                yield fragment;
                continue;
            }

            // Text riding on the terminal fragment goes out before the marker.
            if !fragment.text.is_empty() {
                reply.push_str(&fragment.text);
                yield StreamFragment::delta(fragment.text);
            }
            drop(upstream);

            let committed = store
                .append_turn(&session_id, user_message, Message::model(reply))
                .await
                .map_err(|e| SessionError::from_store(session_id, e))?;
            drop(turn_permit);

            info!(
                session_id = %session_id,
                fragments,
                history_len = committed.history.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Streamed turn committed"
            );
            yield StreamFragment::terminal();
            break;
        }
    };

    debug!(session_id = %session_id, "Streamed turn opened");
    TurnStream {
        session_id,
        inner: Box::pin(inner),
    }
}

/// Pull the next backend fragment, bounded by the idle timeout.
async fn next_fragment(
    upstream: &mut FragmentStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<StreamFragment>, BackendError> {
    let item = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, upstream.next())
            .await
            .map_err(|_| BackendError::Timeout {
                after_ms: limit.as_millis() as u64,
            })?,
        None => upstream.next().await,
    };
    item.transpose()
}
