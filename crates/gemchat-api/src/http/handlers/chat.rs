//! Chat session HTTP handlers.
//!
//! Endpoints (under `/api/v1/chat`):
//! - POST   /start_session          - Create a session, optionally seeded
//! - POST   /send_message           - Send a user turn (JSON or NDJSON stream)
//! - GET    /history/{session_id}   - Full ordered history
//! - DELETE /session/{session_id}   - Remove a session
//!
//! Streaming replies are newline-delimited JSON, one [`StreamedPart`] per
//! line. The last line has `is_final_chunk: true` and carries either the
//! assembled reply in `full_response_part` or an `error`.

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use gemchat_core::chat::service::{SendMessage, SendOutcome, StartSession};
use gemchat_core::chat::stream::TurnStream;
use gemchat_types::chat::{Message, Part, Role, SessionId};
use gemchat_types::error::SessionError;
use gemchat_types::llm::{GenerationParameters, SafetySetting};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestMeta};
use crate::state::AppState;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

// --- Request bodies ---

/// Message content as sent by clients. `role` may be omitted for user turns.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBody {
    #[serde(default)]
    pub role: Option<Role>,
    pub parts: Vec<Part>,
}

/// A user turn: either structured content or a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Content(ContentBody),
}

/// Sampling options, kept apart from safety settings on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationConfigBody {
    pub candidate_count: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Falls back to `default_model` from the config.
    pub model_name: Option<String>,
    #[serde(default)]
    pub initial_history: Vec<ContentBody>,
    pub generation_config: Option<GenerationConfigBody>,
    pub safety_settings: Option<Vec<SafetySetting>>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub session_id: String,
    pub message: MessageBody,
    pub generation_config: Option<GenerationConfigBody>,
    pub safety_settings: Option<Vec<SafetySetting>>,
    #[serde(default)]
    pub stream: bool,
}

// --- Response bodies ---

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
    /// Always null: a new session never opens with a model turn.
    pub initial_message: Option<Message>,
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub session_id: SessionId,
    pub response: Message,
    pub updated_history: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: SessionId,
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// One NDJSON line of a streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedPart {
    pub session_id: String,
    pub chunk_text: Option<String>,
    pub is_final_chunk: bool,
    pub full_response_part: Option<Part>,
    pub error: Option<String>,
}

impl StreamedPart {
    fn chunk(session_id: &str, text: String) -> Self {
        Self {
            session_id: session_id.to_string(),
            chunk_text: Some(text),
            is_final_chunk: false,
            full_response_part: None,
            error: None,
        }
    }

    fn last(session_id: &str, full_text: String) -> Self {
        Self {
            session_id: session_id.to_string(),
            chunk_text: None,
            is_final_chunk: true,
            full_response_part: Some(Part::text(full_text)),
            error: None,
        }
    }

    fn failed(session_id: &str, error: String) -> Self {
        Self {
            session_id: session_id.to_string(),
            chunk_text: None,
            is_final_chunk: true,
            full_response_part: None,
            error: Some(error),
        }
    }
}

// --- Handlers ---

/// POST /api/v1/chat/start_session
pub async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<StartSessionResponse>>, AppError> {
    let meta = RequestMeta::start();
    let Json(body) = payload?;

    let seed_history = body
        .initial_history
        .into_iter()
        .enumerate()
        .map(|(idx, content)| seed_message(idx, content))
        .collect::<Result<Vec<_>, _>>()?;

    let started = state
        .chat_service
        .start_session(StartSession {
            model_name: body
                .model_name
                .unwrap_or_else(|| state.config.default_model.clone()),
            seed_history,
            default_params: merge_params(body.generation_config, body.safety_settings)
                .unwrap_or_default(),
        })
        .await?;

    let history_link = format!("/api/v1/chat/history/{}", started.session_id);
    let resp = ApiResponse::success(
        StartSessionResponse {
            session_id: started.session_id,
            initial_message: None,
            history: started.history,
        },
        meta,
    )
    .with_link("history", &history_link);

    Ok(Json(resp))
}

/// POST /api/v1/chat/send_message
///
/// With `stream: false` the reply is a JSON envelope. With `stream: true` it
/// is an NDJSON body; errors found before the first byte (bad id, unknown
/// session, invalid content) are still regular JSON error responses.
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let meta = RequestMeta::start();
    let Json(body) = payload?;

    let session_id = parse_session_id(&body.session_id)?;
    let content = user_message(body.message)?;
    let params = merge_params(body.generation_config, body.safety_settings);

    let outcome = state
        .chat_service
        .send_message(SendMessage {
            session_id,
            content,
            params,
            stream: body.stream,
        })
        .await?;

    match outcome {
        SendOutcome::Complete(turn) => {
            let resp = ApiResponse::success(
                MessageResponse {
                    session_id: turn.session_id,
                    response: turn.reply,
                    updated_history: turn.history,
                },
                meta,
            );
            Ok(Json(resp).into_response())
        }
        SendOutcome::Streaming(stream) => Ok(ndjson_response(stream)),
    }
}

/// GET /api/v1/chat/history/{session_id}
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<HistoryResponse>>, AppError> {
    let meta = RequestMeta::start();
    let session_id = parse_session_id(&session_id)?;

    let history = state.chat_service.get_history(&session_id).await?;

    Ok(Json(ApiResponse::success(
        HistoryResponse {
            session_id,
            history,
        },
        meta,
    )))
}

/// DELETE /api/v1/chat/session/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<DeleteResponse>>, AppError> {
    let meta = RequestMeta::start();
    let session_id = parse_session_id(&session_id)?;

    state.chat_service.delete_session(&session_id).await?;

    Ok(Json(ApiResponse::success(
        DeleteResponse {
            message: format!("Session {session_id} deleted successfully"),
        },
        meta,
    )))
}

// --- Helpers ---

/// An id that does not parse cannot name a live session.
fn parse_session_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse::<SessionId>()
        .map_err(|_| AppError::NotFound(format!("session {raw} not found")))
}

/// Combine the separate wire fields into one parameter set.
///
/// `None` when the caller sent neither, so session defaults apply.
fn merge_params(
    config: Option<GenerationConfigBody>,
    safety_settings: Option<Vec<SafetySetting>>,
) -> Option<GenerationParameters> {
    if config.is_none() && safety_settings.is_none() {
        return None;
    }
    let config = config.unwrap_or_default();
    Some(GenerationParameters {
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        max_output_tokens: config.max_output_tokens,
        candidate_count: config.candidate_count,
        stop_sequences: config.stop_sequences.unwrap_or_default(),
        safety_settings: safety_settings.unwrap_or_default(),
    })
}

fn user_message(body: MessageBody) -> Result<Message, AppError> {
    match body {
        MessageBody::Text(text) => Ok(Message::user(text)),
        MessageBody::Content(content) => {
            check_inline_data(&content.parts)?;
            Ok(Message::new(content.role.unwrap_or(Role::User), content.parts))
        }
    }
}

fn seed_message(idx: usize, content: ContentBody) -> Result<Message, AppError> {
    let role = content.role.ok_or_else(|| {
        AppError::Session(SessionError::InvalidSeedHistory(format!(
            "message {idx} has no role"
        )))
    })?;
    check_inline_data(&content.parts)?;
    Ok(Message::new(role, content.parts))
}

/// Media must be declared with a MIME type and carry valid base64.
fn check_inline_data(parts: &[Part]) -> Result<(), AppError> {
    for blob in parts.iter().filter_map(|p| p.inline_data.as_ref()) {
        if blob.mime_type.trim().is_empty() {
            return Err(AppError::Validation(
                "inline_data.mime_type must not be empty".to_string(),
            ));
        }
        STANDARD.decode(blob.data.as_bytes()).map_err(|e| {
            AppError::Validation(format!("inline_data.data is not valid base64: {e}"))
        })?;
    }
    Ok(())
}

/// Stream a turn as NDJSON lines.
fn ndjson_response(stream: TurnStream) -> Response {
    let session_id = stream.session_id().to_string();

    let lines = async_stream::stream! {
        let mut stream = stream;
        let mut full_text = String::new();

        while let Some(item) = stream.next().await {
            let (part, done) = match item {
                Ok(fragment) if fragment.is_final => {
                    (StreamedPart::last(&session_id, std::mem::take(&mut full_text)), true)
                }
                Ok(fragment) => {
                    full_text.push_str(&fragment.text);
                    (StreamedPart::chunk(&session_id, fragment.text), false)
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Streamed turn failed");
                    (StreamedPart::failed(&session_id, e.to_string()), true)
                }
            };
            yield Ok::<_, Infallible>(ndjson_line(&part));
            if done {
                break;
            }
        }
    };

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response()
}

fn ndjson_line(part: &StreamedPart) -> String {
    let mut line = serde_json::to_string(part).unwrap_or_else(|e| {
        serde_json::json!({
            "session_id": part.session_id,
            "is_final_chunk": true,
            "error": format!("failed to encode stream part: {e}"),
        })
        .to_string()
    });
    line.push('\n');
    line
}
