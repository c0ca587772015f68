//! Generative backend implementations.
//!
//! Provides the Gemini client ([`gemini::GeminiBackend`]), a factory that
//! builds a [`BoxBackend`] from [`BackendConfig`] ([`create_backend`]), and a
//! connectivity probe ([`check_backend_connection`]) used by `gemchat check`.

pub mod gemini;

use std::time::{Duration, Instant};

use secrecy::SecretString;

use gemchat_core::llm::box_backend::BoxBackend;
use gemchat_types::chat::Message;
use gemchat_types::config::BackendConfig;
use gemchat_types::llm::{BackendError, GenerationParameters, GenerationRequest};

use self::gemini::GeminiBackend;

/// Bound on TCP/TLS connection setup. Whole-call deadlines live in the service.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a [`BoxBackend`] from the backend section of the config.
///
/// # Errors
///
/// Returns [`BackendError::Unavailable`] if the HTTP client cannot be built.
pub fn create_backend(
    config: &BackendConfig,
    api_key: SecretString,
) -> Result<BoxBackend, BackendError> {
    let backend = GeminiBackend::new(api_key, config.base_url.clone(), CONNECT_TIMEOUT)?;
    tracing::debug!(base_url = %config.base_url, "Gemini backend configured");
    Ok(BoxBackend::new(backend))
}

/// Send a one-word prompt to `model` and report the round-trip time.
///
/// Used to verify the API key, endpoint, and model name before serving.
pub async fn check_backend_connection(
    backend: &BoxBackend,
    model: &str,
) -> Result<Duration, BackendError> {
    let request = GenerationRequest {
        model: model.to_string(),
        contents: vec![Message::user("Hello")],
        params: GenerationParameters {
            temperature: Some(0.0),
            max_output_tokens: Some(16),
            ..Default::default()
        },
    };
    let started = Instant::now();
    backend.generate(&request).await?;
    Ok(started.elapsed())
}
