//! GeminiBackend -- concrete [`GenerativeBackend`] for the Gemini REST API.
//!
//! Unary calls go to `models/{model}:generateContent`, streaming calls to
//! `models/{model}:streamGenerateContent?alt=sse`. The API key is wrapped in
//! [`secrecy::SecretString`] and only exposed when building request headers.

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use gemchat_core::llm::backend::{FragmentStream, GenerativeBackend};
use gemchat_types::chat::Message;
use gemchat_types::llm::{BackendError, GenerationRequest};

use super::streaming::create_gemini_stream;
use super::types::{ErrorEnvelope, GenerateContentRequest, GenerateContentResponse};

/// Header carrying the API key.
pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_VERSION: &str = "v1beta";

/// Gemini generative backend.
///
/// No whole-request timeout is set on the HTTP client: streamed replies can
/// legitimately run for minutes. Call deadlines are applied by the session
/// service; only connection setup is bounded here.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

// No Debug derive: keeps the client and key out of debug output entirely.

impl GeminiBackend {
    /// Build a backend talking to `base_url`.
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Full URL for a model method, e.g. `generateContent`.
    fn url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/{API_VERSION}/models/{model}:{method}", self.base_url)
    }
}

impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Message, BackendError> {
        let body = GenerateContentRequest::from_request(request);
        let url = self.url(&request.model, "generateContent");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %request.model, "Gemini API error response");
            return Err(classify_status(status, &error_body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to read response: {e}")))?;

        if let Some(usage) = &parsed.usage_metadata {
            debug!(
                model = %request.model,
                input_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                total_tokens = usage.total_token_count,
                "Gemini usage"
            );
        }

        parsed.into_message()
    }

    fn generate_stream(&self, request: GenerationRequest) -> FragmentStream {
        let body = GenerateContentRequest::from_request(&request);
        let url = format!("{}?alt=sse", self.url(&request.model, "streamGenerateContent"));
        create_gemini_stream(&self.client, url, body, &self.api_key)
    }
}

/// Map a non-success HTTP status to a backend error.
///
/// Client errors (bad argument, auth, quota) are permanent for the input;
/// server errors are transient.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| match env.error.status {
            Some(code) => format!("{code}: {}", env.error.message),
            None => env.error.message,
        })
        .unwrap_or_else(|_| body.trim().to_string());

    match status.as_u16() {
        408 | 504 => BackendError::Timeout { after_ms: 0 },
        s if s >= 500 => BackendError::Unavailable(format!("HTTP {status}: {detail}")),
        _ => BackendError::Rejected {
            reason: format!("HTTP {status}: {detail}"),
        },
    }
}

/// Map a transport failure (no HTTP status) to a backend error.
pub(crate) fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { after_ms: 0 }
    } else {
        BackendError::Unavailable(format!("HTTP request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use futures_util::StreamExt;
    use gemchat_types::llm::{GenerationParameters, StreamFragment};

    fn backend(base_url: &str) -> GeminiBackend {
        GeminiBackend::new(
            SecretString::from("test-key".to_string()),
            base_url,
            Duration::from_secs(2),
        )
        .unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "gemini-test".to_string(),
            contents: vec![Message::user("hi")],
            params: GenerationParameters::default(),
        }
    }

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn url_building() {
        let b = backend("https://example.test/");
        assert_eq!(
            b.url("gemini-2.5-pro", "generateContent"),
            "https://example.test/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(
            b.url("models/gemini-2.5-pro", "streamGenerateContent"),
            "https://example.test/v1beta/models/gemini-2.5-pro:streamGenerateContent"
        );
    }

    #[test]
    fn provider_name() {
        assert_eq!(GenerativeBackend::name(&backend("http://x")), "gemini");
    }

    #[test]
    fn status_classification() {
        let quota = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        match classify_status(StatusCode::TOO_MANY_REQUESTS, quota) {
            BackendError::Rejected { reason } => {
                assert!(reason.contains("RESOURCE_EXHAUSTED: Quota exceeded"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }

        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad"),
            BackendError::Rejected { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            BackendError::Rejected { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, ""),
            BackendError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn generate_sends_key_and_parses_reply() {
        let router = Router::new().route(
            "/v1beta/models/{method}",
            post(|headers: HeaderMap, axum::extract::Path(method): axum::extract::Path<String>| async move {
                assert_eq!(method, "gemini-test:generateContent");
                assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "test-key");
                axum::Json(serde_json::json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "Hello"}]},
                        "finishReason": "STOP"
                    }]
                }))
            }),
        );
        let base = serve(router).await;

        let reply = backend(&base).generate(&request()).await.unwrap();
        assert_eq!(reply, Message::model("Hello"));
    }

    #[tokio::test]
    async fn generate_maps_server_error() {
        let router = Router::new().route(
            "/v1beta/models/{method}",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(router).await;

        let err = backend(&base).generate(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        // Port 9 (discard) on localhost is almost never listening.
        let err = backend("http://127.0.0.1:9").generate(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn stream_over_sse() {
        let router = Router::new().route(
            "/v1beta/models/{method}",
            post(|| async {
                (
                    [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                    concat!(
                        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\r\n\r\n",
                        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"llo\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
                    ),
                )
            }),
        );
        let base = serve(router).await;

        let items: Vec<StreamFragment> = backend(&base)
            .generate_stream(request())
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(
            items,
            vec![
                StreamFragment::delta("He"),
                StreamFragment::delta("llo"),
                StreamFragment::terminal()
            ]
        );
    }

    #[tokio::test]
    async fn stream_maps_http_error() {
        let router = Router::new().route(
            "/v1beta/models/{method}",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    r#"{"error": {"code": 429, "message": "slow down", "status": "RESOURCE_EXHAUSTED"}}"#,
                )
            }),
        );
        let base = serve(router).await;

        let items: Vec<_> = backend(&base).generate_stream(request()).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(BackendError::Rejected { .. })));
    }
}
