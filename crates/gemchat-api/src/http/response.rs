//! Envelope response format for JSON API responses.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```
//!
//! Streaming replies (`application/x-ndjson`) are not wrapped.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

/// Envelope wrapping all JSON API data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    pub meta: ApiMeta,

    /// Empty on success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

/// Individual error detail.
#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code, e.g. `SESSION_NOT_FOUND`.
    pub code: String,
    pub message: String,
}

/// Per-request id and timer, created at the top of each handler.
#[derive(Debug)]
pub struct RequestMeta {
    request_id: String,
    started: Instant,
}

impl RequestMeta {
    pub fn start() -> Self {
        Self {
            request_id: uuid::Uuid::now_v7().to_string(),
            started: Instant::now(),
        }
    }

    fn finish(self) -> ApiMeta {
        ApiMeta {
            request_id: self.request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response with data.
    pub fn success(data: T, meta: RequestMeta) -> Self {
        Self {
            data: Some(data),
            meta: meta.finish(),
            errors: Vec::new(),
            links: HashMap::new(),
        }
    }

    /// Add a HATEOAS link.
    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

impl ApiResponse<()> {
    /// Create an error response (no data).
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            data: None,
            meta: RequestMeta::start().finish(),
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            }],
            links: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let resp = ApiResponse::success(serde_json::json!({"x": 1}), RequestMeta::start())
            .with_link("self", "/api/v1/chat/history/abc");
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value["data"]["x"], 1);
        assert!(value.get("errors").is_none());
        assert_eq!(value["_links"]["self"], "/api/v1/chat/history/abc");
        assert!(!value["meta"]["request_id"].as_str().unwrap().is_empty());
    }

    #[test]
    fn error_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::error("SESSION_NOT_FOUND", "gone")).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["errors"][0]["code"], "SESSION_NOT_FOUND");
        assert_eq!(value["errors"][0]["message"], "gone");
    }
}
