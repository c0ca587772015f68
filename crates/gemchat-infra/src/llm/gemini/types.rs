//! Gemini `generateContent` API types.
//!
//! Wire structures for the Gemini REST API (camelCase JSON). They are not
//! the backend-agnostic types from gemchat-types; conversions live here so
//! the client and the stream adapter share them.

use serde::{Deserialize, Serialize};

use gemchat_types::chat::{InlineData, Message, Part, Role};
use gemchat_types::llm::{BackendError, GenerationParameters, GenerationRequest, SafetySetting};

/// Finish reasons meaning the model stopped because content was filtered.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

/// Request body for `generateContent` / `streamGenerateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

impl GenerateContentRequest {
    pub fn from_request(request: &GenerationRequest) -> Self {
        let params = &request.params;
        Self {
            contents: request.contents.iter().map(GeminiContent::from).collect(),
            generation_config: params
                .has_sampling_config()
                .then(|| GeminiGenerationConfig::from(params)),
            safety_settings: params.safety_settings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

impl From<&Message> for GeminiContent {
    fn from(message: &Message) -> Self {
        Self {
            role: Some(message.role.to_string()),
            parts: message.parts.iter().map(GeminiPart::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GeminiBlob>,
    /// Set on reasoning summaries from thinking models; never part of the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl From<&Part> for GeminiPart {
    fn from(part: &Part) -> Self {
        Self {
            text: part.text.clone(),
            inline_data: part.inline_data.as_ref().map(|d| GeminiBlob {
                mime_type: d.mime_type.clone(),
                data: d.data.clone(),
            }),
            thought: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBlob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl From<&GenerationParameters> for GeminiGenerationConfig {
    fn from(params: &GenerationParameters) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            max_output_tokens: params.max_output_tokens,
            candidate_count: params.candidate_count,
            stop_sequences: params.stop_sequences.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
//
// Unary calls return one `GenerateContentResponse`. With `alt=sse` every
// `data:` line carries the same shape holding only the new text; the last
// chunk sets `finishReason`.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

/// Text of one streamed chunk and whether the model declared it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkText {
    pub text: String,
    pub finished: bool,
}

impl GenerateContentResponse {
    /// Fail with `Rejected` when the prompt itself was blocked.
    fn check_prompt_feedback(&self) -> Result<(), BackendError> {
        match self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
            Some(reason) => Err(BackendError::Rejected {
                reason: format!("prompt blocked: {reason}"),
            }),
            None => Ok(()),
        }
    }

    fn first_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// Convert a unary response into the model's reply.
    pub fn into_message(self) -> Result<Message, BackendError> {
        self.check_prompt_feedback()?;
        let candidate = self.first_candidate().ok_or_else(|| BackendError::Rejected {
            reason: "response contained no candidates".to_string(),
        })?;

        let parts: Vec<Part> = candidate.reply_parts().collect();
        let has_content = parts.iter().any(Part::has_content);
        if !has_content && candidate.is_blocked() {
            return Err(candidate.blocked_error());
        }
        Ok(Message::new(Role::Model, parts))
    }

    /// Convert one streamed chunk into its text delta.
    pub fn into_chunk(self) -> Result<ChunkText, BackendError> {
        self.check_prompt_feedback()?;
        let Some(candidate) = self.first_candidate() else {
            // Trailing usage-only chunks carry no candidate.
            return Ok(ChunkText {
                text: String::new(),
                finished: false,
            });
        };
        if candidate.is_blocked() {
            return Err(candidate.blocked_error());
        }
        let text = candidate
            .reply_parts()
            .filter_map(|p| p.text)
            .collect::<String>();
        Ok(ChunkText {
            text,
            finished: candidate.finish_reason.is_some(),
        })
    }
}

impl Candidate {
    fn is_blocked(&self) -> bool {
        self.finish_reason
            .as_deref()
            .is_some_and(|r| BLOCKING_FINISH_REASONS.contains(&r))
    }

    fn blocked_error(&self) -> BackendError {
        BackendError::Rejected {
            reason: format!(
                "response blocked: {}",
                self.finish_reason.as_deref().unwrap_or("unknown")
            ),
        }
    }

    fn reply_parts(&self) -> impl Iterator<Item = Part> + '_ {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter(|p| p.thought != Some(true))
            .map(|p| Part {
                text: p.text.clone(),
                inline_data: p.inline_data.as_ref().map(|d| InlineData {
                    mime_type: d.mime_type.clone(),
                    data: d.data.clone(),
                }),
            })
    }
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemchat_types::llm::{HarmBlockThreshold, HarmCategory};

    fn request(params: GenerationParameters) -> GenerationRequest {
        GenerationRequest {
            model: "gemini-2.5-pro".to_string(),
            contents: vec![Message::user("hi"), Message::model("hello"), Message::user("again")],
            params,
        }
    }

    #[test]
    fn request_body_uses_gemini_field_names() {
        let body = GenerateContentRequest::from_request(&request(GenerationParameters {
            temperature: Some(0.5),
            max_output_tokens: Some(64),
            stop_sequences: vec!["END".to_string()],
            safety_settings: vec![SafetySetting {
                category: HarmCategory::Harassment,
                threshold: HarmBlockThreshold::BlockNone,
            }],
            ..Default::default()
        }));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["contents"][0], serde_json::json!({"role": "user", "parts": [{"text": "hi"}]}));
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["temperature"], 0.5);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(json["generationConfig"]["stopSequences"][0], "END");
        assert!(json["generationConfig"].get("topK").is_none());
        assert_eq!(json["safetySettings"][0]["category"], "HARM_CATEGORY_HARASSMENT");
        assert_eq!(json["safetySettings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn request_body_omits_empty_config() {
        let body = GenerateContentRequest::from_request(&request(GenerationParameters::default()));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("safetySettings").is_none());
    }

    #[test]
    fn inline_data_is_camel_cased() {
        let message = Message::new(
            Role::User,
            vec![Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                }),
            }],
        );
        let json = serde_json::to_value(GeminiContent::from(&message)).unwrap();
        assert_eq!(json["parts"][0]["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn unary_response_becomes_model_message() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "Hello"},
                        {"text": " there"}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
            }"#,
        )
        .unwrap();
        let message = resp.into_message().unwrap();
        assert_eq!(message.role, Role::Model);
        assert_eq!(message.text(), "Hello there");
    }

    #[test]
    fn blocked_prompt_is_rejected() {
        let resp: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        let err = resp.into_message().unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                reason: "prompt blocked: SAFETY".to_string()
            }
        );
    }

    #[test]
    fn safety_finish_without_text_is_rejected() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"finishReason": "SAFETY"}]}"#,
        )
        .unwrap();
        assert!(matches!(resp.into_message(), Err(BackendError::Rejected { .. })));
    }

    #[test]
    fn max_tokens_finish_is_not_an_error() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "Hel"}]}, "finishReason": "MAX_TOKENS"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.into_message().unwrap().text(), "Hel");
    }

    #[test]
    fn stream_chunk_reports_finish() {
        let mid: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "He"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            mid.into_chunk().unwrap(),
            ChunkText {
                text: "He".to_string(),
                finished: false
            }
        );

        let last: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "llo"}]}, "finishReason": "STOP"}]}"#,
        )
        .unwrap();
        assert!(last.into_chunk().unwrap().finished);
    }

    #[test]
    fn usage_only_chunk_is_empty() {
        let resp: GenerateContentResponse =
            serde_json::from_str(r#"{"usageMetadata": {"totalTokenCount": 7}}"#).unwrap();
        let chunk = resp.into_chunk().unwrap();
        assert!(chunk.text.is_empty());
        assert!(!chunk.finished);
    }

    #[test]
    fn error_envelope_parses() {
        let env: ErrorEnvelope = serde_json::from_str(
            r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#,
        )
        .unwrap();
        assert_eq!(env.error.message, "Quota exceeded");
        assert_eq!(env.error.status.as_deref(), Some("RESOURCE_EXHAUSTED"));
    }
}
