//! Generation request/response types shared by the backend adapter and the
//! session service.

use serde::{Deserialize, Serialize};

use crate::chat::Message;

/// Harm category a safety threshold applies to.
///
/// Serialized with the backend's wire names (`HARM_CATEGORY_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "HARM_CATEGORY_DEROGATORY")]
    Derogatory,
    #[serde(rename = "HARM_CATEGORY_TOXICITY")]
    Toxicity,
    #[serde(rename = "HARM_CATEGORY_VIOLENCE")]
    Violence,
    #[serde(rename = "HARM_CATEGORY_SEXUAL")]
    Sexual,
    #[serde(rename = "HARM_CATEGORY_MEDICAL")]
    Medical,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS")]
    Dangerous,
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

/// Blocking threshold for a harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    #[serde(rename = "HARM_BLOCK_THRESHOLD_UNSPECIFIED")]
    Unspecified,
    BlockLowAndAbove,
    BlockMediumAndAbove,
    BlockOnlyHigh,
    BlockNone,
}

/// A single per-category safety filter setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// Knobs for one generation call.
///
/// Opaque to the session service: it is stored as a session default or
/// supplied as a per-call override and handed to the backend unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

impl GenerationParameters {
    /// True when any sampling knob is set (safety settings are not counted).
    pub fn has_sampling_config(&self) -> bool {
        self.temperature.is_some()
            || self.top_p.is_some()
            || self.top_k.is_some()
            || self.max_output_tokens.is_some()
            || self.candidate_count.is_some()
            || !self.stop_sequences.is_empty()
    }
}

/// Everything the backend needs for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    /// Full conversation so far, ending with the new user message.
    pub contents: Vec<Message>,
    pub params: GenerationParameters,
}

/// One piece of a streamed model reply.
///
/// A well-formed stream ends with exactly one fragment whose `is_final` is
/// set. Fragments are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    pub text: String,
    pub is_final: bool,
}

impl StreamFragment {
    /// A non-terminal fragment carrying reply text.
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    /// The end-of-reply marker.
    pub fn terminal() -> Self {
        Self {
            text: String::new(),
            is_final: true,
        }
    }
}

/// Errors from the generative backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Connection failure, server error, or a stream that ended early.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused this input (safety block, quota, bad argument).
    #[error("backend rejected request: {reason}")]
    Rejected { reason: String },

    #[error("backend timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl BackendError {
    /// Whether retrying the identical request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout { .. })
    }
}
