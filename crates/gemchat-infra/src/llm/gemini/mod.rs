//! Google Gemini backend.
//!
//! [`GeminiBackend`] implements
//! [`GenerativeBackend`](gemchat_core::llm::backend::GenerativeBackend) over
//! the Generative Language REST API, with SSE streaming for
//! `streamGenerateContent`.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::GeminiBackend;
