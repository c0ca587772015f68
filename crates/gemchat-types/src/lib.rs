//! Shared domain types for gemchat.
//!
//! Sessions, messages, generation parameters, stream fragments, the
//! configuration model, and the error enums used across the workspace.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
