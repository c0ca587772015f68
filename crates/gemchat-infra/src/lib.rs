//! Infrastructure layer for gemchat.
//!
//! Concrete implementations of the ports defined in `gemchat-core`: the
//! in-memory session store, the Gemini backend client, and the TOML
//! configuration loader.

pub mod config;
pub mod llm;
pub mod session;
