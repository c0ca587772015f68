//! gemchat application layer: CLI definitions, shared state, and the REST API.
//!
//! The `gemchat` binary in `main.rs` is a thin dispatcher over these modules.

pub mod cli;
pub mod http;
pub mod state;
