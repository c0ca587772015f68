//! Session lifecycle logic and trait definitions for gemchat.
//!
//! This crate defines the "ports" the infrastructure layer implements
//! ([`chat::store::SessionStore`], [`llm::backend::GenerativeBackend`]) and
//! the [`chat::service::ChatService`] that drives them. It depends only on
//! `gemchat-types` -- never on `gemchat-infra` or any HTTP crate.

pub mod chat;
pub mod llm;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
