//! Request checks run before anything touches the store.

use gemchat_types::chat::{Message, Role};
use gemchat_types::error::SessionError;

/// Trimmed model name, or `InvalidRequest` when blank.
pub fn model_name(name: &str) -> Result<String, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidRequest(
            "model name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// A seed must alternate roles, carry content in every message, and must
/// not end with a user message (the first turn would then put two user
/// messages next to each other). An empty seed is fine.
pub fn seed_history(seed: &[Message]) -> Result<(), SessionError> {
    for (index, message) in seed.iter().enumerate() {
        if message.is_empty() {
            return Err(SessionError::InvalidSeedHistory(format!(
                "message {index} has no content"
            )));
        }
        if index > 0 && seed[index - 1].role == message.role {
            return Err(SessionError::InvalidSeedHistory(format!(
                "messages {} and {index} both have role '{}'",
                index - 1,
                message.role
            )));
        }
    }

    if seed.last().is_some_and(|m| m.role == Role::User) {
        return Err(SessionError::InvalidSeedHistory(
            "seed history must not end with a user message".to_string(),
        ));
    }
    Ok(())
}

/// New turn content must come from the user and carry something.
pub fn user_content(content: &Message) -> Result<(), SessionError> {
    if content.role != Role::User {
        return Err(SessionError::InvalidRequest(format!(
            "message role must be 'user', got '{}'",
            content.role
        )));
    }
    if content.is_empty() {
        return Err(SessionError::InvalidRequest(
            "message must contain at least one non-empty part".to_string(),
        ));
    }
    Ok(())
}
