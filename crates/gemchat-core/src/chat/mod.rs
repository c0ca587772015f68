//! Chat session lifecycle.
//!
//! - `store`: the `SessionStore` port
//! - `validate`: checks applied before a request touches the store
//! - `service`: `ChatService`, the lifecycle operations
//! - `stream`: the streaming turn coordinator

pub mod service;
pub mod store;
pub mod stream;
pub mod validate;
