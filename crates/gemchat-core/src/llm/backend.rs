//! GenerativeBackend trait definition.
//!
//! The abstraction every model backend implements. `generate` uses RPITIT;
//! `generate_stream` returns a boxed stream so it stays object-safe for
//! the `BoxBackend` wrapper.

use std::pin::Pin;

use futures_util::Stream;

use gemchat_types::chat::Message;
use gemchat_types::llm::{BackendError, GenerationRequest, StreamFragment};

/// Stream of reply fragments produced by [`GenerativeBackend::generate_stream`].
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<StreamFragment, BackendError>> + Send + 'static>>;

/// A remote generative model.
///
/// Implementations perform no retries; the caller decides what to do with a
/// transient failure. Implementations live in gemchat-infra (e.g. `GeminiBackend`).
pub trait GenerativeBackend: Send + Sync {
    /// Short backend name for logs and spans (e.g. "gemini").
    fn name(&self) -> &str;

    /// Generate one complete model message for the request's contents.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl std::future::Future<Output = Result<Message, BackendError>> + Send;

    /// Generate the reply incrementally.
    ///
    /// The stream is lazy and not restartable. A successful stream ends with
    /// exactly one fragment whose `is_final` flag is set, and the text of the
    /// preceding fragments concatenates to what `generate` would have
    /// returned. Dropping the stream releases the underlying connection.
    fn generate_stream(&self, request: GenerationRequest) -> FragmentStream;
}
