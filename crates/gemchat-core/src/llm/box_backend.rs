//! BoxBackend -- object-safe dynamic dispatch wrapper for GenerativeBackend.
//!
//! 1. `GenerativeBackendDyn` is the object-safe twin with boxed futures
//! 2. Blanket-impl `GenerativeBackendDyn` for all `T: GenerativeBackend`
//! 3. `BoxBackend` wraps `Box<dyn GenerativeBackendDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use gemchat_types::chat::Message;
use gemchat_types::llm::{BackendError, GenerationRequest};

use super::backend::{FragmentStream, GenerativeBackend};

/// Object-safe version of [`GenerativeBackend`] with boxed futures.
pub trait GenerativeBackendDyn: Send + Sync {
    fn name(&self) -> &str;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + 'a>>;

    fn generate_stream_boxed(&self, request: GenerationRequest) -> FragmentStream;
}

impl<T: GenerativeBackend> GenerativeBackendDyn for T {
    fn name(&self) -> &str {
        GenerativeBackend::name(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + 'a>> {
        Box::pin(self.generate(request))
    }

    fn generate_stream_boxed(&self, request: GenerationRequest) -> FragmentStream {
        self.generate_stream(request)
    }
}

/// Type-erased backend chosen at runtime.
///
/// `GenerativeBackend` uses RPITIT and cannot be a trait object directly, so
/// this wrapper exposes the same methods over `GenerativeBackendDyn`.
pub struct BoxBackend {
    inner: Box<dyn GenerativeBackendDyn + Send + Sync>,
}

impl BoxBackend {
    pub fn new<T: GenerativeBackend + 'static>(backend: T) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<Message, BackendError> {
        self.inner.generate_boxed(request).await
    }

    pub fn generate_stream(&self, request: GenerationRequest) -> FragmentStream {
        self.inner.generate_stream_boxed(request)
    }
}

impl std::fmt::Debug for BoxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBackend")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
