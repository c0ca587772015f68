//! Application state wiring the services together.
//!
//! `ChatService` is generic over its store; AppState pins it to the
//! in-memory store and carries the loaded configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gemchat_core::chat::service::{BackendTimeouts, ChatService};
use gemchat_core::llm::box_backend::BoxBackend;
use gemchat_infra::config::{api_key_from_env, validate};
use gemchat_infra::llm::create_backend;
use gemchat_infra::session::InMemorySessionStore;
use gemchat_types::config::AppConfig;

/// Chat service pinned to the concrete store.
pub type ConcreteChatService = ChatService<InMemorySessionStore>;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Validate the config, resolve the API key, and build the Gemini backend.
    pub fn init(config: AppConfig) -> anyhow::Result<Self> {
        validate(&config)?;
        let api_key = api_key_from_env(&config.backend.api_key_env)?;
        let backend = create_backend(&config.backend, api_key)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Build state around an already constructed backend.
    pub fn with_backend(config: AppConfig, backend: BoxBackend) -> Self {
        let timeouts = BackendTimeouts {
            request: seconds(config.backend.request_timeout_secs),
            stream_idle: seconds(config.backend.stream_idle_timeout_secs),
        };
        let store = Arc::new(InMemorySessionStore::new());
        let chat_service = ChatService::new(store, backend).with_timeouts(timeouts);

        Self {
            chat_service: Arc::new(chat_service),
            config: Arc::new(config),
        }
    }

    /// Start the idle-session sweeper if `sessions.idle_ttl_secs` is set.
    pub fn spawn_idle_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let ttl = seconds(self.config.sessions.idle_ttl_secs)?;
        let interval = seconds(self.config.sessions.sweep_interval_secs)?;
        tracing::info!(
            ttl_secs = ttl.as_secs(),
            interval_secs = interval.as_secs(),
            "Idle session eviction enabled"
        );
        Some(Arc::clone(&self.chat_service).spawn_idle_sweeper(ttl, interval, cancel))
    }
}

/// Zero means "no limit".
fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}
