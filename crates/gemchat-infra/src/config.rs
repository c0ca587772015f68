//! Configuration loader for gemchat.
//!
//! Reads `gemchat.toml` and deserializes it into [`AppConfig`]. Falls back to
//! defaults when the file is missing or malformed. The API key is never read
//! from the file; it comes from the environment variable the file names.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use gemchat_types::config::AppConfig;
use gemchat_types::error::ConfigError;

/// File name looked up when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "gemchat.toml";

/// Resolve the config path: explicit path first, then `./gemchat.toml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`AppConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_config(path: &Path) -> AppConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return AppConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            AppConfig::default()
        }
    }
}

/// Read the backend API key from the environment variable `var`.
///
/// An unset or blank variable is a [`ConfigError::MissingApiKey`].
pub fn api_key_from_env(var: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value.trim().to_string())),
        _ => Err(ConfigError::MissingApiKey {
            var: var.to_string(),
        }),
    }
}

/// Check the values serde cannot: things that would make the server unusable.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.default_model.trim().is_empty() {
        return Err(ConfigError::Invalid("default_model must not be empty".into()));
    }
    if config.backend.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must not be empty".into()));
    }
    if config.backend.api_key_env.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.api_key_env must not be empty".into()));
    }
    if config.sessions.idle_ttl_secs > 0 && config.sessions.sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "sessions.sweep_interval_secs must be positive when idle_ttl_secs is set".into(),
        ));
    }
    Ok(())
}
