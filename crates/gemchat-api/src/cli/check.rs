//! `gemchat check` - probe the configured backend.

use gemchat_infra::config::api_key_from_env;
use gemchat_infra::llm::{check_backend_connection, create_backend};
use gemchat_types::config::AppConfig;

/// Send a one-word prompt and report the outcome.
///
/// Exits with an error when the key is missing or the backend call fails.
pub async fn check(config: &AppConfig, model: Option<String>) -> anyhow::Result<()> {
    let model = model.unwrap_or_else(|| config.default_model.clone());
    let api_key = api_key_from_env(&config.backend.api_key_env)?;
    let backend = create_backend(&config.backend, api_key)?;

    println!();
    println!(
        "  Checking {} with model {}",
        console::style(&config.backend.base_url).cyan(),
        console::style(&model).cyan()
    );

    match check_backend_connection(&backend, &model).await {
        Ok(elapsed) => {
            println!(
                "  {} Backend reachable ({} ms)",
                console::style("✓").green(),
                elapsed.as_millis()
            );
            println!();
            Ok(())
        }
        Err(e) => {
            let hint = if e.is_transient() {
                "transient, retry later"
            } else {
                "check the API key and model name"
            };
            println!("  {} {e}", console::style("✗").red());
            println!("  {}", console::style(hint).dim());
            println!();
            Err(e.into())
        }
    }
}
