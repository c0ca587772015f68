//! `gemchat serve` - run the REST API until Ctrl+C or SIGTERM.

use tokio_util::sync::CancellationToken;

use gemchat_types::config::AppConfig;

use crate::http::router::build_router;
use crate::state::AppState;

/// Bind, serve, and shut down gracefully.
///
/// CLI `host`/`port` override the config file values.
pub async fn serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = AppState::init(config)?;
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let cancel = CancellationToken::new();
    let sweeper = state.spawn_idle_sweeper(cancel.clone());

    tracing::info!(
        addr = %addr,
        model = %state.config.default_model,
        backend = state.chat_service.backend_name(),
        "gemchat API listening"
    );
    println!(
        "  {} gemchat API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Idle session sweeper did not stop cleanly");
        }
    }

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that signal is never reported and the
/// other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
