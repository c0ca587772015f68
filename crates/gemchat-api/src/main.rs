//! gemchat CLI and REST API entry point.
//!
//! Binary name: `gemchat`
//!
//! Parses CLI arguments, initializes tracing and configuration, then
//! dispatches to the command handler.

use clap::Parser;
use clap_complete::generate;

use gemchat_api::cli::{self, Cli, Commands};
use gemchat_infra::config::{config_path, load_config};
use gemchat_observe::tracing_setup::{
    TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "gemchat", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&TracingOptions {
        json: cli.json_logs,
        otel: cli.otel,
        default_filter: filter_for_verbosity(cli.verbose).to_string(),
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let path = config_path(cli.config.as_deref());
    let config = load_config(&path).await;
    tracing::debug!(path = %path.display(), "Configuration loaded");

    let result = match cli.command {
        Commands::Serve { port, host } => cli::serve::serve(config, host, port).await,
        Commands::Check { model } => cli::check::check(&config, model).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
