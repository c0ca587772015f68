//! CLI command definitions for the `gemchat` binary.

pub mod check;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Session-managing chat gateway for the Gemini API.
#[derive(Parser)]
#[command(name = "gemchat", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML config file (default: ./gemchat.toml).
    #[arg(long, global = true, env = "GEMCHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (overrides `server.port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides `server.host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Verify the API key and model with a one-word request.
    Check {
        /// Model to probe (default: `default_model` from the config).
        #[arg(long)]
        model: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
