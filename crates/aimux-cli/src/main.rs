//! Aimux CLI: entry point.
//!
//! # Commands
//!
//! - `aimux generate PROMPT`: single-prompt completion with fallback
//! - `aimux chat [--system S] MESSAGE...`: multi-turn completion
//! - `aimux stream PROMPT`: stream tokens to stdout (Ctrl-C aborts)
//! - `aimux embed INPUT...`: embeddings for one or more inputs
//! - `aimux health [--check]`: provider health, optionally probing first
//! - `aimux status`: enabled providers, CLI tools and fallback chain
//! - `aimux config show|chain|check`: inspect and validate configuration

mod config_cmd;
mod helpers;
mod run_cmd;
mod status;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use aimux_core::types::ProviderId;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Aimux: multi-provider AI orchestration with health-aware fallback
#[derive(Parser)]
#[command(name = "aimux", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    logs: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every request command.
#[derive(Args, Clone, Debug, Default)]
pub struct RequestArgs {
    /// Pin the call to one provider (no fallback)
    #[arg(short, long)]
    pub provider: Option<ProviderId>,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Only try the preferred provider
    #[arg(long, default_value_t = false)]
    pub no_fallback: bool,

    /// Maximum tokens to generate
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(short, long)]
    pub temperature: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate text from a single prompt
    Generate {
        prompt: String,
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Multi-turn chat; messages alternate user / assistant, starting with user
    Chat {
        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        #[arg(required = true)]
        messages: Vec<String>,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Stream generated tokens
    Stream {
        prompt: String,
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Compute embeddings
    Embed {
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Target dimensionality
        #[arg(long)]
        dimensions: Option<u32>,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show provider health
    Health {
        /// Probe every provider before reporting
        #[arg(long, default_value_t = false)]
        check: bool,
    },

    /// Show configuration and provider status
    Status,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: config_cmd::ConfigCommands,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logs, cli.json_logs);

    match cli.command {
        Commands::Generate { prompt, request } => run_cmd::generate(&prompt, &request).await,
        Commands::Chat {
            system,
            messages,
            request,
        } => run_cmd::chat(system, &messages, &request).await,
        Commands::Stream { prompt, request } => run_cmd::stream(&prompt, &request).await,
        Commands::Embed {
            inputs,
            dimensions,
            request,
        } => run_cmd::embed(inputs, dimensions, &request).await,
        Commands::Health { check } => status::health(check).await,
        Commands::Status => status::run().await,
        Commands::Config { action } => config_cmd::dispatch(action),
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("aimux=debug,aimux_core=debug,aimux_providers=debug,aimux_runtime=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
