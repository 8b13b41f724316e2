//! `aimux config`: inspect and validate configuration.
//!
//! - `aimux config show`: the effective snapshot as JSON (secrets omitted)
//! - `aimux config chain [PROVIDER]`: fallback chain headed by a provider
//! - `aimux config check [--patch JSON]`: validate, optionally with a patch applied

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use aimux_core::config::{AiConfigPatch, ConfigStore};
use aimux_core::error::ConfigError;
use aimux_core::types::ProviderId;

// ─────────────────────────────────────────────
// Subcommand enum
// ─────────────────────────────────────────────

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as JSON
    Show,

    /// Print the fallback chain
    Chain {
        /// Provider to put first (defaults to the configured default)
        preferred: Option<ProviderId>,
    },

    /// Validate the configuration
    Check {
        /// camelCase JSON patch to merge before validating
        #[arg(long)]
        patch: Option<String>,
    },
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

/// Dispatch a config subcommand.
pub fn dispatch(cmd: ConfigCommands) -> Result<()> {
    let store = ConfigStore::from_process_env();
    match cmd {
        ConfigCommands::Show => show(&store),
        ConfigCommands::Chain { preferred } => chain(&store, preferred),
        ConfigCommands::Check { patch } => check(&store, patch.as_deref()),
    }
}

fn show(store: &ConfigStore) -> Result<()> {
    let config = store.get().context("AI configuration is invalid")?;
    println!("{}", serde_json::to_string_pretty(config.as_ref())?);
    Ok(())
}

fn chain(store: &ConfigStore, preferred: Option<ProviderId>) -> Result<()> {
    let chain = store.fallback_chain(preferred)?;
    if chain.is_empty() {
        println!("{}", "(no enabled providers)".dimmed());
    }
    for (i, id) in chain.iter().enumerate() {
        println!("  {}. {}", i + 1, id);
    }
    Ok(())
}

fn check(store: &ConfigStore, patch: Option<&str>) -> Result<()> {
    let result = match patch {
        None => store.get().map(|_| ()),
        Some(raw) => {
            let patch = parse_patch(raw)?;
            store.update(&patch).map(|_| ())
        }
    };
    match result {
        Ok(()) => {
            println!("{} configuration is valid", "✓".green());
            Ok(())
        }
        Err(e) => {
            print_issues(&e);
            Err(anyhow::Error::new(e).context("configuration check failed"))
        }
    }
}

fn parse_patch(raw: &str) -> Result<AiConfigPatch> {
    serde_json::from_str(raw).context("--patch is not a valid configuration patch")
}

fn print_issues(err: &ConfigError) {
    println!("{} {} issue(s):", "✗".red(), err.issues.len());
    for issue in &err.issues {
        println!("    {} {}", issue.path.bold(), issue.message);
    }
}
