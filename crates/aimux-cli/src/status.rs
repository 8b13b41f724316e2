//! `aimux status` and `aimux health`: provider status at a glance.
//!
//! - Shows defaults and feature flags
//! - Shows each provider's mode (HTTP / CLI), enablement and remediation hint
//! - Shows the fallback chain and current health

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use aimux_core::config::ConfigStore;
use aimux_providers::cli_provider::cli_available;
use aimux_providers::registry::{enablement_hint, find};
use aimux_runtime::AiRuntimeContext;

use crate::helpers;

fn flag(on: bool) -> String {
    if on {
        "on".green().to_string()
    } else {
        "off".red().to_string()
    }
}

/// Run the status command.
pub async fn run() -> Result<()> {
    let context = AiRuntimeContext::new(Arc::new(ConfigStore::from_process_env()));
    let config = context
        .get_config(false)
        .context("AI configuration is invalid")?;

    println!();
    println!("{}", "Aimux Status".cyan().bold());
    println!();

    println!("  {:<18} {}", "Default provider:".bold(), config.default_provider);
    println!(
        "  {:<18} features {} | streaming {} | fallback {}",
        "Flags:".bold(),
        flag(config.enable_features),
        flag(config.enable_streaming),
        flag(config.enable_fallback),
    );
    println!(
        "  {:<18} {} | {} | {}",
        "Parameters:".bold(),
        format!("max_tokens: {}", config.max_tokens).dimmed(),
        format!("temp: {}", config.temperature).dimmed(),
        format!("timeout: {}ms", config.request_timeout_ms).dimmed(),
    );
    println!(
        "  {:<18} {} | sample rate {}",
        "Analytics:".bold(),
        flag(config.analytics.enabled),
        config.analytics.sample_rate
    );
    println!(
        "  {:<18} {} | every {}ms | threshold {}",
        "Monitoring:".bold(),
        flag(config.monitoring.enabled),
        config.monitoring.health_check_interval_ms,
        config.monitoring.unhealthy_threshold
    );

    // Providers
    println!();
    println!("  {}", "Providers:".bold());
    for id in aimux_core::types::ProviderId::ALL {
        let Some(provider) = config.provider(id) else {
            continue;
        };
        let spec = find(id);
        let mode = if provider.credentials.use_cli {
            let command = provider
                .credentials
                .cli_command
                .clone()
                .or_else(|| spec.cli.as_ref().map(|c| c.command.to_string()))
                .unwrap_or_default();
            let installed = if cli_available(&command).await {
                "✓".green().to_string()
            } else {
                "not installed".red().to_string()
            };
            format!("cli:{command} {installed}")
        } else {
            "http".to_string()
        };
        let status = if provider.enabled {
            format!("{} {}", "✓".green(), provider.models.default.dimmed())
        } else {
            format!("{} {}", "·".dimmed(), enablement_hint(provider).dimmed())
        };
        println!("    {:<20} {:<14} {}", spec.display_name, mode, status);
    }

    // Fallback chain
    println!();
    let chain = context.get_fallback_chain(None)?;
    let chain = if chain.is_empty() {
        "(no enabled providers)".red().to_string()
    } else {
        chain
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    };
    println!("  {:<18} {}", "Fallback chain:".bold(), chain);
    println!();

    Ok(())
}

/// Run the health command.
pub async fn health(check: bool) -> Result<()> {
    let context = AiRuntimeContext::new(Arc::new(ConfigStore::from_process_env()));
    context
        .get_config(false)
        .context("AI configuration is invalid")?;

    if check && !context.health().run_sweep().await {
        eprintln!("{}", "Health monitoring is disabled; showing recorded state.".yellow());
    }

    println!();
    println!("{}", "Provider Health".cyan().bold());
    println!();
    for health in context.get_all_provider_health_status() {
        println!("{}", helpers::health_row(&health));
    }
    println!();
    Ok(())
}
