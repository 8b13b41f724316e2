//! Shared CLI helpers: request options, message assembly, result printing.

use colored::Colorize;

use aimux_core::types::{CallOptions, ChatMessage, ProviderHealth, HealthStatus, UsageMetrics};

use crate::RequestArgs;

/// Per-call options from the shared request flags.
pub fn call_options(args: &RequestArgs) -> CallOptions {
    CallOptions {
        provider: args.provider,
        disable_fallback: args.no_fallback.then_some(true),
        model: args.model.clone(),
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        ..Default::default()
    }
}

/// Conversation from an optional system prompt and alternating turns.
pub fn chat_messages(system: Option<String>, turns: &[String]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    for (i, turn) in turns.iter().enumerate() {
        if i % 2 == 0 {
            messages.push(ChatMessage::user(turn.as_str()));
        } else {
            messages.push(ChatMessage::assistant(turn.as_str()));
        }
    }
    messages
}

/// Print a completion with its provider header.
pub fn print_response(provider: &str, model: &str, text: &str) {
    println!();
    println!("{} {}", provider.cyan().bold(), format!("({model})").dimmed());
    if text.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{text}");
    }
    println!();
}

/// One dimmed line of usage numbers.
pub fn print_usage(usage: &UsageMetrics) {
    let tokens = match usage.total_tokens {
        Some(total) => format!("{total} tokens"),
        None => "tokens n/a".to_string(),
    };
    eprintln!(
        "{}",
        format!("{} · {}ms", tokens, usage.duration_ms).dimmed()
    );
}

pub fn status_label(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "healthy".green().to_string(),
        HealthStatus::Degraded => "degraded".yellow().to_string(),
        HealthStatus::Unhealthy => "unhealthy".red().to_string(),
    }
}

/// One table row for a health snapshot.
pub fn health_row(health: &ProviderHealth) -> String {
    let latency = health
        .latency_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".to_string());
    let mut row = format!(
        "    {:<20} {:<20} failures: {:<3} latency: {}",
        health.id.as_str(),
        status_label(health.status),
        health.consecutive_failures,
        latency
    );
    if let Some(err) = &health.last_error {
        row.push_str(&format!("  {}", err.dimmed()));
    }
    row
}

/// Print a "thinking" placeholder (for non-log mode).
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use aimux_core::types::{ChatRole, ProviderId};

    #[test]
    fn chat_messages_alternate_roles() {
        let turns = vec!["hi".to_string(), "hello".to_string(), "how are you".to_string()];
        let messages = chat_messages(Some("be brief".into()), &turns);
        let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(messages[3].content, "how are you");
    }

    #[test]
    fn chat_messages_skip_blank_system() {
        let messages = chat_messages(Some("  ".into()), &["x".to_string()]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
    }

    #[test]
    fn call_options_from_flags() {
        let args = RequestArgs {
            provider: Some(ProviderId::Anthropic),
            model: Some("claude-3-5-haiku-latest".into()),
            no_fallback: true,
            max_tokens: Some(64),
            temperature: None,
        };
        let options = call_options(&args);
        assert_eq!(options.provider, Some(ProviderId::Anthropic));
        assert_eq!(options.disable_fallback, Some(true));
        assert_eq!(options.max_tokens, Some(64));
        assert!(options.temperature.is_none());
    }

    #[test]
    fn call_options_default_leaves_fallback_unset() {
        let options = call_options(&RequestArgs::default());
        assert!(options.disable_fallback.is_none());
        assert!(options.provider.is_none());
    }
}
