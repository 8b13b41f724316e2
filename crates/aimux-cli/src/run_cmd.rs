//! `aimux generate|chat|stream|embed`: request commands over the service.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;
use tracing::debug;

use aimux_core::config::ConfigStore;
use aimux_core::types::{EmbeddingInput, EmbeddingRequest};
use aimux_providers::cancel::AbortController;
use aimux_runtime::{AiRuntimeContext, AiService, ServiceOptions};

use crate::helpers;
use crate::RequestArgs;

/// Service over the process environment. One-shot commands skip the
/// background health schedule.
fn service(args: &RequestArgs) -> AiService {
    let context = AiRuntimeContext::new(Arc::new(ConfigStore::from_process_env()));
    AiService::new(
        context,
        ServiceOptions {
            provider: args.provider,
            disable_fallback: args.no_fallback,
            on_usage: None,
        },
    )
}

pub async fn generate(prompt: &str, args: &RequestArgs) -> Result<()> {
    let service = service(args);
    let options = helpers::call_options(args);

    helpers::print_thinking();
    let result = service.generate_text(prompt, &options, None).await;
    helpers::clear_thinking();

    let result = result.context("generation failed")?;
    helpers::print_response(result.provider.as_str(), &result.model, &result.text);
    helpers::print_usage(&result.usage);
    Ok(())
}

pub async fn chat(system: Option<String>, turns: &[String], args: &RequestArgs) -> Result<()> {
    let service = service(args);
    let options = helpers::call_options(args);
    let messages = helpers::chat_messages(system, turns);

    helpers::print_thinking();
    let result = service.chat(&messages, &options, None).await;
    helpers::clear_thinking();

    let result = result.context("chat failed")?;
    helpers::print_response(result.provider.as_str(), &result.model, &result.text);
    if let Some(calls) = &result.tool_calls {
        for call in calls {
            println!(
                "  {} {}({})",
                "tool call:".dimmed(),
                call.function.name,
                call.function.arguments
            );
        }
    }
    helpers::print_usage(&result.usage);
    Ok(())
}

pub async fn stream(prompt: &str, args: &RequestArgs) -> Result<()> {
    let service = service(args);
    let options = helpers::call_options(args);

    let controller = AbortController::new();
    let signal = controller.signal();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            controller.abort("interrupted");
        }
    });

    let mut tokens = service
        .stream_text(prompt, &options, Some(&signal))
        .await
        .context("failed to open stream")?;
    debug!(provider = %tokens.provider(), model = tokens.model(), "streaming");

    let mut stdout = std::io::stdout();
    let mut outcome = Ok(());
    while let Some(chunk) = tokens.next().await {
        match chunk {
            Ok(chunk) if chunk.done => break,
            Ok(chunk) => {
                write!(stdout, "{}", chunk.token)?;
                stdout.flush()?;
            }
            Err(e) => {
                outcome = Err(anyhow::Error::new(e).context("stream interrupted"));
                break;
            }
        }
    }
    println!();
    eprintln!(
        "{}",
        format!("{} · {} chars", tokens.provider(), tokens.response_length()).dimmed()
    );
    interrupt.abort();
    outcome
}

pub async fn embed(inputs: Vec<String>, dimensions: Option<u32>, args: &RequestArgs) -> Result<()> {
    let service = service(args);
    let options = helpers::call_options(args);
    let input = if inputs.len() == 1 {
        EmbeddingInput::Single(inputs[0].clone())
    } else {
        EmbeddingInput::Batch(inputs.clone())
    };
    let request = EmbeddingRequest { input, dimensions };

    let result = service
        .embed(&request, &options, None)
        .await
        .context("embedding failed")?;

    println!();
    println!(
        "{} {}",
        result.provider.as_str().cyan().bold(),
        format!("({})", result.model).dimmed()
    );
    let vectors = result.vectors.unwrap_or_else(|| vec![result.vector]);
    for (input, vector) in inputs.iter().zip(&vectors) {
        let preview: Vec<String> = vector.iter().take(4).map(|v| format!("{v:.4}")).collect();
        println!(
            "  {:<24} dim {:<5} [{}{}]",
            truncate(input, 24),
            vector.len(),
            preview.join(", "),
            if vector.len() > 4 { ", …" } else { "" }
        );
    }
    println!();
    helpers::print_usage(&result.usage);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}
