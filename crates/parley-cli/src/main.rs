//! CLI entry point for Parley.
//!
//! This binary provides the `parley` command: `chat` streams one reply,
//! `resolve` shows the model resolution chain.

mod cli;
mod helpers;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_llm::{
    AgentModel, Complexity, EnvCredentials, LlmClient, LlmError, LlmResponse, Message,
    ModelRouter, ResolvedModel,
};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::helpers::{describe, init_tracing, load_settings};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    match cli.command {
        Commands::Chat {
            prompt,
            system,
            tier,
            model,
        } => {
            cmd_chat(
                cli.config.as_deref(),
                &prompt,
                system.as_deref(),
                tier.map(Complexity::from),
                model,
            )
            .await
        }
        Commands::Resolve { tier } => cmd_resolve(cli.config.as_deref(), tier.map(Complexity::from)),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(
    config: Option<&std::path::Path>,
    prompt: &str,
    system: Option<&str>,
    tier: Option<Complexity>,
    model: Option<String>,
) -> Result<()> {
    let settings = load_settings(config)?;
    let router = ModelRouter::new(settings.router, Arc::new(EnvCredentials));
    let client = Arc::new(LlmClient::new(settings.client).context("failed to create LLM client")?);

    let primary = match (model, tier) {
        (Some(model), _) => router.resolve_primary(Some(&AgentModel::inferred(model))),
        (None, Some(tier)) => router.resolve_for_complexity(tier),
        (None, None) => router.resolve_for_input(prompt),
    }
    .or_else(|| router.resolve_offline_fallback())
    .context(
        "no usable model: set router.default_model in the settings file and the \
         provider's API key in the environment",
    )?;

    // Ctrl-C cancels the running exchange.
    let canceller = Arc::clone(&client);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let messages = [Message::user(prompt)];
    let result = send_with_fallback(&client, &router, primary, &messages, system).await;
    ctrl_c.abort();

    match result? {
        LlmResponse::Text(_) => println!(),
        LlmResponse::ToolCalls(calls) => {
            for call in calls {
                let args = call.arguments_value().unwrap_or_default();
                println!("{}", serde_json::json!({"tool": call.name, "arguments": args}));
            }
        }
    }

    Ok(())
}

/// Send on `primary`, then walk the fallback chain while failures are
/// fallback-worthy.
///
/// A network-level failure skips remote candidates: only a local model can
/// help then.
async fn send_with_fallback(
    client: &LlmClient,
    router: &ModelRouter,
    primary: ResolvedModel,
    messages: &[Message],
    system: Option<&str>,
) -> std::result::Result<LlmResponse, LlmError> {
    let mut fallbacks = [router.resolve_fallback(), router.resolve_offline_fallback()]
        .into_iter()
        .flatten();
    let mut target = primary;

    loop {
        info!(provider = %target.provider, model = %target.model, is_fallback = target.is_fallback, "sending prompt");

        let mut wrote_text = false;
        let err = match client
            .send(&target, messages, system, &[], |text| {
                wrote_text = true;
                let mut out = io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            })
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if !ModelRouter::should_fallback(&err) {
            return Err(err);
        }

        let network = ModelRouter::is_network_error(&err);
        let next = fallbacks.find(|candidate| {
            (!network || candidate.provider.is_local())
                && (candidate.provider, &candidate.model) != (target.provider, &target.model)
        });
        let Some(next) = next else {
            return Err(err);
        };

        if wrote_text {
            println!();
        }
        warn!(
            error = %err,
            provider = %next.provider,
            model = %next.model,
            "falling back to another model"
        );
        target = next;
    }
}

// ---------------------------------------------------------------------------
// Subcommand: resolve
// ---------------------------------------------------------------------------

fn cmd_resolve(config: Option<&std::path::Path>, tier: Option<Complexity>) -> Result<()> {
    let settings = load_settings(config)?;
    let router = ModelRouter::new(settings.router, Arc::new(EnvCredentials));

    match tier {
        Some(tier) => {
            println!("{tier:<10} {}", describe(router.resolve_for_complexity(tier).as_ref()));
        }
        None => {
            println!("{:<10} {}", "primary", describe(router.resolve_primary(None).as_ref()));
            for tier in [Complexity::Light, Complexity::Standard, Complexity::Heavy] {
                println!(
                    "{tier:<10} {}",
                    describe(router.resolve_for_complexity(tier).as_ref())
                );
            }
            println!("{:<10} {}", "fallback", describe(router.resolve_fallback().as_ref()));
            println!(
                "{:<10} {}",
                "offline",
                describe(router.resolve_offline_fallback().as_ref())
            );
        }
    }

    Ok(())
}
