//! CLI entry point for chatgate.
//!
//! `chatgate chat` sends one message through the gateway and prints the
//! answer; `chatgate check` only validates the configuration.

mod cli;
mod markdown;

use std::io::Write;

use anyhow::{Context, Result};
use chatgate_core::{ChatClient, ChatRequest, ClientConfig};
use clap::Parser;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigSource};
use crate::markdown::{LineFilter, MarkdownFilter};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    init_tracing("warn");

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            source,
            model,
            tips,
            stream,
            plain,
            message,
        } => {
            let mut request = ChatRequest::new(message);
            if let Some(model) = model {
                request = request.with_model(model);
            }
            if let Some(tips) = tips {
                request = request.with_tips(tips);
            }
            cmd_chat(&source, request, stream, plain).await
        }
        Commands::Check { source } => cmd_check(&source),
    }
}

fn load_config(source: &ConfigSource) -> Result<ClientConfig> {
    ClientConfig::load(source.config.as_deref(), source.provider.as_deref())
        .context("failed to load configuration")
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(
    source: &ConfigSource,
    request: ChatRequest,
    stream: bool,
    plain: bool,
) -> Result<()> {
    let client = ChatClient::new(load_config(source)?).context("failed to create chat client")?;
    let mut filter = if plain {
        Some(MarkdownFilter::new().context("failed to compile markdown filter")?)
    } else {
        None
    };

    if !stream {
        let reply = client.normal_chat(&request).await.context("chat failed")?;
        info!(request_id = reply.raw.request_id(), "reply received");
        let text = match filter.as_mut() {
            Some(f) => f.apply(&reply.response.content),
            None => reply.response.content,
        };
        println!("{text}");
        return Ok(());
    }

    let mut increments = client.stream_chat(&request).await.context("chat failed")?;
    let mut lines = filter.map(LineFilter::new);
    let mut stdout = std::io::stdout();
    while let Some(item) = increments.next().await {
        let delta = item.context("stream failed")?;
        match lines.as_mut() {
            Some(lines) => {
                let text = lines.push(&delta.content);
                if !text.is_empty() {
                    writeln!(stdout, "{text}")?;
                }
            }
            None => write!(stdout, "{}", delta.content)?,
        }
        stdout.flush()?;
    }
    match lines.as_mut() {
        Some(lines) => {
            let text = lines.finish();
            if !text.is_empty() {
                writeln!(stdout, "{text}")?;
            }
        }
        None => writeln!(stdout)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

fn cmd_check(source: &ConfigSource) -> Result<()> {
    let config = load_config(source)?;
    let client = ChatClient::new(config).context("invalid configuration")?;
    println!("configuration ok: provider {}", client.provider_kind());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default level.
///
/// Respects `RUST_LOG` if set; otherwise falls back to `default_level`.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
