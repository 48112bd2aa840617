//! CLI argument definitions for chatgate.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// chatgate -- one chat interface over several LLM providers.
#[derive(Parser)]
#[command(
    name = "chatgate",
    version,
    about = "chatgate -- provider-agnostic chat gateway",
    long_about = "Send a chat message to Qwen or HunYuan through a single interface. \
                  Credentials come from a TOML config file and CHATGATE_* environment \
                  variables (a .env file is honored)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and print the answer.
    Chat {
        #[command(flatten)]
        source: ConfigSource,

        /// Model name; the provider default is used when omitted.
        #[arg(long, short)]
        model: Option<String>,

        /// System tip sent with the message.
        #[arg(long, short)]
        tips: Option<String>,

        /// Print increments as they arrive.
        #[arg(long, short)]
        stream: bool,

        /// Strip Markdown syntax from the answer.
        #[arg(long)]
        plain: bool,

        /// The message to send.
        message: String,
    },

    /// Load the configuration and construct a client without sending anything.
    Check {
        #[command(flatten)]
        source: ConfigSource,
    },
}

/// Where the client configuration comes from.
#[derive(Args)]
pub struct ConfigSource {
    /// TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Provider tag (`qwen`, `hunyuan`); overrides the file and environment.
    #[arg(long, short)]
    pub provider: Option<String>,
}
