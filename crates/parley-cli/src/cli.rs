//! CLI argument definitions for Parley.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use parley_llm::Complexity;

/// Parley -- a streaming client for many LLM providers.
#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Parley -- streaming chat with many LLM providers",
    long_about = "Streams a chat completion from the configured provider, retrying \
                  transient failures and falling back to other models when needed."
)]
pub struct Cli {
    /// Settings file (TOML).  Defaults to `parley.toml` when present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one prompt and stream the reply to stdout.
    Chat {
        /// The user prompt.
        prompt: String,

        /// System prompt.
        #[arg(long, short)]
        system: Option<String>,

        /// Force a complexity tier instead of estimating it from the prompt.
        #[arg(long, short, value_enum)]
        tier: Option<TierArg>,

        /// Use this model instead of the configured default.
        #[arg(long, short)]
        model: Option<String>,
    },

    /// Show which models would be used, without sending anything.
    Resolve {
        /// Only show the resolution for this tier.
        #[arg(long, short, value_enum)]
        tier: Option<TierArg>,
    },
}

/// Complexity tier as accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TierArg {
    Light,
    Standard,
    Heavy,
}

impl From<TierArg> for Complexity {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Light => Complexity::Light,
            TierArg::Standard => Complexity::Standard,
            TierArg::Heavy => Complexity::Heavy,
        }
    }
}
