//! Shared helpers for the CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parley_llm::{ResolvedModel, Settings};
use tracing_subscriber::EnvFilter;

/// Settings file picked up from the working directory when `--config` is not
/// given.
const DEFAULT_SETTINGS_FILE: &str = "parley.toml";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber.
///
/// Logs go to stderr so they never interleave with the streamed reply.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Load settings from `path`, or from `parley.toml` if it exists, or fall
/// back to defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path: Option<PathBuf> = match path {
        Some(p) => Some(p.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_SETTINGS_FILE)).filter(|p| p.exists()),
    };

    match path {
        Some(p) => Settings::load(&p)
            .with_context(|| format!("failed to load settings from {}", p.display())),
        None => {
            tracing::debug!("no settings file, using defaults");
            Ok(Settings::default())
        }
    }
}

/// One-line description of a resolution, never including the key.
pub fn describe(resolved: Option<&ResolvedModel>) -> String {
    match resolved {
        Some(r) => {
            let key = if r.api_key.is_empty() {
                "no key"
            } else {
                "key set"
            };
            format!("{}/{} ({key})", r.provider, r.model)
        }
        None => "(none)".to_owned(),
    }
}
