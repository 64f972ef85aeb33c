//! Command-line surface and config loading (§10.1, §10.2).
//!
//! YAML loading and the interactive onboarding flow that produces a config
//! file are out-of-scope external collaborators (§1); this module only
//! covers the typed TOML file this binary is handed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sa_runtime_domain::config::RuntimeConfig;

#[derive(Debug, Parser)]
#[command(name = "sa-runtime-gateway", version, about = "Agent runtime gateway")]
pub struct Cli {
    /// Path to the TOML config file. Missing file falls back to defaults.
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Boot the runtime and process messages until interrupted (default).
    Serve,
    /// Validate the config file and exit without starting the runtime.
    ConfigValidate,
    /// Print the effective (defaulted) config as TOML and exit.
    ConfigShow,
}

/// Load `path` as TOML into a `RuntimeConfig`, falling back to
/// `RuntimeConfig::default()` when the file does not exist so a fresh
/// checkout can boot with no setup step.
pub fn load_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no config file found, using defaults");
        return Ok(RuntimeConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: RuntimeConfig =
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config)
}
