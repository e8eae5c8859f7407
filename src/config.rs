//! Configuration for abdtool runs.
//!
//! Configuration sources (highest priority first):
//! 1. Command line flags (applied by the CLI on top of the resolved config)
//! 2. Environment variables (ABDTOOL_VERBOSITY, ABDTOOL_SHUTDOWN_GRACE_MS,
//!    ABDTOOL_SUBSCRIBE_TIMEOUT_SECONDS, ABDTOOL_LOG)
//! 3. Config file (.abdtool/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches the current directory and its parents for .abdtool/config.yaml
//! - Falls back to ~/.abdtool/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::EngineSettings;
use crate::errors::Verbosity;

pub const CONFIG_DIR: &str = ".abdtool";
pub const CONFIG_FILE: &str = "config.yaml";

pub const ENV_VERBOSITY: &str = "ABDTOOL_VERBOSITY";
pub const ENV_SHUTDOWN_GRACE_MS: &str = "ABDTOOL_SHUTDOWN_GRACE_MS";
pub const ENV_SUBSCRIBE_TIMEOUT_SECONDS: &str = "ABDTOOL_SUBSCRIBE_TIMEOUT_SECONDS";
pub const ENV_LOG: &str = "ABDTOOL_LOG";

const DEFAULT_LOG_FILTER: &str = "info";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub verbosity: Option<Verbosity>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Time routines get to stop after shutdown before being aborted
    pub shutdown_grace_ms: Option<u64>,
    /// Bound on waiting for subscribed events; unbounded when absent
    pub subscribe_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// tracing-subscriber EnvFilter directive; RUST_LOG still wins
    pub filter: Option<String>,
}

/// Configuration after every source has been applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub verbosity: Verbosity,
    pub engine: EngineSettings,
    pub log_filter: String,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            engine: EngineSettings::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            config_file: None,
        }
    }
}

/// Find config file by searching `start` and its parents, then the home
/// directory
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.is_file() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home_config = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    home_config.is_file().then_some(home_config)
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Apply environment overrides on top of a config file.
///
/// `env` looks a variable up; [`load_config`] passes `std::env::var`.
pub fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    if let Some((path, file)) = file {
        if let Some(verbosity) = file.verbosity {
            resolved.verbosity = verbosity;
        }
        if let Some(ms) = file.engine.shutdown_grace_ms {
            resolved.engine.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(secs) = file.engine.subscribe_timeout_seconds {
            resolved.engine.subscribe_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(filter) = file.log.filter {
            resolved.log_filter = filter;
        }
        resolved.config_file = Some(path);
    }

    if let Some(value) = env(ENV_VERBOSITY) {
        resolved.verbosity = value
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("Invalid {}", ENV_VERBOSITY))?;
    }
    if let Some(value) = env(ENV_SHUTDOWN_GRACE_MS) {
        let ms: u64 = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", ENV_SHUTDOWN_GRACE_MS, value))?;
        resolved.engine.shutdown_grace = Duration::from_millis(ms);
    }
    if let Some(value) = env(ENV_SUBSCRIBE_TIMEOUT_SECONDS) {
        let secs: u64 = value.trim().parse().with_context(|| {
            format!("Invalid {}: {:?}", ENV_SUBSCRIBE_TIMEOUT_SECONDS, value)
        })?;
        resolved.engine.subscribe_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(value) = env(ENV_LOG) {
        resolved.log_filter = value;
    }

    Ok(resolved)
}

/// Load configuration from all sources, discovering the file from `start`
pub fn load_config_from(start: &Path) -> Result<ResolvedConfig> {
    let file = match find_config_file(start) {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(file, |key| std::env::var(key).ok())
}

/// Load configuration from all sources, starting at the current directory
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd)
}
