//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/besouro/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/besouro/` (~/.config/besouro/)
//! - State/Logs: `$XDG_STATE_HOME/besouro/` (~/.local/state/besouro/)

use crate::error::{Error, Result};
use crate::inference::RuleSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where the rule sources come from
    #[serde(default)]
    pub rules: RulesConfig,

    /// Rule engine limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rule source location
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RulesConfig {
    /// Directory holding `actions.toml`, `episode.toml` and `classifier.toml`.
    /// The built-in rules are used when unset.
    pub dir: Option<PathBuf>,
}

impl RulesConfig {
    /// Load the configured rule set, or the built-in one.
    pub fn load(&self) -> Result<RuleSet> {
        match &self.dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Loading rules from directory");
                RuleSet::from_dir(dir)
            }
            None => RuleSet::builtin(),
        }
    }
}

/// Rule engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Rule firings allowed per asserted fact in one `run()`. The budget
    /// for a window is this times the number of facts projected from it.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(Error::Config(
                "engine.max_cycles must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_cycles() -> usize {
    100
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.engine.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/besouro/config.toml` (~/.config/besouro/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("besouro").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/besouro/` (~/.local/state/besouro/). Log files in it
    /// are named `besouro.log.YYYY-MM-DD`; see `logging::current_log_file`.
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("besouro")
    }
}
