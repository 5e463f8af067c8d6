//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use stressband_core::ManagerConfig;

use crate::cli::{ConfigKey, OutputFormat, SessionArgs, parse_bool_arg, parse_timeout_secs};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default output format
    #[serde(default)]
    pub format: Option<String>,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,

    /// Only connect to bands whose name contains this text
    #[serde(default)]
    pub name: Option<String>,

    /// Connect timeout in seconds
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Service discovery timeout in seconds
    #[serde(default)]
    pub discovery_timeout: Option<u64>,

    /// Subscription timeout in seconds
    #[serde(default)]
    pub subscribe_timeout: Option<u64>,

    /// Clear history whenever a new connection starts
    #[serde(default)]
    pub reset_history: bool,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stressband")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from a specific path, or return default if unusable
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Read one key as display text.
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Format => self.format.clone(),
            ConfigKey::NoColor => Some(self.no_color.to_string()),
            ConfigKey::Name => self.name.clone(),
            ConfigKey::ConnectTimeout => self.connect_timeout.map(|s| s.to_string()),
            ConfigKey::DiscoveryTimeout => self.discovery_timeout.map(|s| s.to_string()),
            ConfigKey::SubscribeTimeout => self.subscribe_timeout.map(|s| s.to_string()),
            ConfigKey::ResetHistory => Some(self.reset_history.to_string()),
        }
    }

    /// Set one key from user input, validating the value.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        match key {
            ConfigKey::Format => {
                if OutputFormat::from_name(value).is_none() {
                    bail!("Invalid format '{}'. Use: text, json, csv", value);
                }
                self.format = Some(value.to_lowercase());
            }
            ConfigKey::NoColor => self.no_color = parse_bool_arg(value).map_err(anyhow::Error::msg)?,
            ConfigKey::Name => self.name = Some(value.to_string()),
            ConfigKey::ConnectTimeout => {
                self.connect_timeout = Some(parse_timeout_secs(value).map_err(anyhow::Error::msg)?)
            }
            ConfigKey::DiscoveryTimeout => {
                self.discovery_timeout =
                    Some(parse_timeout_secs(value).map_err(anyhow::Error::msg)?)
            }
            ConfigKey::SubscribeTimeout => {
                self.subscribe_timeout =
                    Some(parse_timeout_secs(value).map_err(anyhow::Error::msg)?)
            }
            ConfigKey::ResetHistory => {
                self.reset_history = parse_bool_arg(value).map_err(anyhow::Error::msg)?
            }
        }
        Ok(())
    }

    /// Reset one key to its default.
    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::Format => self.format = None,
            ConfigKey::NoColor => self.no_color = false,
            ConfigKey::Name => self.name = None,
            ConfigKey::ConnectTimeout => self.connect_timeout = None,
            ConfigKey::DiscoveryTimeout => self.discovery_timeout = None,
            ConfigKey::SubscribeTimeout => self.subscribe_timeout = None,
            ConfigKey::ResetHistory => self.reset_history = false,
        }
    }

    /// Output format from config, if set and valid.
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.format.as_deref().and_then(OutputFormat::from_name)
    }
}

/// Build the manager configuration: command-line flags override config,
/// config overrides library defaults.
pub fn resolve_manager_config(args: &SessionArgs, config: &Config) -> ManagerConfig {
    let mut manager = ManagerConfig::default();

    if let Some(name) = args.name.clone().or_else(|| config.name.clone()) {
        manager = manager.name_filter(name);
    }
    if let Some(secs) = args.connect_timeout.or(config.connect_timeout) {
        manager = manager.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.discovery_timeout.or(config.discovery_timeout) {
        manager = manager.discovery_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.subscribe_timeout.or(config.subscribe_timeout) {
        manager = manager.subscribe_timeout(Duration::from_secs(secs));
    }

    manager.reset_history_on_connect(args.reset_history || config.reset_history)
}

/// Resolve output format: explicit flag, then config, then text.
pub fn resolve_format(arg: Option<OutputFormat>, config: &Config) -> OutputFormat {
    arg.or_else(|| config.output_format()).unwrap_or_default()
}
