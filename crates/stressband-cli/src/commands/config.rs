//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::{ConfigAction, ConfigKey};
use crate::config::Config;
use crate::util::write_output;

pub fn cmd_config(action: ConfigAction) -> Result<()> {
    let output = run_config_action(action, &Config::path())?;
    write_output(None, &output)
}

/// Apply `action` to the config file at `path` and return what to print.
pub fn run_config_action(action: ConfigAction, path: &Path) -> Result<String> {
    match action {
        ConfigAction::Path => Ok(format!("{}\n", path.display())),
        ConfigAction::Show => {
            let config = Config::load_from(path);
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            Ok(format!("# {}\n{}", path.display(), content))
        }
        ConfigAction::Get { key } => {
            let config = Config::load_from(path);
            Ok(match config.get(key) {
                Some(value) => format!("{}\n", value),
                None => format!("{} is not set\n", key_name(key)),
            })
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load_from(path);
            config.set(key, &value)?;
            config.save_to(path)?;
            Ok(format!("Set {} = {}\n", key_name(key), value))
        }
        ConfigAction::Unset { key } => {
            let mut config = Config::load_from(path);
            config.unset(key);
            config.save_to(path)?;
            Ok(format!("Unset {}\n", key_name(key)))
        }
        ConfigAction::Init => {
            if path.exists() {
                bail!("Config file already exists: {}", path.display());
            }
            Config::default().save_to(path)?;
            Ok(format!("Created {}\n", path.display()))
        }
    }
}

fn key_name(key: ConfigKey) -> &'static str {
    match key {
        ConfigKey::Format => "format",
        ConfigKey::NoColor => "no_color",
        ConfigKey::Name => "name",
        ConfigKey::ConnectTimeout => "connect_timeout",
        ConfigKey::DiscoveryTimeout => "discovery_timeout",
        ConfigKey::SubscribeTimeout => "subscribe_timeout",
        ConfigKey::ResetHistory => "reset_history",
    }
}
