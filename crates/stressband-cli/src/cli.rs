//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use stressband_types::SignalKind;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl OutputFormat {
    /// Parse a format name as stored in the config file.
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Signal selector for the `decode` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignalArg {
    /// Heart-rate variability (f32 LE, milliseconds)
    Hrv,
    /// Electrodermal activity (f32 LE, microsiemens)
    Eda,
    /// Stress classification (u8 code)
    Stress,
}

impl From<SignalArg> for SignalKind {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::Hrv => SignalKind::Hrv,
            SignalArg::Eda => SignalKind::Eda,
            SignalArg::Stress => SignalKind::StressState,
        }
    }
}

/// Session tuning arguments
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Only connect to bands whose advertised name contains this text
    #[arg(short, long, env = "STRESSBAND_NAME")]
    pub name: Option<String>,

    /// Connect timeout in seconds (overrides config)
    #[arg(long, value_parser = parse_timeout_secs)]
    pub connect_timeout: Option<u64>,

    /// Service discovery timeout in seconds (overrides config)
    #[arg(long, value_parser = parse_timeout_secs)]
    pub discovery_timeout: Option<u64>,

    /// Subscription timeout in seconds (overrides config)
    #[arg(long, value_parser = parse_timeout_secs)]
    pub subscribe_timeout: Option<u64>,

    /// Clear HRV/EDA history whenever a new connection starts
    #[arg(long)]
    pub reset_history: bool,
}

#[derive(Parser)]
#[command(name = "stressband")]
#[command(author, version, about = "CLI for stress band wearables", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a band and stream readings until Ctrl-C
    Watch {
        #[command(flatten)]
        session: SessionArgs,

        /// Output format (defaults to config, then text)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Number of snapshots to print before exiting (0 for unlimited)
        #[arg(short = 'c', long, default_value = "0")]
        count: u32,

        /// Omit header row in CSV output (useful for appending)
        #[arg(long)]
        no_header: bool,
    },

    /// Decode a raw notification payload
    Decode {
        /// Signal the payload was received on
        #[arg(value_enum)]
        signal: SignalArg,

        /// Payload bytes as hex (spaces and colons allowed)
        payload: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Default output format
    Format,
    /// Disable colored output
    NoColor,
    /// Default band name filter
    Name,
    /// Connect timeout in seconds
    ConnectTimeout,
    /// Service discovery timeout in seconds
    DiscoveryTimeout,
    /// Subscription timeout in seconds
    SubscribeTimeout,
    /// Clear history on every new connection
    ResetHistory,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
        /// Configuration value
        value: String,
    },

    /// Unset (remove) a configuration value
    Unset {
        /// Configuration key to remove
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init,
}

/// Parse boolean argument with flexible input
pub fn parse_bool_arg(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "enable" | "enabled" => Ok(true),
        "false" | "no" | "off" | "0" | "disable" | "disabled" => Ok(false),
        _ => Err(format!(
            "Invalid boolean value '{}'. Use: true/false, yes/no, on/off, 1/0",
            s
        )),
    }
}

/// Parse a timeout in whole seconds, rejecting zero.
pub fn parse_timeout_secs(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if secs == 0 {
        return Err("Timeout must be at least 1 second".to_string());
    }
    Ok(secs)
}
