//! Command-line interface for stress band wearables.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `watch` | Connect to a band and print every snapshot until Ctrl-C |
//! | `decode` | Decode a hex payload for one signal |
//! | `config` | Manage CLI configuration |
//! | `completions` | Generate shell completions |
//!
//! # Output Formats
//!
//! - **Text** (default): one colored line per snapshot
//! - **JSON**: one object per snapshot, histories included
//! - **CSV**: latest values only, for spreadsheets
//!
//! # Configuration
//!
//! The CLI stores configuration in `~/.config/stressband/config.toml` (or
//! platform equivalent): default format, band name filter, phase timeouts
//! and whether history resets on every connection. Command-line flags
//! override the file.
//!
//! # Environment Variables
//!
//! - `STRESSBAND_NAME`: band name filter (overridden by `--name`)
//! - `NO_COLOR`: disable colored output when set
//! - `RUST_LOG`: log filter when neither `--verbose` nor `--quiet` is given
//!
//! # Examples
//!
//! ```bash
//! stressband watch --name "StressBand" --format json --output session.jsonl
//! stressband decode hrv "00 00 48 42"
//! stressband config set discovery-timeout 20
//! ```

// Re-export core dependencies for convenience
pub use stressband_core;
pub use stressband_types;
