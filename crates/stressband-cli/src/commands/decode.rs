//! Decode command implementation.
//!
//! Runs a payload captured elsewhere (a sniffer log, a phone app) through
//! the same decoder the session uses.

use std::path::PathBuf;

use anyhow::{Context, Result};
use stressband_types::{Sample, SignalKind, decode_signal};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_sample_csv, format_sample_text};
use crate::util::{parse_hex, write_output};

pub fn cmd_decode(
    signal: SignalKind,
    payload: &str,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let content = render_decoded(signal, payload, format, opts)?;
    write_output(output, &content)
}

/// Decode `payload` for `signal` and render it in the requested format.
pub fn render_decoded(
    signal: SignalKind,
    payload: &str,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<String> {
    let bytes = parse_hex(payload)?;
    let sample: Sample = decode_signal(signal, &bytes)
        .with_context(|| format!("Failed to decode {} payload", signal))?;
    tracing::debug!("Decoded {} bytes as {:?}", bytes.len(), sample);

    match format {
        OutputFormat::Text => Ok(format_sample_text(&sample, opts)),
        OutputFormat::Json => opts.as_json(&sample),
        OutputFormat::Csv => Ok(format_sample_csv(&sample, opts)),
    }
}
