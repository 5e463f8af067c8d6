//! Output formatting utilities for text, JSON, and CSV output.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use stressband_core::UiSnapshot;
use stressband_types::{Sample, StressState};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Omit header row in CSV output.
    pub no_header: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            ..Self::default()
        }
    }

    /// Create with no_header option for CSV output.
    pub fn with_no_header(mut self, no_header: bool) -> Self {
        self.no_header = no_header;
        self
    }

    /// Create with compact JSON option.
    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// Escape a value for CSV output.
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| "???".to_string())
}

fn optional(value: Option<f32>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", precision, v))
}

/// Format a stress classification with color
#[must_use]
pub fn format_stress_state(state: StressState, no_color: bool) -> String {
    let label = state.to_string().to_uppercase();

    if no_color {
        format!("[{}]", label)
    } else {
        match state {
            StressState::Calm => format!("[{}]", label.green()),
            StressState::Stress => format!("[{}]", label.red()),
            StressState::Amusement => format!("[{}]", label.yellow()),
            StressState::Unknown => format!("[{}]", label.dimmed()),
        }
    }
}

/// Format the link indicator
#[must_use]
pub fn format_link(connected: bool, no_color: bool) -> String {
    match (connected, no_color) {
        (true, true) => "LINK".to_string(),
        (false, true) => "----".to_string(),
        (true, false) => format!("{}", "LINK".green()),
        (false, false) => format!("{}", "----".dimmed()),
    }
}

/// One human-readable line per snapshot.
#[must_use]
pub fn format_snapshot_line(snapshot: &UiSnapshot, at: OffsetDateTime, opts: &FormatOptions) -> String {
    format!(
        "{} {} HRV {:>7} ms  EDA {:>7} µS  {}  {}\n",
        timestamp(at),
        format_link(snapshot.connected, opts.no_color),
        optional(snapshot.latest_hrv, 1),
        optional(snapshot.latest_eda, 2),
        format_stress_state(snapshot.stress_state, opts.no_color),
        snapshot.status,
    )
}

#[derive(Serialize)]
struct SnapshotRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    snapshot: &'a UiSnapshot,
}

/// A snapshot as JSON, stamped with the time it was printed.
pub fn format_snapshot_json(
    snapshot: &UiSnapshot,
    at: OffsetDateTime,
    opts: &FormatOptions,
) -> Result<String> {
    opts.as_json(&SnapshotRecord {
        timestamp: timestamp(at),
        snapshot,
    })
}

/// CSV header matching [`format_snapshot_csv_line`].
#[must_use]
pub fn format_snapshot_csv_header() -> String {
    "timestamp,connected,status,hrv_ms,eda_us,stress_state,stress_code\n".to_string()
}

/// One CSV row per snapshot. Histories are omitted.
#[must_use]
pub fn format_snapshot_csv_line(snapshot: &UiSnapshot, at: OffsetDateTime) -> String {
    format!(
        "{},{},{},{},{},{},{}\n",
        timestamp(at),
        snapshot.connected,
        csv_escape(&snapshot.status),
        snapshot.latest_hrv.map(|v| v.to_string()).unwrap_or_default(),
        snapshot.latest_eda.map(|v| v.to_string()).unwrap_or_default(),
        snapshot.stress_state,
        snapshot.last_code.map(|c| c.to_string()).unwrap_or_default(),
    )
}

/// Describe a decoded sample.
#[must_use]
pub fn format_sample_text(sample: &Sample, opts: &FormatOptions) -> String {
    match sample {
        Sample::Continuous { signal, value } => {
            let kind = stressband_types::SignalKind::from(*signal);
            format!("{}: {} {}\n", kind, value, signal.unit())
        }
        Sample::Classification { code, state } => format!(
            "stress state: {} (code {})\n",
            format_stress_state(*state, opts.no_color),
            code
        ),
    }
}

/// CSV rendering of a decoded sample.
#[must_use]
pub fn format_sample_csv(sample: &Sample, opts: &FormatOptions) -> String {
    let mut out = String::new();
    if !opts.no_header {
        out.push_str("signal,value,state\n");
    }
    match sample {
        Sample::Continuous { signal, value } => {
            let kind = stressband_types::SignalKind::from(*signal);
            out.push_str(&format!("{},{},\n", csv_escape(&kind.to_string()), value));
        }
        Sample::Classification { code, state } => {
            out.push_str(&format!("stress state,{},{}\n", code, state));
        }
    }
    out
}
