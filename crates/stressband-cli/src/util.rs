//! Utility functions for CLI operations.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Destination for streamed output, opened once and written line by line.
pub enum OutputSink {
    Stdout,
    File(File),
}

impl OutputSink {
    /// Open the sink, truncating any existing file.
    pub fn open(output: Option<&PathBuf>) -> Result<Self> {
        match output {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Ok(Self::File(file))
            }
            None => Ok(Self::Stdout),
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout => io::stdout().write(buf),
            Self::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().flush(),
            Self::File(file) => file.flush(),
        }
    }
}

/// Write one chunk and flush, so streamed lines appear immediately.
pub fn emit<W: Write>(out: &mut W, content: &str) -> Result<()> {
    out.write_all(content.as_bytes())
        .context("Failed to write output")?;
    out.flush().context("Failed to flush output")?;
    Ok(())
}

/// Parse a hex string into bytes. Whitespace, `:` and `-` separators and a
/// leading `0x` are accepted.
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    hex::decode(&digits).with_context(|| format!("Invalid hex payload '{}'", input))
}
