//! Watch command implementation.
//!
//! Runs one session against the nearest matching band and prints a line per
//! published snapshot. The session is never retried automatically: once it
//! ends in `Disconnected` or `Error`, the last snapshot stays on screen until
//! the user interrupts.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use stressband_core::{BleTransport, ConnectionManager, ManagerConfig, Transport};
use time::OffsetDateTime;

use crate::cli::OutputFormat;
use crate::format::{
    FormatOptions, format_snapshot_csv_header, format_snapshot_csv_line, format_snapshot_json,
    format_snapshot_line,
};
use crate::util::{OutputSink, emit};

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub manager: ManagerConfig,
    pub format: OutputFormat,
    pub count: u32,
    pub output: Option<&'a PathBuf>,
    pub opts: &'a FormatOptions,
    pub quiet: bool,
}

pub async fn cmd_watch(args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        manager,
        format,
        count,
        output,
        opts,
        quiet,
    } = args;

    let transport = BleTransport::new()
        .await
        .context("Failed to initialize Bluetooth")?;
    let manager = ConnectionManager::new(transport, manager).context("Invalid session settings")?;
    let mut sink = OutputSink::open(output)?;

    if !quiet {
        eprintln!("Scanning for a stress band... (Ctrl-C to stop)");
    }

    let result = watch_session(&manager, &mut sink, format, count, opts, async {
        // If the handler cannot be installed, run until the count is reached.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;

    if !quiet {
        eprintln!("\nShutting down...");
    }
    manager.cleanup().await;

    let printed = result?;
    if count > 0 && printed >= count && !quiet {
        eprintln!("Completed {} snapshots.", printed);
    }
    Ok(())
}

/// Drive one session and write every snapshot to `out` until `shutdown`
/// resolves or `count` snapshots (when non-zero) have been written.
///
/// Returns the number of snapshots written. The caller owns cleanup.
pub async fn watch_session<T, W, F>(
    manager: &ConnectionManager<T>,
    out: &mut W,
    format: OutputFormat,
    count: u32,
    opts: &FormatOptions,
    shutdown: F,
) -> Result<u32>
where
    T: Transport + 'static,
    W: Write,
    F: Future<Output = ()>,
{
    let mut snapshots = manager.subscribe();
    let mut printed: u32 = 0;
    let mut ended_reported = false;

    if format == OutputFormat::Csv && !opts.no_header {
        emit(out, &format_snapshot_csv_header())?;
    }

    manager
        .start_connect()
        .await
        .context("Failed to start session")?;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let now = OffsetDateTime::now_utc();
                let rendered = match format {
                    OutputFormat::Text => format_snapshot_line(&snapshot, now, opts),
                    OutputFormat::Json => format_snapshot_json(&snapshot, now, opts)?,
                    OutputFormat::Csv => format_snapshot_csv_line(&snapshot, now),
                };
                emit(out, &rendered)?;
                printed += 1;

                if count > 0 && printed >= count {
                    break;
                }

                match manager.state().await.end_reason() {
                    Some(reason) if !ended_reported => {
                        tracing::warn!("Session ended ({}); press Ctrl-C to exit", reason);
                        ended_reported = true;
                    }
                    Some(_) => {}
                    None => ended_reported = false,
                }
            }
        }
    }

    Ok(printed)
}
