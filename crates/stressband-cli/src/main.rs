use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands};
use commands::{WatchArgs, cmd_config, cmd_decode, cmd_watch};
use config::{Config, resolve_format, resolve_manager_config};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "stressband", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let opts = FormatOptions::new(cli.no_color || config.no_color).with_compact(cli.compact);

    match cli.command {
        Commands::Watch {
            session,
            format,
            count,
            no_header,
        } => {
            let opts = opts.with_no_header(no_header);
            cmd_watch(WatchArgs {
                manager: resolve_manager_config(&session, &config),
                format: resolve_format(format, &config),
                count,
                output: cli.output.as_ref(),
                opts: &opts,
                quiet: cli.quiet,
            })
            .await?;
        }
        Commands::Decode {
            signal,
            payload,
            format,
        } => {
            cmd_decode(
                signal.into(),
                &payload,
                format,
                cli.output.as_ref(),
                &opts,
            )?;
        }
        Commands::Config { action } => cmd_config(action)?,
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}
