//! CLI entry point for fetchq.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod commands;

use app_config::load_default_file_config;
use cli::{Args, Command};
use commands::{Settings, run_config_show_command, run_download_command, run_get_command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Bodies go to stdout, so logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_default_file_config()?;
    if let Some(path) = loaded.path.as_ref().filter(|_| loaded.config.is_some()) {
        debug!(path = %path.display(), "Loaded config file");
    }
    let settings = Settings::resolve(&args, &loaded.file());

    let summary = match args.command {
        Command::Get(get) => run_get_command(get, &settings).await?,
        Command::Download(download) => run_download_command(download, &settings).await?,
        Command::Config => {
            run_config_show_command(&settings, &loaded);
            return Ok(ExitCode::SUCCESS);
        }
    };

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        retried = summary.retried,
        "Run complete"
    );
    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Some tasks did not complete"
        );
        Ok(ExitCode::FAILURE)
    }
}
