//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use fetchq_core::{CacheMode, Priority};

/// Fetch URLs and download files through a prioritized task queue.
///
/// Requests can be answered from a local HTTP cache; downloads resume from
/// partial files left behind by earlier runs.
#[derive(Parser, Debug)]
#[command(name = "fetchq")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Maximum concurrent tasks (1-100) [default: 3]
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum retry attempts for transient failures (0-10) [default: 2]
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch URLs and print their bodies to stdout
    Get(GetArgs),
    /// Download URLs to files
    Download(DownloadArgs),
    /// Show the effective configuration
    Config,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GetArgs {
    /// URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// How the cache and the network are consulted
    #[arg(long, default_value_t = CacheMode::Default)]
    pub cache_mode: CacheMode,

    /// Persist the cache in this SQLite file instead of memory
    #[arg(long)]
    pub cache_db: Option<PathBuf>,

    /// Queue priority (lowest, low, default, high, highest)
    #[arg(short, long, default_value_t = Priority::Default)]
    pub priority: Priority,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DownloadArgs {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output directory [default: current directory]
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Always start over instead of resuming partial files
    #[arg(long)]
    pub no_resume: bool,

    /// Replace files that already exist instead of keeping them
    #[arg(long)]
    pub delete_old: bool,

    /// Queue priority (lowest, low, default, high, highest)
    #[arg(short, long, default_value_t = Priority::Default)]
    pub priority: Priority,
}
