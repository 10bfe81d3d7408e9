//! Clipfeed CLI - Command-line interface
//!
//! Resolves, prefetches and inspects feed media in the local cache.

mod commands;

use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use clipfeed_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "clipfeed")]
#[command(about = "Feed video cache and prefetcher")]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Cache directory (overrides CLIPFEED_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), None)
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    commands::handle_command(cli.command, cli.cache_dir).await
}
