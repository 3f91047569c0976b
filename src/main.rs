//! CLI entry point for the docsync tool.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod cli;
mod commands;

use cli::{Args, Command};
use commands::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut ctx = AppContext::open(&args).await?;
    info!(command = command_name(&args.command), "docsync starting");

    match &args.command {
        Command::Site(site) => commands::run_site_command(&ctx, site).await,
        Command::Scan { site_id } => commands::run_scan_command(&ctx, *site_id).await,
        Command::ScanLocal { dir } => commands::run_scan_local_command(&ctx, dir).await,
        Command::Compare(compare) => commands::run_compare_command(&ctx, compare).await,
        Command::Download(download) => {
            commands::run_download_command(&mut ctx, download, args.quiet).await
        }
        Command::History { limit } => commands::run_history_command(&ctx, *limit).await,
        Command::Link {
            local_id,
            remote_id,
        } => commands::run_link_command(&ctx, *local_id, *remote_id).await,
        Command::Unlink { local_id } => commands::run_unlink_command(&ctx, *local_id).await,
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Site(_) => "site",
        Command::Scan { .. } => "scan",
        Command::ScanLocal { .. } => "scan-local",
        Command::Compare(_) => "compare",
        Command::Download(_) => "download",
        Command::History { .. } => "history",
        Command::Link { .. } => "link",
        Command::Unlink { .. } => "unlink",
    }
}
