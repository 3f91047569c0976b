//! Download command handler: build the queue, run the orchestrator until idle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docsync_core::inventory::DownloadHistory;
use docsync_core::{
    DEFAULT_PRIORITY, DownloadOrchestrator, HttpClient, JobState, OrchestratorConfig,
    OrchestratorEvent, QueueSelection,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::AppContext;
use super::compare::comparison_engine;
use crate::cli::DownloadArgs;

pub async fn run_download_command(
    ctx: &mut AppContext,
    args: &DownloadArgs,
    quiet: bool,
) -> Result<()> {
    apply_overrides(ctx, args);
    ctx.settings.validate().context("invalid download settings")?;

    let selection = QueueSelection {
        include_new: !args.no_new,
        include_updated: !args.no_updated,
        include_corrupted: !args.no_corrupted,
    };
    let specs = comparison_engine(ctx)
        .build_download_queue(args.site, selection)
        .await
        .context("failed to build the download queue")?;
    if specs.is_empty() {
        println!("Nothing to download.");
        return Ok(());
    }

    let client = HttpClient::new(&ctx.settings.client_options())
        .context("failed to build HTTP client")?;
    let history: Arc<dyn DownloadHistory> = ctx.store.clone();
    let orchestrator = DownloadOrchestrator::new(
        OrchestratorConfig::from_settings(&ctx.settings)?,
        client,
        Arc::clone(&ctx.validator),
        Some(history),
    )?;

    let total = specs.len();
    for spec in specs {
        let remote_file_id = spec.remote_file_id;
        if let Err(e) = orchestrator.enqueue(spec, DEFAULT_PRIORITY) {
            warn!(remote_file_id, error = %e, "skipping job");
        }
    }

    let stop_progress = CancellationToken::new();
    let progress = spawn_progress(&orchestrator, total, quiet, stop_progress.clone());

    orchestrator.start();
    orchestrator.wait_idle().await;
    orchestrator.stop().await;
    stop_progress.cancel();
    if let Err(e) = progress.await {
        warn!(error = %e, "progress task failed");
    }

    let finished = orchestrator.list_finished();
    let completed = finished
        .iter()
        .filter(|job| job.state == JobState::Completed)
        .count();
    let failed: Vec<_> = finished
        .iter()
        .filter(|job| job.state == JobState::Failed)
        .collect();
    info!(completed, failed = failed.len(), total, "download run complete");

    println!("Downloaded {completed} of {total} files.");
    for job in &failed {
        println!(
            "  failed: {} ({})",
            job.spec.display_name,
            job.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn apply_overrides(ctx: &mut AppContext, args: &DownloadArgs) {
    let download = &mut ctx.settings.download;
    if let Some(concurrency) = args.concurrency {
        download.concurrent_downloads = usize::from(concurrency);
    }
    if let Some(rate_limit) = args.rate_limit {
        download.rate_limit_kbps = i64::from(rate_limit);
    }
    if let Some(retries) = args.retries {
        download.retry_count = u32::from(retries);
    }
    if let Some(dir) = &args.output_dir {
        download.directory.clone_from(dir);
    }
}

/// Drives a progress bar from orchestrator events until `stop` fires.
fn spawn_progress(
    orchestrator: &DownloadOrchestrator,
    total: usize,
    quiet: bool,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut events = orchestrator.subscribe();
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        let bar = ProgressBar::new(total as u64);
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        loop {
            let event = tokio::select! {
                () = stop.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(OrchestratorEvent::JobStarted { job_id }) => {
                    if let Some(job) = orchestrator.job(job_id) {
                        bar.set_message(job.spec.display_name);
                    }
                }
                Ok(event) if event.is_terminal() => bar.inc(1),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    bar.set_position(orchestrator.list_finished().len() as u64);
                }
                Err(RecvError::Closed) => break,
            }
        }
        bar.finish_and_clear();
    })
}
