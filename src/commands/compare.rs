//! Compare command handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use docsync_core::FileComparisonEngine;

use super::AppContext;
use crate::cli::CompareArgs;

pub fn comparison_engine(ctx: &AppContext) -> FileComparisonEngine {
    FileComparisonEngine::new(
        ctx.store.clone(),
        ctx.store.clone(),
        ctx.store.clone(),
        Arc::clone(&ctx.validator),
    )
}

pub async fn run_compare_command(ctx: &AppContext, args: &CompareArgs) -> Result<()> {
    let result = comparison_engine(ctx)
        .compare(args.site)
        .await
        .context("comparison failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to encode comparison")?
        );
        return Ok(());
    }

    let summary = result.summary();
    println!("New:       {}", summary.new);
    println!("Updated:   {}", summary.updated);
    println!("Corrupted: {}", summary.corrupted);
    println!("OK:        {}", summary.ok);
    for corrupted in &result.corrupted_files {
        println!("  corrupted: {} ({})", corrupted.local.path, corrupted.reason);
    }
    for proposal in &result.proposed_links {
        println!(
            "  possible copy: local {} matches remote {} (docsync link {} {})",
            proposal.local_id, proposal.remote_id, proposal.local_id, proposal.remote_id
        );
    }
    Ok(())
}
