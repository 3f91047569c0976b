//! Link and unlink command handlers.

use anyhow::{Context, Result};

use super::AppContext;
use super::compare::comparison_engine;

pub async fn run_link_command(ctx: &AppContext, local_id: i64, remote_id: i64) -> Result<()> {
    comparison_engine(ctx)
        .link(local_id, remote_id)
        .await
        .with_context(|| format!("failed to link local file {local_id} to remote file {remote_id}"))?;
    println!("Linked local file {local_id} to remote file {remote_id}.");
    Ok(())
}

pub async fn run_unlink_command(ctx: &AppContext, local_id: i64) -> Result<()> {
    comparison_engine(ctx)
        .unlink(local_id)
        .await
        .with_context(|| format!("failed to unlink local file {local_id}"))?;
    println!("Unlinked local file {local_id}.");
    Ok(())
}
