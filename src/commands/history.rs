//! History command handler: show recent downloads.

use anyhow::Result;
use docsync_core::inventory::DownloadHistory;

use super::AppContext;

pub async fn run_history_command(ctx: &AppContext, limit: i64) -> Result<()> {
    let rows = ctx.store.recent(limit).await?;
    if rows.is_empty() {
        println!("No download history yet.");
        return Ok(());
    }
    for row in rows {
        let remote = row
            .remote_file_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let local = row
            .local_file_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let mut line = format!(
            "{:>5}  {:<11} remote={:<6} local={:<6} {}",
            row.id,
            row.status(),
            remote,
            local,
            row.completed_at.as_deref().unwrap_or(&row.created_at)
        );
        if let Some(error) = &row.error {
            line.push_str("  ");
            line.push_str(error);
        }
        println!("{line}");
    }
    Ok(())
}
