//! Site command handlers: add, list and remove sites.

use anyhow::{Context, Result, bail};
use docsync_core::inventory::{NewSite, SiteStore};
use docsync_core::scraper;
use tracing::info;

use super::AppContext;
use crate::cli::SiteCommand;

pub async fn run_site_command(ctx: &AppContext, command: &SiteCommand) -> Result<()> {
    match command {
        SiteCommand::Add { name, url, scraper } => add_site(ctx, name, url, scraper).await,
        SiteCommand::List => list_sites(ctx).await,
        SiteCommand::Remove { id } => {
            if !ctx.store.delete_site(*id).await? {
                bail!("site {id} not found");
            }
            info!(site_id = id, "site removed");
            println!("Removed site {id}.");
            Ok(())
        }
    }
}

async fn add_site(ctx: &AppContext, name: &str, url: &str, scraper_type: &str) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid site URL {url}"))?;
    let known = scraper::builtin_registry(&ctx.settings.plugins.disabled);
    if !known.contains(scraper_type) {
        bail!(
            "unknown scraper type {scraper_type} (available: {})",
            known.keys().join(", ")
        );
    }
    let id = ctx
        .store
        .add_site(&NewSite {
            name: name.trim().to_string(),
            url: parsed.to_string(),
            scraper_type: scraper_type.to_string(),
        })
        .await?;
    info!(site_id = id, url = %parsed, "site added");
    println!("Added site {id}: {name} ({parsed}) using {scraper_type}");
    Ok(())
}

async fn list_sites(ctx: &AppContext) -> Result<()> {
    let sites = ctx.store.list_sites().await?;
    if sites.is_empty() {
        println!("No sites configured. Add one with `docsync site add --name NAME --url URL`.");
        return Ok(());
    }
    for site in sites {
        println!(
            "{:>4}  {:<24} {:<18} {:<20} {}",
            site.id,
            site.name,
            site.scraper_type,
            site.last_scan_at.as_deref().unwrap_or("never scanned"),
            site.url
        );
    }
    Ok(())
}
