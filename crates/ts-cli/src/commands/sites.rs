//! `tenant-sweep sites`: list tenant sites.

use super::{print_json, RunContext, RunOutcome};
use crate::OutputFormat;
use anyhow::{Context, Result};
use colored::Colorize;
use ts_connectors::DirectoryConnector;

pub async fn run_sites(ctx: &RunContext, include_onedrive: bool) -> Result<RunOutcome> {
    let sites = ctx
        .directory()?
        .list_sites(include_onedrive)
        .await
        .context("Failed to enumerate tenant sites")?;

    match ctx.format {
        OutputFormat::Json => print_json(&sites)?,
        OutputFormat::Text => {
            for site in &sites {
                let marker = if site.personal {
                    "onedrive".dimmed()
                } else {
                    "site".cyan()
                };
                println!(
                    "  {:<8} {} {}",
                    marker,
                    site.url,
                    site.title.as_deref().unwrap_or("")
                );
            }
            println!();
            println!("{} site(s)", sites.len());
        }
    }
    Ok(RunOutcome::Clean)
}
