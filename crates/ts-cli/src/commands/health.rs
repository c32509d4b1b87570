//! `tenant-sweep health`: check both connectors against the tenant.

use super::{print_json, RunContext, RunOutcome};
use crate::OutputFormat;
use anyhow::{bail, Result};
use colored::Colorize;
use std::sync::Arc;
use ts_connectors::{Connector, ConnectorHealth};

pub async fn run_health(ctx: &RunContext) -> Result<RunOutcome> {
    let directory: Arc<dyn Connector> = ctx.directory()?;
    let sites: Arc<dyn Connector> = ctx.sites()?;
    let connectors = [directory, sites];

    let mut rows = Vec::with_capacity(connectors.len());
    for connector in &connectors {
        let health = match connector.health_check().await {
            Ok(h) => h,
            Err(e) => ConnectorHealth::Unhealthy(e.to_string()),
        };
        rows.push((connector.name().to_string(), health));
    }

    match ctx.format {
        OutputFormat::Json => {
            let json: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .map(|(name, h)| (name.clone(), serde_json::to_value(h).unwrap_or_default()))
                .collect();
            print_json(&json)?;
        }
        OutputFormat::Text => {
            println!("{}", "Connector Health".bold());
            println!("────────────────");
            for (name, health) in &rows {
                let status = match health {
                    ConnectorHealth::Healthy => "healthy".green(),
                    ConnectorHealth::Degraded(why) => format!("degraded: {}", why).yellow(),
                    ConnectorHealth::Unhealthy(why) => format!("unhealthy: {}", why).red(),
                };
                println!("  {}: {}", name, status);
            }
        }
    }

    if rows
        .iter()
        .any(|(_, h)| matches!(h, ConnectorHealth::Unhealthy(_)))
    {
        bail!("One or more connectors are unhealthy");
    }
    Ok(RunOutcome::Clean)
}
