//! `tenant-sweep lookup-upn`: resolve a list of names to UPNs.

use super::{print_json, RunContext, RunOutcome};
use crate::OutputFormat;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use ts_core::{lookup_names, parse_name_list, summarize, write_lookup_csv, LookupStatus};

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// File of names: "|First |Last |" table rows, "First,Last" or "First Last" lines
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Directory for the CSV report (default: output.directory from config)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

pub async fn run_lookup(ctx: &RunContext, args: LookupArgs) -> Result<RunOutcome> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let names = parse_name_list(&text);
    if names.is_empty() {
        bail!("No names found in {}", args.input.display());
    }
    ctx.note(&format!("Looking up {} name(s)...", names.len()));

    let directory = ctx.directory()?;
    let results = lookup_names(directory.as_ref(), &names, &ctx.kill_switch).await;
    let summary = summarize(&results);

    let output_dir = ctx.output_dir(args.output_dir.as_deref());
    let path = ctx.report_path(&output_dir, "upn_lookup", "csv");
    let rows = write_lookup_csv(&path, &results)?;
    ctx.audit_export(&path, rows).await;

    match ctx.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "summary": summary,
            "results": results,
            "report": path,
        }))?,
        OutputFormat::Text => {
            println!();
            for r in &results {
                let status = match r.status {
                    LookupStatus::Found => r.status.label().green(),
                    LookupStatus::Multiple => r.status.label().yellow(),
                    LookupStatus::NotFound => r.status.label().red(),
                    LookupStatus::Error => r.status.label().red().bold(),
                };
                let upns: Vec<&str> = r
                    .users
                    .iter()
                    .map(|u| u.user_principal_name.as_str())
                    .collect();
                println!("  {:<30} {:<10} {}", r.entry.to_string(), status, upns.join(", "));
            }
            println!();
            println!(
                "{} processed: {} found, {} multiple, {} not found, {} errors",
                summary.total,
                summary.found.to_string().green(),
                summary.multiple.to_string().yellow(),
                summary.not_found.to_string().red(),
                summary.errors
            );
            println!("Report: {}", path.display());
        }
    }

    Ok(RunOutcome::from_failures(summary.errors > 0))
}
