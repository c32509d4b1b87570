//! `tenant-sweep offboard`: disable a leaver and strip their access.

use super::{confirmer_for, print_json, RunContext, RunOutcome};
use crate::OutputFormat;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use ts_core::{write_json, LifecycleRunner, StepStatus};
use ts_policy::RunMode;

#[derive(Args, Debug)]
pub struct OffboardArgs {
    /// User principal name of the leaver
    pub user: String,

    /// Run mode (interactive, unattended, dry-run)
    #[arg(long, default_value = "interactive")]
    pub mode: RunMode,

    /// Steps to apply without prompting, e.g. "1,2"
    #[arg(long, value_name = "LIST")]
    pub select: Option<String>,

    /// Directory for the report (default: output.directory from config)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

pub async fn run_offboard(ctx: &RunContext, args: OffboardArgs) -> Result<RunOutcome> {
    let runner = LifecycleRunner::new(
        ctx.directory()?,
        ctx.kill_switch.clone(),
        ctx.metrics.clone(),
        ctx.audit.clone(),
        &ctx.actor,
    );
    let confirmer = confirmer_for(args.mode, args.select.as_deref())?;

    let report = runner
        .offboard(&args.user, args.mode, confirmer.as_ref())
        .await
        .with_context(|| format!("Offboarding {} failed", args.user))?;

    let output_dir = ctx.output_dir(args.output_dir.as_deref());
    let path = ctx.report_path(&output_dir, "offboard", "json");
    write_json(&path, &report)?;
    ctx.audit_export(&path, report.steps.len()).await;

    match ctx.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!();
            println!(
                "{} {}",
                "Offboarding".bold(),
                report.user.user_principal_name.cyan()
            );
            println!("─────────────────────");
            for step in &report.steps {
                let status = match step.status {
                    StepStatus::Done => "done".green(),
                    StepStatus::Failed => "failed".red(),
                    StepStatus::Skipped => "skipped".yellow(),
                };
                let detail = step.message.as_deref().unwrap_or("");
                println!("  [{}] {} {}", status, step.description, detail.dimmed());
            }
            println!("Report: {}", path.display());
        }
    }
    ctx.write_audit_log(&output_dir).await?;

    Ok(RunOutcome::from_failures(report.has_failures()))
}
