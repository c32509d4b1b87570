//! `tenant-sweep group add|remove`: bulk group membership changes.

use super::{confirmer_for, print_json, read_list_file, RunContext, RunOutcome};
use crate::OutputFormat;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use ts_core::{MembershipAction, MembershipStatus};
use ts_policy::RunMode;

#[derive(Args, Debug)]
pub struct GroupArgs {
    /// Group object id
    pub group_id: String,

    /// User principal names (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub users: Vec<String>,

    /// File with one UPN per line
    #[arg(long, value_name = "FILE")]
    pub users_file: Option<PathBuf>,

    /// Run mode (interactive, unattended, dry-run)
    #[arg(long, default_value = "unattended")]
    pub mode: RunMode,
}

impl GroupArgs {
    fn upns(&self) -> Result<Vec<String>> {
        let mut upns: Vec<String> = self
            .users
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if let Some(path) = &self.users_file {
            upns.extend(read_list_file(path)?);
        }
        if upns.is_empty() {
            bail!("No users given; use --users or --users-file");
        }
        Ok(upns)
    }
}

pub async fn run_group(
    ctx: &RunContext,
    args: GroupArgs,
    action: MembershipAction,
) -> Result<RunOutcome> {
    let upns = args.upns()?;
    let confirmer = confirmer_for(args.mode, None)?;
    let runner = ts_core::LifecycleRunner::new(
        ctx.directory()?,
        ctx.kill_switch.clone(),
        ctx.metrics.clone(),
        ctx.audit.clone(),
        &ctx.actor,
    );
    let results = runner
        .apply_group_membership(&args.group_id, &upns, action, args.mode, confirmer.as_ref())
        .await;

    match ctx.format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => {
            for r in &results {
                let status = match r.status {
                    MembershipStatus::Added | MembershipStatus::Removed => {
                        format!("{:?}", r.status).green()
                    }
                    MembershipStatus::AlreadyMember | MembershipStatus::NotMember => {
                        format!("{:?}", r.status).cyan()
                    }
                    MembershipStatus::Skipped => format!("{:?}", r.status).yellow(),
                    MembershipStatus::NotFound | MembershipStatus::Failed => {
                        format!("{:?}", r.status).red()
                    }
                };
                println!(
                    "  {:<40} {} {}",
                    r.upn,
                    status,
                    r.message.as_deref().unwrap_or("").dimmed()
                );
            }
        }
    }

    let failed = results.iter().any(|r| {
        matches!(
            r.status,
            MembershipStatus::Failed | MembershipStatus::NotFound
        )
    });
    Ok(RunOutcome::from_failures(failed))
}
