//! `tenant-sweep scan`: find a user's permissions across sites and remove them.

use super::{confirmer_for, print_json, read_list_file, RunContext, RunOutcome};
use crate::OutputFormat;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use ts_connectors::{DirectoryConnector, PermissionSurface};
use ts_core::{
    write_json, write_matches_csv, write_removals_csv, FailurePolicy, PermissionScanner,
    RemovalExecutor, RemovalReport, ScanOptions, ScanReport,
};
use ts_observability::{AuditEventType, AuditResult};
use ts_policy::RunMode;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// User to look for (UPN or email)
    pub user: String,

    /// File with one site URL per line (default: enumerate the tenant)
    #[arg(long, value_name = "FILE")]
    pub sites_file: Option<PathBuf>,

    /// Include OneDrive personal sites when enumerating the tenant
    #[arg(long)]
    pub include_onedrive: bool,

    /// Maximum site checks in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Sites per batch; a checkpoint is written after each batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Stop dispatching new sites after this many matches
    #[arg(long, value_name = "N")]
    pub stop_after: Option<usize>,

    /// Treat per-site failures as a failed run (exit code 2)
    #[arg(long)]
    pub fail_loud: bool,

    /// Checkpoint file used to resume an interrupted scan
    #[arg(long, value_name = "FILE")]
    pub checkpoint: Option<PathBuf>,

    /// Permission surfaces to check (comma separated, default: all)
    #[arg(long, value_delimiter = ',')]
    pub surfaces: Vec<PermissionSurface>,

    /// Run mode (interactive, unattended, dry-run)
    #[arg(long, default_value = "interactive")]
    pub mode: RunMode,

    /// Matches to remove without prompting, e.g. "1,3,5-7"
    #[arg(long, value_name = "LIST")]
    pub select: Option<String>,

    /// Directory for reports (default: output.directory from config)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    scan: &'a ScanReport,
    removal: Option<&'a RemovalReport>,
}

impl ScanArgs {
    fn options(&self, ctx: &RunContext) -> Result<ScanOptions> {
        let defaults = &ctx.config.scan;

        let surfaces: BTreeSet<PermissionSurface> = if !self.surfaces.is_empty() {
            self.surfaces.iter().copied().collect()
        } else if !defaults.surfaces.is_empty() {
            defaults
                .surfaces
                .iter()
                .map(|s| s.parse::<PermissionSurface>())
                .collect::<Result<_, _>>()
                .map_err(anyhow::Error::msg)
                .context("Invalid scan.surfaces in config")?
        } else {
            PermissionSurface::ALL.into_iter().collect()
        };

        let failure_policy = if self.fail_loud || defaults.fail_loud {
            FailurePolicy::FailLoud
        } else {
            FailurePolicy::FailOpen
        };

        Ok(ScanOptions {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            match_threshold: self.stop_after.or(defaults.stop_after),
            failure_policy,
            surfaces,
            checkpoint: self.checkpoint.clone(),
        })
    }
}

pub async fn run_scan(ctx: &RunContext, args: ScanArgs) -> Result<RunOutcome> {
    let options = args.options(ctx)?;
    let fail_loud = options.failure_policy == FailurePolicy::FailLoud;
    let output_dir = ctx.output_dir(args.output_dir.as_deref());

    let site_urls = match &args.sites_file {
        Some(path) => read_list_file(path)?,
        None => {
            let include_personal = args.include_onedrive || ctx.config.scan.include_onedrive;
            ctx.note("Enumerating tenant sites...");
            ctx.directory()?
                .list_sites(include_personal)
                .await
                .context("Failed to enumerate tenant sites")?
                .into_iter()
                .map(|s| s.url)
                .collect()
        }
    };
    ctx.note(&format!(
        "Scanning {} site(s) for {} ({} in flight)",
        site_urls.len(),
        args.user,
        options.concurrency
    ));

    ctx.audit
        .record(
            AuditEventType::ScanStarted,
            &ctx.actor,
            Some(&args.user),
            &format!("Permission scan of {} sites", site_urls.len()),
            serde_json::json!({ "mode": args.mode, "threshold": options.match_threshold }),
            AuditResult::Success,
        )
        .await;

    let sites = ctx.sites()?;
    let scanner = PermissionScanner::new(
        sites.clone(),
        ctx.kill_switch.clone(),
        ctx.metrics.clone(),
        options,
    );
    let report = scanner
        .scan(&site_urls, &args.user)
        .await
        .context("Permission scan failed")?;

    ctx.audit
        .record(
            AuditEventType::ScanCompleted,
            &ctx.actor,
            Some(&args.user),
            &format!(
                "{} match(es) on {} site(s), {} failure(s)",
                report.matches.len(),
                report.sites_with_matches(),
                report.failures.len()
            ),
            serde_json::json!({
                "scanned": report.sites_scanned,
                "skipped": report.sites_skipped,
                "short_circuited": report.short_circuited,
                "cancelled": report.cancelled,
            }),
            if report.has_failures() {
                AuditResult::Failure(format!("{} site(s) failed", report.failures.len()))
            } else {
                AuditResult::Success
            },
        )
        .await;

    if ctx.format == OutputFormat::Text {
        print_scan(&report);
    }

    if !report.matches.is_empty() {
        let path = ctx.report_path(&output_dir, "permission_matches", "csv");
        let rows = write_matches_csv(&path, &report.matches)?;
        ctx.audit_export(&path, rows).await;
        ctx.note(&format!("Matches: {}", path.display()));
    }

    let removal = if report.matches.is_empty() || ctx.kill_switch.is_active() {
        None
    } else {
        let confirmer = confirmer_for(args.mode, args.select.as_deref())?;
        let executor = RemovalExecutor::new(
            sites,
            ctx.kill_switch.clone(),
            ctx.metrics.clone(),
            ctx.audit.clone(),
            &ctx.actor,
        );
        let removal = executor
            .execute(&report.matches, args.mode, confirmer.as_ref())
            .await;

        if removal.attempted() > 0 {
            let path = ctx.report_path(&output_dir, "permission_removals", "csv");
            let rows = write_removals_csv(&path, &removal.records)?;
            ctx.audit_export(&path, rows).await;
            ctx.note(&format!("Removals: {}", path.display()));
        }
        if ctx.format == OutputFormat::Text {
            print_removal(&removal);
        }
        Some(removal)
    };

    let output = ScanOutput {
        scan: &report,
        removal: removal.as_ref(),
    };
    let json_path = ctx.report_path(&output_dir, "scan_report", "json");
    write_json(&json_path, &output)?;
    if ctx.format == OutputFormat::Json {
        print_json(&output)?;
    }
    ctx.write_audit_log(&output_dir).await?;

    let removal_failed = removal.as_ref().is_some_and(|r| r.failed > 0);
    Ok(RunOutcome::from_failures(
        removal_failed || (fail_loud && report.has_failures()),
    ))
}

fn print_scan(report: &ScanReport) {
    println!();
    println!("{}", "Scan Summary".bold());
    println!("────────────");
    println!("  Principal: {}", report.principal.cyan());
    println!(
        "  Sites: {} scanned, {} skipped of {}",
        report.sites_scanned, report.sites_skipped, report.sites_total
    );
    println!(
        "  Matches: {} on {} site(s)",
        report.matches.len().to_string().yellow(),
        report.sites_with_matches()
    );
    if report.short_circuited {
        println!("  {}", "Stopped early: match threshold reached".cyan());
    }
    if report.cancelled {
        println!("  {}", "Cancelled by operator".yellow());
    }
    println!("  Duration: {:.1}s", report.duration_secs());

    if !report.matches.is_empty() {
        println!();
        println!("{}", "Matches".bold());
        for (i, m) in report.matches.iter().enumerate() {
            println!(
                "  {:>4}  {}  {}",
                (i + 1).to_string().cyan(),
                m.site_url,
                m.grant.describe().yellow()
            );
        }
    }

    if report.has_failures() {
        println!();
        println!("{} ({})", "Failures".red().bold(), report.failures.len());
        for f in &report.failures {
            println!("  {} [{}] {}", f.site_url, f.kind.to_string().red(), f.message);
        }
    }
}

fn print_removal(removal: &RemovalReport) {
    println!();
    println!("{}", "Removal Summary".bold());
    println!("───────────────");
    println!("  Mode: {}", removal.mode);
    println!("  Removed: {}", removal.succeeded.to_string().green());
    if removal.failed > 0 {
        println!("  Failed: {}", removal.failed.to_string().red());
    }
    println!("  Skipped: {}", removal.skipped);
    if removal.cancelled {
        println!("  {}", "Cancelled by operator".yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use clap::Parser;
    use std::sync::Arc;
    use ts_policy::KillSwitch;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ScanArgs,
    }

    fn ctx(config: AppConfig) -> RunContext {
        RunContext::new(config, OutputFormat::Text, Arc::new(KillSwitch::new()))
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = AppConfig::default();
        config.scan.concurrency = 4;
        config.scan.stop_after = Some(9);
        config.scan.surfaces = vec!["groups".to_string()];

        let harness = Harness::parse_from([
            "scan",
            "jdoe@contoso.com",
            "--concurrency",
            "12",
            "--surfaces",
            "admins,library-roles",
            "--mode",
            "dry-run",
        ]);
        let options = harness.args.options(&ctx(config)).unwrap();

        assert_eq!(options.concurrency, 12);
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.match_threshold, Some(9));
        assert_eq!(options.surfaces.len(), 2);
        assert_eq!(harness.args.mode, RunMode::DryRun);
    }

    #[test]
    fn test_config_surfaces_and_fail_loud() {
        let mut config = AppConfig::default();
        config.scan.surfaces = vec!["groups".to_string(), "admins".to_string()];
        config.scan.fail_loud = true;

        let harness = Harness::parse_from(["scan", "jdoe@contoso.com"]);
        let options = harness.args.options(&ctx(config)).unwrap();

        assert_eq!(options.failure_policy, FailurePolicy::FailLoud);
        assert!(options.surfaces.contains(&PermissionSurface::GroupMembership));
        assert!(!options
            .surfaces
            .contains(&PermissionSurface::LibraryRoleAssignment));
        assert_eq!(harness.args.mode, RunMode::Interactive);
    }
}
