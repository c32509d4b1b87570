//! Subcommand implementations.

mod group;
mod health;
mod lookup;
mod offboard;
mod scan;
mod sites;

pub use group::{run_group, GroupArgs};
pub use health::run_health;
pub use lookup::{run_lookup, LookupArgs};
pub use offboard::{run_offboard, OffboardArgs};
pub use scan::{run_scan, ScanArgs};
pub use sites::run_sites;

use crate::config::AppConfig;
use crate::prompt::InteractiveConfirmer;
use crate::OutputFormat;
use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use ts_connectors::{GraphDirectoryConnector, SharePointConnector};
use ts_core::timestamped_path;
use ts_observability::{AuditEventType, AuditLog, AuditResult, SweepMetrics};
use ts_policy::{ConfirmationPolicy, Confirmer, KillSwitch, RunMode, SelectionConfirmer};

const AUDIT_CAPACITY: usize = 10_000;

/// How a command finished, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit 0.
    Clean,
    /// Exit 2: the run completed but some items failed.
    ItemFailures,
}

impl RunOutcome {
    pub fn from_failures(failed: bool) -> Self {
        if failed {
            RunOutcome::ItemFailures
        } else {
            RunOutcome::Clean
        }
    }
}

/// State shared by every command of one invocation.
pub struct RunContext {
    pub config: AppConfig,
    pub format: OutputFormat,
    pub kill_switch: Arc<KillSwitch>,
    pub metrics: Arc<SweepMetrics>,
    pub audit: AuditLog,
    /// Operator name recorded in the audit trail.
    pub actor: String,
}

impl RunContext {
    pub fn new(config: AppConfig, format: OutputFormat, kill_switch: Arc<KillSwitch>) -> Self {
        let actor = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "tenant-sweep".to_string());
        Self {
            config,
            format,
            kill_switch,
            metrics: Arc::new(SweepMetrics::new()),
            audit: AuditLog::new(AUDIT_CAPACITY),
            actor,
        }
    }

    pub fn directory(&self) -> Result<Arc<GraphDirectoryConnector>> {
        let connector = GraphDirectoryConnector::new(self.config.graph_config())
            .context("Failed to create Graph connector")?;
        Ok(Arc::new(connector))
    }

    pub fn sites(&self) -> Result<Arc<SharePointConnector>> {
        let connector = SharePointConnector::new(self.config.sharepoint_config())
            .context("Failed to create SharePoint connector")?;
        Ok(Arc::new(connector))
    }

    pub fn output_dir(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.output.directory.clone())
    }

    /// `<output dir>/<stem>_<timestamp>.<ext>`
    pub fn report_path(&self, dir: &Path, stem: &str, ext: &str) -> PathBuf {
        timestamped_path(dir, stem, ext, Local::now())
    }

    pub async fn audit_export(&self, path: &Path, rows: usize) {
        self.audit
            .record(
                AuditEventType::DataExport,
                &self.actor,
                Some(&path.display().to_string()),
                &format!("Exported {} rows", rows),
                serde_json::Value::Null,
                AuditResult::Success,
            )
            .await;
    }

    /// Writes the audit trail next to the reports, if enabled.
    pub async fn write_audit_log(&self, dir: &Path) -> Result<()> {
        if !self.config.output.audit_log || self.audit.is_empty().await {
            return Ok(());
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = self.report_path(dir, "audit", "jsonl");
        let written = self
            .audit
            .write_jsonl(&path)
            .await
            .with_context(|| format!("Failed to write audit log: {}", path.display()))?;
        info!(path = %path.display(), entries = written, "Audit log written");
        self.note(&format!("Audit log: {}", path.display()));
        Ok(())
    }

    /// Prints a line meant for the operator; suppressed in JSON mode.
    pub fn note(&self, message: &str) {
        if self.format == OutputFormat::Text {
            eprintln!("{}", message.dimmed());
        }
    }
}

/// Picks how destructive steps are confirmed.
///
/// An explicit `--select` list always wins; otherwise interactive runs ask
/// the operator, unattended runs apply everything and dry runs decline.
pub fn confirmer_for(mode: RunMode, select: Option<&str>) -> Result<Box<dyn Confirmer>> {
    if let Some(list) = select {
        let confirmer =
            SelectionConfirmer::new(list).with_context(|| format!("Invalid --select '{}'", list))?;
        return Ok(Box::new(confirmer));
    }
    Ok(match mode {
        RunMode::Interactive => Box::new(InteractiveConfirmer),
        RunMode::Unattended => Box::new(ConfirmationPolicy::ConfirmAll),
        RunMode::DryRun => Box::new(ConfirmationPolicy::ConfirmNone),
    })
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Reads non-empty, non-comment lines from a file.
pub fn read_list_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
