//! Audit trail of operator decisions and tenant mutations.
//!
//! Entries are kept in a bounded in-memory ring, mirrored to tracing, and
//! can be written out as JSON lines at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Operator or component that caused the event.
    pub actor: String,
    /// Site URL, user or group the event applies to.
    pub target: Option<String>,
    pub description: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub result: AuditResult,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ScanStarted,
    ScanCompleted,
    /// Operator or policy approved some removals.
    RemovalConfirmed,
    /// Operator or policy declined all removals.
    RemovalDeclined,
    RemovalExecuted,
    RemovalFailed,
    LifecycleStep,
    CancellationRequested,
    DataExport,
}

/// Result of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure(String),
    Skipped(String),
}

/// Bounded audit log.
#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditLogEntry>>>,
    max_entries: usize,
    log_to_tracing: bool,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries.min(1024)))),
            max_entries: max_entries.max(1),
            log_to_tracing: true,
        }
    }

    /// Creates an audit log without tracing output.
    pub fn without_tracing(max_entries: usize) -> Self {
        Self {
            log_to_tracing: false,
            ..Self::new(max_entries)
        }
    }

    pub async fn log(&self, entry: AuditLogEntry) {
        if self.log_to_tracing {
            info!(
                event_type = ?entry.event_type,
                actor = %entry.actor,
                target = ?entry.target,
                result = ?entry.result,
                "Audit: {}",
                entry.description
            );
        }

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Logs an event that has no specific target.
    pub async fn log_event(
        &self,
        event_type: AuditEventType,
        actor: &str,
        description: &str,
        result: AuditResult,
    ) {
        self.record(
            event_type,
            actor,
            None,
            description,
            serde_json::Value::Null,
            result,
        )
        .await;
    }

    /// Logs an event against a target with structured details.
    pub async fn record(
        &self,
        event_type: AuditEventType,
        actor: &str,
        target: Option<&str>,
        description: &str,
        details: serde_json::Value,
        result: AuditResult,
    ) {
        self.log(AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            actor: actor.to_string(),
            target: target.map(str::to_string),
            description: description.to_string(),
            details,
            result,
        })
        .await;
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn entries_by_type(&self, event_type: AuditEventType) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub async fn entries_for_target(&self, target: &str) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.target.as_deref() == Some(target))
            .cloned()
            .collect()
    }

    /// All entries as JSON lines, oldest first.
    pub async fn export_jsonl(&self) -> String {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .map(|line| line + "\n")
            .collect()
    }

    /// Appends all entries to `path` as JSON lines. Returns the number written.
    pub async fn write_jsonl(&self, path: &Path) -> std::io::Result<usize> {
        let entries = self.entries().await;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        for entry in &entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(entries.len())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_event() {
        let audit = AuditLog::without_tracing(100);
        audit
            .log_event(
                AuditEventType::ScanStarted,
                "operator",
                "Scan of 12 sites",
                AuditResult::Success,
            )
            .await;

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, AuditEventType::ScanStarted);
        assert!(entries[0].target.is_none());
    }

    #[tokio::test]
    async fn test_max_entries_evicts_oldest() {
        let audit = AuditLog::without_tracing(3);
        for i in 0..5 {
            audit
                .record(
                    AuditEventType::RemovalExecuted,
                    "operator",
                    Some(&format!("site-{}", i)),
                    "removed",
                    serde_json::Value::Null,
                    AuditResult::Success,
                )
                .await;
        }
        assert_eq!(audit.len().await, 3);
        assert_eq!(audit.entries().await[0].target.as_deref(), Some("site-2"));
    }

    #[tokio::test]
    async fn test_filter_by_type_and_target() {
        let audit = AuditLog::without_tracing(100);
        audit
            .record(
                AuditEventType::RemovalFailed,
                "operator",
                Some("https://contoso.sharepoint.com/sites/hr"),
                "site collection administrator",
                serde_json::json!({ "kind": "permission_denied" }),
                AuditResult::Failure("Authorization denied".into()),
            )
            .await;
        audit
            .log_event(
                AuditEventType::ScanCompleted,
                "system",
                "done",
                AuditResult::Success,
            )
            .await;

        assert_eq!(
            audit
                .entries_by_type(AuditEventType::RemovalFailed)
                .await
                .len(),
            1
        );
        assert_eq!(
            audit
                .entries_for_target("https://contoso.sharepoint.com/sites/hr")
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_write_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let audit = AuditLog::without_tracing(100);
        audit
            .log_event(
                AuditEventType::DataExport,
                "system",
                "report written",
                AuditResult::Success,
            )
            .await;
        audit
            .log_event(
                AuditEventType::CancellationRequested,
                "operator",
                "ctrl-c",
                AuditResult::Skipped("remaining sites".into()),
            )
            .await;

        let written = audit.write_jsonl(&path).await.unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, AuditEventType::DataExport);
        assert!(lines[1].contains("cancellation_requested"));
        assert_eq!(audit.export_jsonl().await.lines().count(), 2);
    }
}
