//! Confirmation-gated removal of scan matches.
//!
//! Proposals are built from the matches, a decision is obtained from the
//! confirmer, and one revoke call per selected match is replayed in match
//! order. A failed removal is recorded and the run moves on; nothing is
//! rolled back.

use crate::matches::PermissionMatch;
use crate::outcome::OutcomeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use ts_connectors::{PermissionSurface, SiteConnector};
use ts_observability::{AuditEventType, AuditLog, AuditResult, SweepMetrics};
use ts_policy::{ConfirmationDecision, Confirmer, KillSwitch, ProposedRemoval, RunMode};

/// Final state of one proposed removal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStatus {
    Removed,
    Failed,
    Skipped,
}

/// What happened to one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalRecord {
    pub index: usize,
    pub site_url: String,
    pub surface: PermissionSurface,
    pub description: String,
    pub status: RemovalStatus,
    /// Set for attempted removals.
    pub kind: Option<OutcomeKind>,
    /// Error text, or why the item was skipped.
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of a removal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalReport {
    pub mode: RunMode,
    /// `None` when nothing was asked (dry run or no matches).
    pub decision: Option<ConfirmationDecision>,
    pub succeeded: usize,
    /// Number of revoke calls that returned an error.
    pub failed: usize,
    pub skipped: usize,
    /// The kill switch stopped the run early.
    pub cancelled: bool,
    pub records: Vec<RemovalRecord>,
}

impl RemovalReport {
    fn new(mode: RunMode, decision: Option<ConfirmationDecision>) -> Self {
        Self {
            mode,
            decision,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            records: Vec::new(),
        }
    }

    fn push(&mut self, record: RemovalRecord) {
        match record.status {
            RemovalStatus::Removed => self.succeeded += 1,
            RemovalStatus::Failed => self.failed += 1,
            RemovalStatus::Skipped => self.skipped += 1,
        }
        self.records.push(record);
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Builds the operator-facing list for a set of matches.
pub fn proposals_for(matches: &[PermissionMatch]) -> Vec<ProposedRemoval> {
    matches
        .iter()
        .enumerate()
        .map(|(index, m)| ProposedRemoval {
            index,
            target: m.site_url.clone(),
            description: m.grant.describe(),
        })
        .collect()
}

/// Replays revoke calls for confirmed matches.
pub struct RemovalExecutor {
    sites: Arc<dyn SiteConnector>,
    kill_switch: Arc<KillSwitch>,
    metrics: Arc<SweepMetrics>,
    audit: AuditLog,
    actor: String,
}

impl RemovalExecutor {
    pub fn new(
        sites: Arc<dyn SiteConnector>,
        kill_switch: Arc<KillSwitch>,
        metrics: Arc<SweepMetrics>,
        audit: AuditLog,
        actor: &str,
    ) -> Self {
        Self {
            sites,
            kill_switch,
            metrics,
            audit,
            actor: actor.to_string(),
        }
    }

    #[instrument(skip_all, fields(matches = matches.len(), mode = %mode))]
    pub async fn execute(
        &self,
        matches: &[PermissionMatch],
        mode: RunMode,
        confirmer: &dyn Confirmer,
    ) -> RemovalReport {
        if matches.is_empty() {
            return RemovalReport::new(mode, None);
        }

        if !mode.allows_mutation() {
            let mut report = RemovalReport::new(mode, None);
            for (index, m) in matches.iter().enumerate() {
                report.push(skipped(index, m, "dry run"));
            }
            info!(skipped = report.skipped, "Dry run, no removals performed");
            return report;
        }

        let proposals = proposals_for(matches);
        let decision = confirmer.decide(&proposals).await.normalize(proposals.len());
        self.audit_decision(&decision, proposals.len()).await;

        let mut report = RemovalReport::new(mode, Some(decision.clone()));

        for (index, m) in matches.iter().enumerate() {
            if !decision.selects(index) {
                let reason = if decision.is_abort() {
                    "aborted"
                } else {
                    "not selected"
                };
                report.push(skipped(index, m, reason));
                continue;
            }

            if self.kill_switch.is_active() {
                report.cancelled = true;
                report.push(skipped(index, m, "cancelled"));
                continue;
            }

            let result = self.sites.revoke(&m.grant).await;
            let kind = OutcomeKind::of(&result);
            self.metrics.record_removal(kind.as_str(), kind.is_success());

            let record = match result {
                Ok(()) => {
                    info!(site = %m.site_url, what = %m.grant.describe(), "Removed");
                    RemovalRecord {
                        index,
                        site_url: m.site_url.clone(),
                        surface: m.grant.surface,
                        description: m.grant.describe(),
                        status: RemovalStatus::Removed,
                        kind: Some(kind),
                        message: None,
                        at: Utc::now(),
                    }
                }
                Err(e) => {
                    warn!(site = %m.site_url, kind = %kind, error = %e, "Removal failed");
                    RemovalRecord {
                        index,
                        site_url: m.site_url.clone(),
                        surface: m.grant.surface,
                        description: m.grant.describe(),
                        status: RemovalStatus::Failed,
                        kind: Some(kind),
                        message: Some(e.to_string()),
                        at: Utc::now(),
                    }
                }
            };
            self.audit_record(&record).await;
            report.push(record);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Removal run finished"
        );
        report
    }

    async fn audit_decision(&self, decision: &ConfirmationDecision, proposals: usize) {
        let (event, description) = if decision.is_abort() {
            (
                AuditEventType::RemovalDeclined,
                format!("Declined all {} proposed removals", proposals),
            )
        } else {
            (
                AuditEventType::RemovalConfirmed,
                format!("Confirmed {} of {} proposed removals", count_selected(decision, proposals), proposals),
            )
        };
        self.audit
            .record(
                event,
                &self.actor,
                None,
                &description,
                serde_json::to_value(decision).unwrap_or_default(),
                AuditResult::Success,
            )
            .await;
    }

    async fn audit_record(&self, record: &RemovalRecord) {
        let (event, result) = match record.status {
            RemovalStatus::Removed => (AuditEventType::RemovalExecuted, AuditResult::Success),
            _ => (
                AuditEventType::RemovalFailed,
                AuditResult::Failure(record.message.clone().unwrap_or_default()),
            ),
        };
        self.audit
            .record(
                event,
                &self.actor,
                Some(&record.site_url),
                &record.description,
                serde_json::json!({ "surface": record.surface, "kind": record.kind }),
                result,
            )
            .await;
    }
}

fn count_selected(decision: &ConfirmationDecision, proposals: usize) -> usize {
    (0..proposals).filter(|i| decision.selects(*i)).count()
}

fn skipped(index: usize, m: &PermissionMatch, reason: &str) -> RemovalRecord {
    RemovalRecord {
        index,
        site_url: m.site_url.clone(),
        surface: m.grant.surface,
        description: m.grant.describe(),
        status: RemovalStatus::Skipped,
        kind: None,
        message: Some(reason.to_string()),
        at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ts_connectors::MockSiteConnector;
    use ts_policy::ConfirmationPolicy;

    const USER: &str = "jdoe@contoso.com";

    async fn setup(n: usize) -> (Arc<MockSiteConnector>, Vec<PermissionMatch>) {
        let mock = Arc::new(MockSiteConnector::new("mock"));
        let mut matches = Vec::new();
        for i in 0..n {
            let url = format!("https://contoso.sharepoint.com/sites/s{}", i);
            let grant = mock
                .add_grant(&url, USER, PermissionSurface::SiteCollectionAdmin, &url)
                .await;
            matches.push(PermissionMatch::new(i, grant));
        }
        (mock, matches)
    }

    fn executor(mock: Arc<MockSiteConnector>, kill_switch: Arc<KillSwitch>) -> RemovalExecutor {
        RemovalExecutor::new(
            mock,
            kill_switch,
            Arc::new(SweepMetrics::new()),
            AuditLog::without_tracing(100),
            "tester",
        )
    }

    /// Counts how often it is asked.
    struct CountingConfirmer {
        calls: AtomicUsize,
        decision: ConfirmationDecision,
    }

    #[async_trait]
    impl Confirmer for CountingConfirmer {
        async fn decide(&self, _proposals: &[ProposedRemoval]) -> ConfirmationDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision.clone()
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_asks_or_mutates() {
        let (mock, matches) = setup(3).await;
        let confirmer = CountingConfirmer {
            calls: AtomicUsize::new(0),
            decision: ConfirmationDecision::RemoveAll,
        };
        let report = executor(mock.clone(), Arc::new(KillSwitch::new()))
            .execute(&matches, RunMode::DryRun, &confirmer)
            .await;

        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.skipped, 3);
        assert!(mock.revoked().await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_mutates_nothing() {
        let (mock, matches) = setup(2).await;
        let report = executor(mock.clone(), Arc::new(KillSwitch::new()))
            .execute(&matches, RunMode::Interactive, &ConfirmationPolicy::ConfirmNone)
            .await;

        assert_eq!(report.decision, Some(ConfirmationDecision::Abort));
        assert_eq!(report.attempted(), 0);
        assert!(mock.revoked().await.is_empty());
    }

    #[tokio::test]
    async fn test_selected_subset_only() {
        let (mock, matches) = setup(4).await;
        let policy = ConfirmationPolicy::ConfirmList([1, 3].into_iter().collect());
        let report = executor(mock.clone(), Arc::new(KillSwitch::new()))
            .execute(&matches, RunMode::Unattended, &policy)
            .await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 2);
        let revoked: Vec<String> = mock
            .revoked()
            .await
            .into_iter()
            .map(|g| g.site_url)
            .collect();
        assert_eq!(revoked, vec![matches[1].site_url.clone(), matches[3].site_url.clone()]);
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining() {
        let (mock, matches) = setup(3).await;
        let kill_switch = Arc::new(KillSwitch::new());
        kill_switch.activate("test", "stop").await.unwrap();

        let report = executor(mock.clone(), kill_switch)
            .execute(&matches, RunMode::Unattended, &ConfirmationPolicy::ConfirmAll)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.skipped, 3);
        assert!(mock.revoked().await.is_empty());
    }

    #[tokio::test]
    async fn test_audit_records_decision_and_results() {
        let (mock, matches) = setup(2).await;
        let audit = AuditLog::without_tracing(100);
        let executor = RemovalExecutor::new(
            mock,
            Arc::new(KillSwitch::new()),
            Arc::new(SweepMetrics::new()),
            audit.clone(),
            "tester",
        );
        executor
            .execute(&matches, RunMode::Unattended, &ConfirmationPolicy::ConfirmAll)
            .await;

        assert_eq!(
            audit
                .entries_by_type(AuditEventType::RemovalConfirmed)
                .await
                .len(),
            1
        );
        assert_eq!(
            audit
                .entries_by_type(AuditEventType::RemovalExecuted)
                .await
                .len(),
            2
        );
    }
}
