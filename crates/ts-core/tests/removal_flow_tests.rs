//! Scan-then-remove integration tests.
//!
//! These tests verify the confirmed removal flow end to end:
//! - Every confirmed match is revoked exactly once
//! - A rejected removal does not stop later removals
//! - Failed removals are counted and audited

use std::sync::Arc;

use ts_connectors::{ConnectorError, MockSiteConnector, PermissionSurface};
use ts_core::{
    OutcomeKind, PermissionScanner, RemovalExecutor, RemovalStatus, ScanOptions,
};
use ts_observability::{AuditEventType, AuditLog, SweepMetrics};
use ts_policy::{ConfirmationPolicy, KillSwitch, RunMode};

const USER: &str = "jdoe@contoso.com";

fn site(i: usize) -> String {
    format!("https://contoso.sharepoint.com/sites/team{:02}", i)
}

async fn tenant_with_admin_grants(n: usize) -> Arc<MockSiteConnector> {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    for i in 0..n {
        mock.add_grant(&site(i), USER, PermissionSurface::SiteCollectionAdmin, &site(i))
            .await;
    }
    mock
}

async fn scan(mock: &Arc<MockSiteConnector>, n: usize) -> ts_core::ScanReport {
    let sites: Vec<String> = (0..n).map(site).collect();
    PermissionScanner::new(
        mock.clone(),
        Arc::new(KillSwitch::new()),
        Arc::new(SweepMetrics::new()),
        ScanOptions::default(),
    )
    .scan(&sites, USER)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_confirmed_removal_processes_each_item_once() {
    let mock = tenant_with_admin_grants(10).await;
    let report = scan(&mock, 10).await;
    assert_eq!(report.matches.len(), 10);

    let metrics = Arc::new(SweepMetrics::new());
    let executor = RemovalExecutor::new(
        mock.clone(),
        Arc::new(KillSwitch::new()),
        metrics.clone(),
        AuditLog::without_tracing(1000),
        "operator",
    );
    let removal = executor
        .execute(&report.matches, RunMode::Interactive, &ConfirmationPolicy::ConfirmAll)
        .await;

    assert_eq!(removal.succeeded, 10);
    assert_eq!(removal.failed, 0);
    let revoked = mock.revoked().await;
    assert_eq!(revoked.len(), 10);
    for i in 0..10 {
        assert!(mock.remaining_grants(&site(i)).await.is_empty());
    }
    assert_eq!(metrics.summary().removals_succeeded, 10);

    // A rescan finds nothing left.
    assert!(scan(&mock, 10).await.matches.is_empty());
}

#[tokio::test]
async fn test_rejected_removal_does_not_stop_the_rest() {
    let mock = tenant_with_admin_grants(10).await;
    let report = scan(&mock, 10).await;
    mock.reject_revoke(&site(4), ConnectorError::AuthorizationDenied("denied".into()))
        .await;

    let audit = AuditLog::without_tracing(1000);
    let executor = RemovalExecutor::new(
        mock.clone(),
        Arc::new(KillSwitch::new()),
        Arc::new(SweepMetrics::new()),
        audit.clone(),
        "operator",
    );
    let removal = executor
        .execute(&report.matches, RunMode::Unattended, &ConfirmationPolicy::ConfirmAll)
        .await;

    assert_eq!(removal.attempted(), 10);
    assert_eq!(removal.failed, 1);
    assert_eq!(removal.succeeded, 9);

    let fifth = &removal.records[4];
    assert_eq!(fifth.status, RemovalStatus::Failed);
    assert_eq!(fifth.kind, Some(OutcomeKind::PermissionDenied));
    for record in &removal.records[5..] {
        assert_eq!(record.status, RemovalStatus::Removed);
    }

    assert_eq!(mock.remaining_grants(&site(4)).await.len(), 1);
    assert_eq!(audit.entries_by_type(AuditEventType::RemovalFailed).await.len(), 1);
    assert_eq!(
        audit.entries_by_type(AuditEventType::RemovalExecuted).await.len(),
        9
    );
}

#[tokio::test]
async fn test_selected_items_only() {
    let mock = tenant_with_admin_grants(5).await;
    let report = scan(&mock, 5).await;

    let selection = ts_policy::parse_selection("1, 3-4", 10).unwrap();
    let executor = RemovalExecutor::new(
        mock.clone(),
        Arc::new(KillSwitch::new()),
        Arc::new(SweepMetrics::new()),
        AuditLog::without_tracing(100),
        "operator",
    );
    let removal = executor
        .execute(
            &report.matches,
            RunMode::Interactive,
            &ConfirmationPolicy::ConfirmList(selection),
        )
        .await;

    assert_eq!(removal.succeeded, 3);
    assert_eq!(removal.skipped, 2);
    assert_eq!(mock.remaining_grants(&site(1)).await.len(), 1);
    assert!(mock.remaining_grants(&site(0)).await.is_empty());
}
