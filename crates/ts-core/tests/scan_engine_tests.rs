//! Permission scanner integration tests.
//!
//! These tests run the scanner against the in-memory site connector and check:
//! - Concurrency never exceeds the configured limit
//! - The match threshold stops further dispatch
//! - Every site is visited at most once, duplicates included
//! - A failing site does not affect the others
//! - Checkpoints let an interrupted scan resume

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ts_connectors::{ConnectorError, MockSiteConnector, PermissionSurface};
use ts_core::{
    FailurePolicy, OutcomeKind, PermissionScanner, ScanCheckpoint, ScanError, ScanOptions,
};
use ts_observability::SweepMetrics;
use ts_policy::KillSwitch;

const USER: &str = "jdoe@contoso.com";

fn site(i: usize) -> String {
    format!("https://contoso.sharepoint.com/sites/site{:03}", i)
}

fn site_list(n: usize) -> Vec<String> {
    (0..n).map(site).collect()
}

fn scanner(mock: Arc<MockSiteConnector>, options: ScanOptions) -> PermissionScanner {
    PermissionScanner::new(
        mock,
        Arc::new(KillSwitch::new()),
        Arc::new(SweepMetrics::new()),
        options,
    )
}

fn options(concurrency: usize, threshold: Option<usize>) -> ScanOptions {
    ScanOptions {
        concurrency,
        match_threshold: threshold,
        ..ScanOptions::default()
    }
}

// =============================================================================
// Concurrency and short-circuit
// =============================================================================

#[tokio::test]
async fn test_threshold_with_bounded_concurrency() {
    let mock = Arc::new(MockSiteConnector::new("mock").with_latency(Duration::from_millis(5)));
    for i in [12, 47, 81] {
        mock.add_grant(&site(i), USER, PermissionSurface::SiteCollectionAdmin, &site(i))
            .await;
    }

    let report = scanner(mock.clone(), options(10, Some(2)))
        .scan(&site_list(100), USER)
        .await
        .unwrap();

    assert!(report.matches.len() >= 2, "threshold must be reached");
    assert!(report.short_circuited);
    assert!(report.sites_skipped > 0);
    let visits = mock.total_visits().await;
    assert!(visits < 100, "dispatch continued after threshold: {} visits", visits);
    assert_eq!(report.sites_scanned, visits);
    assert!(
        mock.max_in_flight() <= 10,
        "max in flight was {}",
        mock.max_in_flight()
    );
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_threshold_stops_right_after_first_match_when_sequential() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    mock.add_grant(&site(12), USER, PermissionSurface::SiteCollectionAdmin, &site(12))
        .await;

    let report = scanner(mock.clone(), options(1, Some(1)))
        .scan(&site_list(30), USER)
        .await
        .unwrap();

    assert_eq!(mock.total_visits().await, 13);
    assert_eq!(mock.visits(&site(13)).await, 0);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.sites_scanned, 13);
    assert_eq!(report.sites_skipped, 17);
    assert!(report.short_circuited);
}

#[tokio::test]
async fn test_no_threshold_scans_everything() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    for i in [3, 9] {
        mock.add_grant(&site(i), USER, PermissionSurface::GroupMembership, "Members")
            .await;
    }

    let report = scanner(mock.clone(), options(4, None))
        .scan(&site_list(20), USER)
        .await
        .unwrap();

    assert_eq!(report.sites_scanned, 20);
    assert_eq!(report.sites_skipped, 0);
    assert!(!report.short_circuited);
    let indices: Vec<usize> = report.matches.iter().map(|m| m.resource_index).collect();
    assert_eq!(indices, vec![3, 9]);
}

#[tokio::test]
async fn test_each_site_visited_at_most_once() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    let mut sites = site_list(30);
    sites.push(site(5));
    sites.push(format!("{}/", site(7)));
    sites.push(site(7).to_uppercase());

    let report = scanner(mock.clone(), options(8, None))
        .scan(&sites, USER)
        .await
        .unwrap();

    assert_eq!(report.sites_total, 30);
    for i in 0..30 {
        assert_eq!(mock.visits(&site(i)).await, 1, "site {} visits", i);
    }
}

#[tokio::test]
async fn test_same_matches_across_runs() {
    let mock = Arc::new(MockSiteConnector::new("mock").with_latency(Duration::from_millis(1)));
    mock.add_grant(&site(2), USER, PermissionSurface::SiteRoleAssignment, &site(2))
        .await;
    mock.add_grant(&site(2), USER, PermissionSurface::GroupMembership, "Owners")
        .await;
    mock.add_grant(&site(11), USER, PermissionSurface::LibraryRoleAssignment, "Payroll")
        .await;

    let scanner = scanner(mock, options(6, None));
    let first = scanner.scan(&site_list(15), USER).await.unwrap();
    let second = scanner.scan(&site_list(15), USER).await.unwrap();

    let key = |r: &ts_core::ScanReport| -> Vec<(usize, PermissionSurface, String)> {
        r.matches
            .iter()
            .map(|m| (m.resource_index, m.grant.surface, m.grant.container.clone()))
            .collect()
    };
    assert_eq!(key(&first), key(&second));
    assert_eq!(first.matches.len(), 3);
    // Within a site, matches follow the fixed check order.
    assert_eq!(first.matches[0].grant.surface, PermissionSurface::GroupMembership);
    assert_eq!(first.matches[1].grant.surface, PermissionSurface::SiteRoleAssignment);
}

#[tokio::test]
async fn test_surface_filter() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    mock.add_grant(&site(0), USER, PermissionSurface::GroupMembership, "Members")
        .await;
    mock.add_grant(&site(0), USER, PermissionSurface::SiteCollectionAdmin, &site(0))
        .await;

    let opts = ScanOptions {
        surfaces: BTreeSet::from([PermissionSurface::SiteCollectionAdmin]),
        ..ScanOptions::default()
    };
    let report = scanner(mock, opts).scan(&site_list(1), USER).await.unwrap();

    assert_eq!(report.matches.len(), 1);
    assert_eq!(
        report.matches[0].grant.surface,
        PermissionSurface::SiteCollectionAdmin
    );
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_is_isolated() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    mock.add_grant(&site(1), USER, PermissionSurface::SiteCollectionAdmin, &site(1))
        .await;
    mock.add_grant(&site(3), USER, PermissionSurface::SiteCollectionAdmin, &site(3))
        .await;
    mock.fail_site(&site(3), ConnectorError::AuthorizationDenied("403".into()))
        .await;
    mock.fail_site(&site(4), ConnectorError::RateLimited(30)).await;

    for policy in [FailurePolicy::FailOpen, FailurePolicy::FailLoud] {
        let opts = ScanOptions {
            failure_policy: policy,
            ..ScanOptions::default()
        };
        let report = scanner(mock.clone(), opts)
            .scan(&site_list(6), USER)
            .await
            .unwrap();

        assert_eq!(report.matches.len(), 1, "{:?}", policy);
        assert_eq!(report.matches[0].resource_index, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report.has_failures());

        let kinds: Vec<OutcomeKind> = report.failures.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&OutcomeKind::PermissionDenied));
        assert!(kinds.contains(&OutcomeKind::Throttled));
    }
}

#[tokio::test]
async fn test_invalid_options_rejected() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    let err = scanner(mock, options(0, None))
        .scan(&site_list(1), USER)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidOptions(_)));
}

// =============================================================================
// Cancellation and resume
// =============================================================================

#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    let kill_switch = Arc::new(KillSwitch::new());
    kill_switch.activate("operator", "ctrl-c").await.unwrap();

    let scanner = PermissionScanner::new(
        mock.clone(),
        kill_switch,
        Arc::new(SweepMetrics::new()),
        ScanOptions::default(),
    );
    let report = scanner.scan(&site_list(10), USER).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(mock.total_visits().await, 0);
    assert_eq!(report.sites_skipped, 10);
}

#[tokio::test]
async fn test_cancel_during_last_batch_is_reported() {
    let mock = Arc::new(MockSiteConnector::new("mock").with_latency(Duration::from_millis(100)));
    let kill_switch = Arc::new(KillSwitch::new());
    let scanner = PermissionScanner::new(
        mock.clone(),
        kill_switch.clone(),
        Arc::new(SweepMetrics::new()),
        options(3, None),
    );

    let trip = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        kill_switch.activate("operator", "ctrl-c").await.unwrap();
    });
    let report = scanner.scan(&site_list(3), USER).await.unwrap();
    trip.await.unwrap();

    // every site was already dispatched, so all three finish
    assert_eq!(report.sites_scanned, 3);
    assert!(report.cancelled);
}

#[tokio::test]
async fn test_panicked_site_task_names_its_site() {
    let mock = Arc::new(MockSiteConnector::new("mock"));
    mock.panic_on_site(&site(2)).await;

    let report = scanner(mock.clone(), options(2, None))
        .scan(&site_list(5), USER)
        .await
        .unwrap();

    assert_eq!(report.sites_scanned, 5);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.resource_index, 2);
    assert_eq!(failure.site_url, site(2));
    assert_eq!(failure.kind, OutcomeKind::Unknown);
}

#[tokio::test]
async fn test_checkpoint_resume_skips_processed_sites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.json");

    let mock = Arc::new(MockSiteConnector::new("mock"));
    mock.add_grant(&site(2), USER, PermissionSurface::SiteCollectionAdmin, &site(2))
        .await;
    mock.fail_site(&site(5), ConnectorError::ConnectionFailed("reset".into()))
        .await;

    let opts = ScanOptions {
        batch_size: 4,
        checkpoint: Some(path.clone()),
        ..ScanOptions::default()
    };
    let first = scanner(mock.clone(), opts.clone())
        .scan(&site_list(8), USER)
        .await
        .unwrap();
    assert_eq!(first.failures.len(), 1);

    let saved = ScanCheckpoint::load(&path).unwrap().unwrap();
    assert_eq!(saved.processed.len(), 7);
    assert_eq!(saved.matches.len(), 1);

    // Second run: only the failed site is checked again and the earlier match is kept.
    let second = scanner(mock.clone(), opts)
        .scan(&site_list(8), USER)
        .await
        .unwrap();
    assert_eq!(mock.visits(&site(0)).await, 1);
    assert_eq!(mock.visits(&site(5)).await, 2);
    assert_eq!(second.matches.len(), 1);
    assert_eq!(second.sites_scanned, 8);
}

#[tokio::test]
async fn test_checkpoint_for_other_principal_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.json");
    ScanCheckpoint::new("someone@contoso.com").save(&path).unwrap();

    let opts = ScanOptions {
        checkpoint: Some(path),
        ..ScanOptions::default()
    };
    let err = scanner(Arc::new(MockSiteConnector::new("mock")), opts)
        .scan(&site_list(2), USER)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Checkpoint(_)));
}
