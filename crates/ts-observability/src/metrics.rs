//! Sweep metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder. A local tally is kept as well so a
//! run can print its own summary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

static DESCRIBE: Once = Once::new();

/// Totals for one process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub sites_scanned: u64,
    pub site_failures: u64,
    pub matches: u64,
    pub removals_succeeded: u64,
    pub removals_failed: u64,
    pub lifecycle_steps_failed: u64,
}

/// Metrics collector shared by the scanner, removal executor and lifecycle runs.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    sites_scanned: AtomicU64,
    site_failures: AtomicU64,
    matches: AtomicU64,
    removals_succeeded: AtomicU64,
    removals_failed: AtomicU64,
    lifecycle_steps_failed: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        DESCRIBE.call_once(Self::register_metrics);
        Self::default()
    }

    fn register_metrics() {
        describe_counter!("ts_sites_scanned_total", "Sites whose checks completed");
        describe_counter!(
            "ts_site_failures_total",
            "Sites whose checks failed, by outcome kind"
        );
        describe_counter!("ts_matches_total", "Permission matches found, by surface");
        describe_counter!("ts_removals_total", "Removal attempts, by outcome");
        describe_counter!(
            "ts_lifecycle_steps_total",
            "Lifecycle steps executed, by step and status"
        );
        describe_gauge!("ts_scan_in_flight", "Site checks currently running");
        describe_histogram!(
            "ts_site_check_duration_seconds",
            "Time spent checking one site"
        );
    }

    pub fn record_site_scanned(&self, duration_secs: f64) {
        self.sites_scanned.fetch_add(1, Ordering::Relaxed);
        counter!("ts_sites_scanned_total").increment(1);
        histogram!("ts_site_check_duration_seconds").record(duration_secs);
    }

    pub fn record_site_failure(&self, kind: &str) {
        self.site_failures.fetch_add(1, Ordering::Relaxed);
        counter!("ts_site_failures_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_match(&self, surface: &str) {
        self.matches.fetch_add(1, Ordering::Relaxed);
        counter!("ts_matches_total", "surface" => surface.to_string()).increment(1);
    }

    pub fn record_removal(&self, outcome: &str, success: bool) {
        if success {
            self.removals_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.removals_failed.fetch_add(1, Ordering::Relaxed);
        }
        counter!("ts_removals_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_lifecycle_step(&self, step: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        if !success {
            self.lifecycle_steps_failed.fetch_add(1, Ordering::Relaxed);
        }
        counter!("ts_lifecycle_steps_total", "step" => step.to_string(), "status" => status)
            .increment(1);
    }

    pub fn site_started(&self) {
        gauge!("ts_scan_in_flight").increment(1.0);
    }

    pub fn site_finished(&self) {
        gauge!("ts_scan_in_flight").decrement(1.0);
    }

    pub fn summary(&self) -> SweepSummary {
        SweepSummary {
            sites_scanned: self.sites_scanned.load(Ordering::Relaxed),
            site_failures: self.site_failures.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            removals_succeeded: self.removals_succeeded.load(Ordering::Relaxed),
            removals_failed: self.removals_failed.load(Ordering::Relaxed),
            lifecycle_steps_failed: self.lifecycle_steps_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_tracks_records() {
        let metrics = SweepMetrics::new();
        metrics.record_site_scanned(0.2);
        metrics.record_site_scanned(0.4);
        metrics.record_site_failure("permission_denied");
        metrics.record_match("site_collection_admin");
        metrics.record_removal("success", true);
        metrics.record_removal("not_found", false);
        metrics.record_lifecycle_step("disable_account", false);

        let summary = metrics.summary();
        assert_eq!(summary.sites_scanned, 2);
        assert_eq!(summary.site_failures, 1);
        assert_eq!(summary.matches, 1);
        assert_eq!(summary.removals_succeeded, 1);
        assert_eq!(summary.removals_failed, 1);
        assert_eq!(summary.lifecycle_steps_failed, 1);
    }

    #[test]
    fn test_gauge_calls_without_recorder() {
        let metrics = SweepMetrics::new();
        metrics.site_started();
        metrics.site_finished();
        assert_eq!(metrics.summary(), SweepSummary::default());
    }
}
