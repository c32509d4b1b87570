//! Bounded-concurrency permission scanner.
//!
//! Given a list of sites and a principal, checks every site for the
//! principal's access on each permission surface and collects matches.
//! Nothing is mutated during a scan.
//!
//! Sites are de-duplicated, split into batches, and each batch is run
//! through a `JoinSet` whose spawns are gated by a semaphore, so at most
//! `concurrency` site checks are ever in flight. Before each dispatch the
//! scanner checks the match threshold and the kill switch; work already
//! dispatched is always allowed to finish.

use crate::checkpoint::{normalize_site_url, CheckpointError, ScanCheckpoint};
use crate::matches::{MatchCollection, PermissionMatch};
use crate::outcome::OutcomeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn, Instrument};
use ts_connectors::{ConnectorError, PermissionGrant, PermissionSurface, SiteConnector};
use ts_observability::{scan_span, site_span, SweepMetrics};
use ts_policy::KillSwitch;

/// What to do with per-site failures.
///
/// Failures are always counted and returned; the policy decides how loudly
/// they are reported. Neither policy stops other sites from being checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log at debug and treat the site as having no match.
    #[default]
    FailOpen,
    /// Log every failure at warn; callers should treat the run as failed.
    FailLoud,
}

/// Scan tuning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum site checks in flight.
    pub concurrency: usize,
    pub batch_size: usize,
    /// Stop dispatching once this many matches are collected.
    pub match_threshold: Option<usize>,
    pub failure_policy: FailurePolicy,
    /// Surfaces to check, always in the fixed order of `PermissionSurface::ALL`.
    pub surfaces: BTreeSet<PermissionSurface>,
    /// Checkpoint file written after every batch and used to resume.
    pub checkpoint: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            batch_size: 100,
            match_threshold: None,
            failure_policy: FailurePolicy::FailOpen,
            surfaces: PermissionSurface::ALL.into_iter().collect(),
            checkpoint: None,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.concurrency == 0 {
            return Err(ScanError::InvalidOptions(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ScanError::InvalidOptions(
                "batch size must be at least 1".into(),
            ));
        }
        if self.match_threshold == Some(0) {
            return Err(ScanError::InvalidOptions(
                "match threshold must be at least 1".into(),
            ));
        }
        if self.surfaces.is_empty() {
            return Err(ScanError::InvalidOptions(
                "at least one permission surface must be checked".into(),
            ));
        }
        Ok(())
    }
}

/// A site whose checks did not complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanFailure {
    pub resource_index: usize,
    pub site_url: String,
    pub kind: OutcomeKind,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Result of a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub principal: String,
    /// Distinct sites requested.
    pub sites_total: usize,
    /// Sites whose checks ran to completion or failure, including resumed ones.
    pub sites_scanned: usize,
    /// Sites never dispatched (threshold, cancellation).
    pub sites_skipped: usize,
    pub matches: Vec<PermissionMatch>,
    pub failures: Vec<ScanFailure>,
    pub short_circuited: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Number of distinct sites with at least one match.
    pub fn sites_with_matches(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.resource_index)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// What one site task reports back.
struct SiteOutcome {
    index: usize,
    site_url: String,
    result: Result<usize, ConnectorError>,
}

/// Scans sites for a principal's permissions.
pub struct PermissionScanner {
    sites: Arc<dyn SiteConnector>,
    kill_switch: Arc<KillSwitch>,
    metrics: Arc<SweepMetrics>,
    options: ScanOptions,
}

impl PermissionScanner {
    pub fn new(
        sites: Arc<dyn SiteConnector>,
        kill_switch: Arc<KillSwitch>,
        metrics: Arc<SweepMetrics>,
        options: ScanOptions,
    ) -> Self {
        Self {
            sites,
            kill_switch,
            metrics,
            options,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scans `site_urls` for `principal` (a UPN or claims login).
    pub async fn scan(
        &self,
        site_urls: &[String],
        principal: &str,
    ) -> Result<ScanReport, ScanError> {
        self.options.validate()?;
        let span = scan_span!(principal, sites = site_urls.len());
        self.run(site_urls, principal).instrument(span).await
    }

    async fn run(&self, site_urls: &[String], principal: &str) -> Result<ScanReport, ScanError> {
        let started_at = Utc::now();
        let sites = dedupe_sites(site_urls);
        let sites_total = sites.len();

        let mut checkpoint = match &self.options.checkpoint {
            Some(path) => ScanCheckpoint::load_for(path, principal)?
                .unwrap_or_else(|| ScanCheckpoint::new(principal)),
            None => ScanCheckpoint::new(principal),
        };

        let collection = Arc::new(MatchCollection::from_matches(std::mem::take(
            &mut checkpoint.matches,
        )));
        let resumed = sites
            .iter()
            .filter(|(_, url)| checkpoint.is_processed(url))
            .count();
        let pending: Vec<(usize, String)> = sites
            .into_iter()
            .filter(|(_, url)| !checkpoint.is_processed(url))
            .collect();

        info!(
            sites_total,
            resumed,
            pending = pending.len(),
            concurrency = self.options.concurrency,
            batch_size = self.options.batch_size,
            threshold = ?self.options.match_threshold,
            "Starting permission scan"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut failures: Vec<ScanFailure> = Vec::new();
        let mut scanned = resumed;
        let mut short_circuited = false;
        let mut cancelled = false;

        'batches: for (batch_no, batch) in pending.chunks(self.options.batch_size).enumerate() {
            let mut tasks: JoinSet<SiteOutcome> = JoinSet::new();
            // task id -> (index, url), so a panicked task still names its site
            let mut in_flight: HashMap<task::Id, (usize, String)> = HashMap::new();

            for (index, site_url) in batch {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };

                if self.kill_switch.is_active() {
                    cancelled = true;
                    break;
                }
                if self.threshold_reached(&collection) {
                    short_circuited = true;
                    break;
                }

                let sites = Arc::clone(&self.sites);
                let collection = Arc::clone(&collection);
                let metrics = Arc::clone(&self.metrics);
                let surfaces = self.options.surfaces.clone();
                let principal = principal.to_string();
                let index = *index;
                let site_url = site_url.clone();
                let span = site_span!(site_url, index);
                let label = (index, site_url.clone());

                let handle = tasks.spawn(
                    async move {
                        let _permit = permit;
                        metrics.site_started();
                        let started = Instant::now();
                        let result = check_site(
                            sites.as_ref(),
                            &site_url,
                            &principal,
                            &surfaces,
                            index,
                            &collection,
                            &metrics,
                        )
                        .await;
                        metrics.site_finished();
                        if result.is_ok() {
                            metrics.record_site_scanned(started.elapsed().as_secs_f64());
                        }
                        SiteOutcome {
                            index,
                            site_url,
                            result,
                        }
                    }
                    .instrument(span),
                );
                in_flight.insert(handle.id(), label);
            }
            let dispatched = in_flight.len();

            while let Some(joined) = tasks.join_next_with_id().await {
                scanned += 1;
                match joined {
                    Ok((
                        id,
                        SiteOutcome {
                            site_url,
                            result: Ok(found),
                            ..
                        },
                    )) => {
                        in_flight.remove(&id);
                        if found > 0 {
                            debug!(site = %site_url, found, "Site has matches");
                        }
                        checkpoint.processed.insert(normalize_site_url(&site_url));
                    }
                    Ok((
                        id,
                        SiteOutcome {
                            index,
                            site_url,
                            result: Err(e),
                        },
                    )) => {
                        in_flight.remove(&id);
                        let failure = ScanFailure {
                            resource_index: index,
                            kind: OutcomeKind::from(&e),
                            message: e.to_string(),
                            site_url,
                        };
                        self.report_failure(&failure);
                        failures.push(failure);
                    }
                    Err(join_error) => {
                        // Not marked processed, so it is retried on resume.
                        let (resource_index, site_url) = in_flight
                            .remove(&join_error.id())
                            .unwrap_or((usize::MAX, String::new()));
                        let failure = ScanFailure {
                            resource_index,
                            site_url,
                            kind: OutcomeKind::Unknown,
                            message: format!("Site check task failed: {}", join_error),
                        };
                        self.report_failure(&failure);
                        failures.push(failure);
                    }
                }
            }

            debug!(
                batch = batch_no,
                dispatched,
                matches = collection.len(),
                "Batch complete"
            );

            if let Some(path) = &self.options.checkpoint {
                checkpoint.matches = collection.snapshot().await;
                checkpoint.failures = failures.clone();
                checkpoint.updated_at = Utc::now();
                checkpoint.save(path)?;
            }

            if cancelled || short_circuited {
                break 'batches;
            }
        }

        // A kill switch tripped while the last batch drained still cancels the run.
        if self.kill_switch.is_active() {
            cancelled = true;
        }

        let matches = collection.snapshot().await;
        let report = ScanReport {
            principal: principal.to_string(),
            sites_total,
            sites_scanned: scanned,
            sites_skipped: sites_total.saturating_sub(scanned),
            matches,
            failures,
            short_circuited,
            cancelled,
            started_at,
            completed_at: Utc::now(),
        };

        info!(
            scanned = report.sites_scanned,
            skipped = report.sites_skipped,
            matches = report.matches.len(),
            failures = report.failures.len(),
            short_circuited,
            cancelled,
            "Permission scan finished"
        );
        Ok(report)
    }

    fn threshold_reached(&self, collection: &MatchCollection) -> bool {
        self.options
            .match_threshold
            .is_some_and(|t| collection.len() >= t)
    }

    fn report_failure(&self, failure: &ScanFailure) {
        self.metrics.record_site_failure(failure.kind.as_str());
        match self.options.failure_policy {
            FailurePolicy::FailOpen => debug!(
                site = %failure.site_url,
                kind = %failure.kind,
                error = %failure.message,
                "Site check failed, treating as no match"
            ),
            FailurePolicy::FailLoud => warn!(
                site = %failure.site_url,
                kind = %failure.kind,
                error = %failure.message,
                "Site check failed"
            ),
        }
    }
}

/// Runs the fixed check sequence on one site.
///
/// A site is all-or-nothing: if any check fails, grants found by earlier
/// checks on that site are not recorded.
async fn check_site(
    sites: &dyn SiteConnector,
    site_url: &str,
    principal: &str,
    surfaces: &BTreeSet<PermissionSurface>,
    index: usize,
    collection: &MatchCollection,
    metrics: &SweepMetrics,
) -> Result<usize, ConnectorError> {
    let resolved = match sites.resolve_principal(site_url, principal).await? {
        Some(p) => p,
        None => return Ok(0),
    };

    let mut grants: Vec<PermissionGrant> = Vec::new();
    for surface in PermissionSurface::ALL {
        if !surfaces.contains(&surface) {
            continue;
        }
        match surface {
            PermissionSurface::GroupMembership => {
                grants.extend(sites.group_memberships(site_url, &resolved).await?)
            }
            PermissionSurface::SiteCollectionAdmin => {
                grants.extend(sites.site_admin_grant(site_url, &resolved).await?)
            }
            PermissionSurface::SiteRoleAssignment => {
                grants.extend(sites.site_role_grants(site_url, &resolved).await?)
            }
            PermissionSurface::LibraryRoleAssignment => {
                grants.extend(sites.library_role_grants(site_url, &resolved).await?)
            }
        }
    }

    let found = grants.len();
    for grant in grants {
        metrics.record_match(grant.surface.as_str());
        collection.append(PermissionMatch::new(index, grant)).await;
    }
    Ok(found)
}

/// De-duplicates site URLs, keeping first occurrence order. Blank entries are dropped.
pub fn dedupe_sites(site_urls: &[String]) -> Vec<(usize, String)> {
    let mut seen = HashSet::new();
    site_urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(normalize_site_url(u)))
        .enumerate()
        .map(|(i, u)| (i, u.trim_end_matches('/').to_string()))
        .collect()
}
