//! Directory lifecycle runs: offboarding and bulk group membership.
//!
//! Offboarding disables the account, revokes sessions and removes every
//! direct group membership. Each step is recorded and a failed step does not
//! stop the run. Only the initial user lookup is fatal.

use crate::outcome::OutcomeKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use ts_connectors::{ConnectorError, DirectoryConnector, DirectoryUser, MembershipChange};
use ts_observability::{AuditEventType, AuditLog, AuditResult, SweepMetrics};
use ts_policy::{Confirmer, KillSwitch, ProposedRemoval, RunMode};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("User lookup failed for '{upn}': {source}")]
    UserLookup {
        upn: String,
        #[source]
        source: ConnectorError,
    },

    #[error("Group listing failed for '{upn}': {source}")]
    GroupListing {
        upn: String,
        #[source]
        source: ConnectorError,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStep {
    DisableAccount,
    RevokeSessions,
    RemoveGroup,
}

impl LifecycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStep::DisableAccount => "disable_account",
            LifecycleStep::RevokeSessions => "revoke_sessions",
            LifecycleStep::RemoveGroup => "remove_group",
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: LifecycleStep,
    /// User id, or group id for group removals.
    pub target: String,
    pub description: String,
    pub status: StepStatus,
    pub kind: Option<OutcomeKind>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffboardReport {
    pub user: DirectoryUser,
    pub mode: RunMode,
    pub steps: Vec<StepRecord>,
    pub cancelled: bool,
}

impl OffboardReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(StepStatus::Failed) > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Added,
    AlreadyMember,
    Removed,
    NotMember,
    /// The UPN did not resolve to a user.
    NotFound,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipResult {
    pub upn: String,
    pub user_id: Option<String>,
    pub status: MembershipStatus,
    pub message: Option<String>,
}

struct PlannedStep {
    step: LifecycleStep,
    target: String,
    description: String,
}

/// Runs lifecycle operations against the directory.
pub struct LifecycleRunner {
    directory: Arc<dyn DirectoryConnector>,
    kill_switch: Arc<KillSwitch>,
    metrics: Arc<SweepMetrics>,
    audit: AuditLog,
    actor: String,
}

impl LifecycleRunner {
    pub fn new(
        directory: Arc<dyn DirectoryConnector>,
        kill_switch: Arc<KillSwitch>,
        metrics: Arc<SweepMetrics>,
        audit: AuditLog,
        actor: &str,
    ) -> Self {
        Self {
            directory,
            kill_switch,
            metrics,
            audit,
            actor: actor.to_string(),
        }
    }

    /// Offboards a user. The plan is shown to `confirmer`; unselected steps
    /// are skipped. In dry-run mode every step is skipped.
    #[instrument(skip_all, fields(upn = %upn, mode = %mode))]
    pub async fn offboard(
        &self,
        upn: &str,
        mode: RunMode,
        confirmer: &dyn Confirmer,
    ) -> Result<OffboardReport, LifecycleError> {
        let user = self
            .directory
            .get_user(upn)
            .await
            .map_err(|source| LifecycleError::UserLookup {
                upn: upn.to_string(),
                source,
            })?;
        let groups = self
            .directory
            .list_user_groups(&user.id)
            .await
            .map_err(|source| LifecycleError::GroupListing {
                upn: upn.to_string(),
                source,
            })?;

        let mut plan = vec![
            PlannedStep {
                step: LifecycleStep::DisableAccount,
                target: user.id.clone(),
                description: format!("disable account {}", user.user_principal_name),
            },
            PlannedStep {
                step: LifecycleStep::RevokeSessions,
                target: user.id.clone(),
                description: format!("revoke sign-in sessions of {}", user.user_principal_name),
            },
        ];
        plan.extend(groups.iter().map(|g| PlannedStep {
            step: LifecycleStep::RemoveGroup,
            target: g.id.clone(),
            description: format!("remove from group '{}'", g.display_name),
        }));

        let mut report = OffboardReport {
            user: user.clone(),
            mode,
            steps: Vec::with_capacity(plan.len()),
            cancelled: false,
        };

        if !mode.allows_mutation() {
            for planned in &plan {
                report.steps.push(skipped_step(planned, "dry run"));
            }
            info!(upn, steps = plan.len(), "Dry run, offboarding not performed");
            return Ok(report);
        }

        let proposals: Vec<ProposedRemoval> = plan
            .iter()
            .enumerate()
            .map(|(index, p)| ProposedRemoval {
                index,
                target: user.user_principal_name.clone(),
                description: p.description.clone(),
            })
            .collect();
        let decision = confirmer
            .decide(&proposals)
            .await
            .normalize(proposals.len());
        info!(upn, decision = decision.label(), "Offboarding plan decided");

        for (index, planned) in plan.iter().enumerate() {
            if !decision.selects(index) {
                report.steps.push(skipped_step(planned, "not selected"));
                continue;
            }
            if self.kill_switch.is_active() {
                report.cancelled = true;
                report.steps.push(skipped_step(planned, "cancelled"));
                continue;
            }

            let result = match planned.step {
                LifecycleStep::DisableAccount => {
                    self.directory.set_account_enabled(&user.id, false).await
                }
                LifecycleStep::RevokeSessions => self.directory.revoke_sessions(&user.id).await,
                LifecycleStep::RemoveGroup => {
                    self.directory
                        .remove_group_member(&planned.target, &user.id)
                        .await
                }
            };

            let record = self.finish_step(planned, result).await;
            report.steps.push(record);
        }

        info!(
            upn,
            done = report.count(StepStatus::Done),
            failed = report.count(StepStatus::Failed),
            skipped = report.count(StepStatus::Skipped),
            "Offboarding finished"
        );
        Ok(report)
    }

    async fn finish_step(
        &self,
        planned: &PlannedStep,
        result: Result<(), ConnectorError>,
    ) -> StepRecord {
        let kind = OutcomeKind::of(&result);
        self.metrics
            .record_lifecycle_step(planned.step.as_str(), kind.is_success());

        let (status, message, audit_result) = match result {
            Ok(()) => (StepStatus::Done, None, AuditResult::Success),
            Err(e) => {
                warn!(step = %planned.step, target = %planned.target, kind = %kind, error = %e, "Lifecycle step failed");
                (
                    StepStatus::Failed,
                    Some(e.to_string()),
                    AuditResult::Failure(e.to_string()),
                )
            }
        };

        self.audit
            .record(
                AuditEventType::LifecycleStep,
                &self.actor,
                Some(&planned.target),
                &planned.description,
                serde_json::json!({ "step": planned.step, "kind": kind }),
                audit_result,
            )
            .await;

        StepRecord {
            step: planned.step,
            target: planned.target.clone(),
            description: planned.description.clone(),
            status,
            kind: Some(kind),
            message,
        }
    }

    /// Adds or removes each UPN in `group_id`. Every UPN gets a result.
    ///
    /// UPNs are resolved first; the resolved users are then put to the
    /// confirmer as one batch, and only the selected ones are changed.
    #[instrument(skip_all, fields(group_id = %group_id, action = ?action, users = upns.len()))]
    pub async fn apply_group_membership(
        &self,
        group_id: &str,
        upns: &[String],
        action: MembershipAction,
        mode: RunMode,
        confirmer: &dyn Confirmer,
    ) -> Vec<MembershipResult> {
        let mut results = Vec::with_capacity(upns.len());
        // (slot in `results`, user) for every UPN that resolved
        let mut resolved: Vec<(usize, DirectoryUser)> = Vec::new();

        for upn in upns {
            if self.kill_switch.is_active() {
                results.push(skipped_membership(upn, None, "cancelled"));
                continue;
            }

            match self.directory.get_user(upn).await {
                Ok(user) => {
                    results.push(skipped_membership(upn, Some(&user.id), "not selected"));
                    resolved.push((results.len() - 1, user));
                }
                Err(ConnectorError::NotFound(_)) => results.push(MembershipResult {
                    upn: upn.clone(),
                    user_id: None,
                    status: MembershipStatus::NotFound,
                    message: None,
                }),
                Err(e) => results.push(failed_membership(upn, None, &e)),
            }
        }

        if !mode.allows_mutation() {
            for (slot, _) in &resolved {
                results[*slot].message = Some("dry run".to_string());
            }
            info!(group_id, users = resolved.len(), "Dry run, membership not changed");
            return results;
        }
        if resolved.is_empty() {
            return results;
        }

        let verb = match action {
            MembershipAction::Add => "add",
            MembershipAction::Remove => "remove",
        };
        let proposals: Vec<ProposedRemoval> = resolved
            .iter()
            .enumerate()
            .map(|(index, (_, user))| ProposedRemoval {
                index,
                target: group_id.to_string(),
                description: format!("{} {}", verb, user.user_principal_name),
            })
            .collect();
        let decision = confirmer
            .decide(&proposals)
            .await
            .normalize(proposals.len());
        info!(group_id, decision = decision.label(), "Membership change decided");

        let step = match action {
            MembershipAction::Add => "group_add",
            MembershipAction::Remove => "group_remove",
        };
        for (index, (slot, user)) in resolved.iter().enumerate() {
            if !decision.selects(index) {
                continue;
            }
            if self.kill_switch.is_active() {
                results[*slot].message = Some("cancelled".to_string());
                continue;
            }

            let result = self.apply_one(group_id, user, action).await;
            let success = !matches!(result.status, MembershipStatus::Failed);
            self.metrics.record_lifecycle_step(step, success);
            self.audit
                .record(
                    AuditEventType::LifecycleStep,
                    &self.actor,
                    Some(group_id),
                    &format!("{} {}", step, user.user_principal_name),
                    serde_json::json!({ "status": result.status }),
                    if success {
                        AuditResult::Success
                    } else {
                        AuditResult::Failure(result.message.clone().unwrap_or_default())
                    },
                )
                .await;
            results[*slot] = result;
        }

        info!(group_id, ?action, processed = results.len(), "Group membership run finished");
        results
    }

    async fn apply_one(
        &self,
        group_id: &str,
        user: &DirectoryUser,
        action: MembershipAction,
    ) -> MembershipResult {
        let upn = &user.user_principal_name;
        let status = match action {
            MembershipAction::Add => match self.directory.add_group_member(group_id, &user.id).await {
                Ok(MembershipChange::Added) => MembershipStatus::Added,
                Ok(MembershipChange::AlreadyMember) => MembershipStatus::AlreadyMember,
                Err(e) => return failed_membership(upn, Some(&user.id), &e),
            },
            MembershipAction::Remove => {
                match self.directory.is_group_member(group_id, &user.id).await {
                    Ok(false) => MembershipStatus::NotMember,
                    Ok(true) => match self.directory.remove_group_member(group_id, &user.id).await {
                        Ok(()) => MembershipStatus::Removed,
                        Err(e) => return failed_membership(upn, Some(&user.id), &e),
                    },
                    Err(e) => return failed_membership(upn, Some(&user.id), &e),
                }
            }
        };
        MembershipResult {
            upn: upn.clone(),
            user_id: Some(user.id.clone()),
            status,
            message: None,
        }
    }
}

fn skipped_membership(upn: &str, user_id: Option<&str>, reason: &str) -> MembershipResult {
    MembershipResult {
        upn: upn.to_string(),
        user_id: user_id.map(str::to_string),
        status: MembershipStatus::Skipped,
        message: Some(reason.to_string()),
    }
}

fn failed_membership(upn: &str, user_id: Option<&str>, e: &ConnectorError) -> MembershipResult {
    warn!(upn, kind = %OutcomeKind::from(e), error = %e, "Membership change failed");
    MembershipResult {
        upn: upn.to_string(),
        user_id: user_id.map(str::to_string),
        status: MembershipStatus::Failed,
        message: Some(e.to_string()),
    }
}

fn skipped_step(planned: &PlannedStep, reason: &str) -> StepRecord {
    StepRecord {
        step: planned.step,
        target: planned.target.clone(),
        description: planned.description.clone(),
        status: StepStatus::Skipped,
        kind: None,
        message: Some(reason.to_string()),
    }
}
