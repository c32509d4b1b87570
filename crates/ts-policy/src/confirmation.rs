//! Confirmation policies and decisions for destructive steps.
//!
//! A removal run never asks a terminal directly. It hands the proposed
//! removals to a [`Confirmer`] and acts on the returned decision, so the
//! same engine serves an operator at a prompt and an unattended job with
//! a pre-supplied policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// One removal awaiting a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposedRemoval {
    /// Zero-based position in the proposal list.
    pub index: usize,
    /// Resource the removal applies to (site URL, group id).
    pub target: String,
    pub description: String,
}

/// What to do with a list of proposed removals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", content = "indices", rename_all = "snake_case")]
pub enum ConfirmationDecision {
    RemoveAll,
    RemoveSelected(BTreeSet<usize>),
    Abort,
}

impl ConfirmationDecision {
    /// Whether the proposal at `index` should be applied.
    pub fn selects(&self, index: usize) -> bool {
        match self {
            ConfirmationDecision::RemoveAll => true,
            ConfirmationDecision::RemoveSelected(set) => set.contains(&index),
            ConfirmationDecision::Abort => false,
        }
    }

    /// Drops out-of-range indices; a selection left empty becomes `Abort`.
    pub fn normalize(self, proposal_count: usize) -> ConfirmationDecision {
        match self {
            ConfirmationDecision::RemoveSelected(set) => {
                let kept: BTreeSet<usize> =
                    set.into_iter().filter(|i| *i < proposal_count).collect();
                if kept.is_empty() {
                    ConfirmationDecision::Abort
                } else {
                    ConfirmationDecision::RemoveSelected(kept)
                }
            }
            other => other,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ConfirmationDecision::Abort)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfirmationDecision::RemoveAll => "remove_all",
            ConfirmationDecision::RemoveSelected(_) => "remove_selected",
            ConfirmationDecision::Abort => "abort",
        }
    }
}

/// Pre-supplied answer for unattended runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "policy", content = "indices", rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    ConfirmAll,
    /// Decline everything.
    #[default]
    ConfirmNone,
    /// Zero-based indices to apply.
    ConfirmList(BTreeSet<usize>),
}

/// Source of confirmation decisions.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn decide(&self, proposals: &[ProposedRemoval]) -> ConfirmationDecision;
}

#[async_trait]
impl Confirmer for ConfirmationPolicy {
    async fn decide(&self, proposals: &[ProposedRemoval]) -> ConfirmationDecision {
        let decision = match self {
            ConfirmationPolicy::ConfirmAll => ConfirmationDecision::RemoveAll,
            ConfirmationPolicy::ConfirmNone => ConfirmationDecision::Abort,
            ConfirmationPolicy::ConfirmList(ids) => {
                ConfirmationDecision::RemoveSelected(ids.clone())
            }
        }
        .normalize(proposals.len());

        debug!(
            proposals = proposals.len(),
            decision = decision.label(),
            "Applied confirmation policy"
        );
        decision
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection is empty")]
    Empty,

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Selections start at 1, got 0")]
    Zero,

    #[error("Invalid range '{0}'")]
    InvalidRange(String),

    #[error("No selection falls within 1-{0}")]
    OutOfRange(usize),
}

/// Parses operator input such as `1,3,5-7` into zero-based indices below `max`.
///
/// Range ends are clamped to `max` before expansion; numbers past it are
/// dropped. A selection with nothing left in range is an error.
pub fn parse_selection(input: &str, max: usize) -> Result<BTreeSet<usize>, SelectionError> {
    let mut selected = BTreeSet::new();
    for (start, end) in parse_ranges(input)? {
        if start > max {
            continue;
        }
        selected.extend((start - 1)..end.min(max));
    }

    if selected.is_empty() {
        return Err(SelectionError::OutOfRange(max));
    }
    Ok(selected)
}

/// Checks selection syntax without expanding it.
pub fn validate_selection(input: &str) -> Result<(), SelectionError> {
    parse_ranges(input).map(|_| ())
}

/// One-based inclusive ranges.
fn parse_ranges(input: &str) -> Result<Vec<(usize, usize)>, SelectionError> {
    let mut ranges = Vec::new();

    for token in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_one(start.trim())?;
                let end = parse_one(end.trim())?;
                if start > end {
                    return Err(SelectionError::InvalidRange(token.to_string()));
                }
                ranges.push((start, end));
            }
            None => {
                let n = parse_one(token)?;
                ranges.push((n, n));
            }
        }
    }

    if ranges.is_empty() {
        return Err(SelectionError::Empty);
    }
    Ok(ranges)
}

/// Applies an operator selection such as `1,3-5` to whatever proposals a
/// run produces. Used for `--select`, where the proposal count is not known
/// up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfirmer {
    input: String,
}

impl SelectionConfirmer {
    pub fn new(input: &str) -> Result<Self, SelectionError> {
        validate_selection(input)?;
        Ok(Self {
            input: input.to_string(),
        })
    }
}

#[async_trait]
impl Confirmer for SelectionConfirmer {
    async fn decide(&self, proposals: &[ProposedRemoval]) -> ConfirmationDecision {
        match parse_selection(&self.input, proposals.len()) {
            Ok(selected) => ConfirmationDecision::RemoveSelected(selected),
            Err(e) => {
                debug!(error = %e, "Selection matched no proposals");
                ConfirmationDecision::Abort
            }
        }
    }
}

fn parse_one(s: &str) -> Result<usize, SelectionError> {
    let n: usize = s
        .parse()
        .map_err(|_| SelectionError::InvalidNumber(s.to_string()))?;
    if n == 0 {
        return Err(SelectionError::Zero);
    }
    Ok(n)
}
