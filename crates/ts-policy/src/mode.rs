//! Run modes controlling whether a sweep may mutate the tenant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a confirm-then-mutate run is authorised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Scan and report only. Nothing is ever mutated.
    DryRun,

    /// An operator decides which removals happen.
    #[default]
    Interactive,

    /// A pre-supplied confirmation policy decides; no operator is present.
    Unattended,
}

impl RunMode {
    pub fn allows_mutation(&self) -> bool {
        !matches!(self, RunMode::DryRun)
    }

    pub fn requires_operator(&self) -> bool {
        matches!(self, RunMode::Interactive)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::DryRun => write!(f, "dry-run"),
            RunMode::Interactive => write!(f, "interactive"),
            RunMode::Unattended => write!(f, "unattended"),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dry-run" | "dry_run" | "dryrun" | "whatif" => Ok(RunMode::DryRun),
            "interactive" => Ok(RunMode::Interactive),
            "unattended" | "auto" => Ok(RunMode::Unattended),
            other => Err(format!(
                "Unknown run mode '{}'. Use interactive, unattended or dry-run",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("dry-run".parse::<RunMode>().unwrap(), RunMode::DryRun);
        assert_eq!("WhatIf".parse::<RunMode>().unwrap(), RunMode::DryRun);
        assert_eq!("unattended".parse::<RunMode>().unwrap(), RunMode::Unattended);
        assert!("yolo".parse::<RunMode>().is_err());
        assert_eq!(RunMode::DryRun.to_string(), "dry-run");
    }

    #[test]
    fn test_mutation_rules() {
        assert!(!RunMode::DryRun.allows_mutation());
        assert!(RunMode::Interactive.allows_mutation());
        assert!(RunMode::Interactive.requires_operator());
        assert!(!RunMode::Unattended.requires_operator());
        assert_eq!(RunMode::default(), RunMode::Interactive);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&RunMode::DryRun).unwrap();
        assert_eq!(json, "\"dry_run\"");
    }
}
