//! UPN lookup from a list of names.
//!
//! Accepts pasted name tables (`|First |Last |`), `First,Last` CSV rows or
//! plain `First Last` lines, looks each name up by exact given name and
//! surname, and classifies the result.

use crate::outcome::OutcomeKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use ts_connectors::{DirectoryConnector, DirectoryUser};
use ts_policy::KillSwitch;

/// A name to look up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameEntry {
    pub first_name: String,
    pub last_name: String,
}

impl NameEntry {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        }
    }
}

impl fmt::Display for NameEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first_name, self.last_name)
    }
}

/// Parses a name list. Blank lines, table separators, header rows and
/// lines with fewer than two names are ignored.
pub fn parse_name_list(text: &str) -> Vec<NameEntry> {
    text.lines().filter_map(parse_name_line).collect()
}

fn parse_name_line(line: &str) -> Option<NameEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let parts: Vec<&str> = if line.contains('|') {
        line.split('|').map(str::trim).filter(|p| !p.is_empty()).collect()
    } else if line.contains(',') {
        line.split(',').map(str::trim).filter(|p| !p.is_empty()).collect()
    } else {
        // "First Last Name": the first word is the given name.
        match line.split_once(char::is_whitespace) {
            Some((first, rest)) => vec![first, rest.trim()],
            None => vec![line],
        }
    };

    if parts.len() < 2 {
        return None;
    }
    if parts
        .iter()
        .all(|p| p.chars().all(|c| c == '-' || c == ':'))
    {
        return None;
    }
    if parts[0].eq_ignore_ascii_case("first name") && parts[1].eq_ignore_ascii_case("last name") {
        return None;
    }

    Some(NameEntry::new(parts[0], parts[1]))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    Multiple,
    NotFound,
    Error,
}

impl LookupStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LookupStatus::Found => "Found",
            LookupStatus::Multiple => "Multiple",
            LookupStatus::NotFound => "Not Found",
            LookupStatus::Error => "Error",
        }
    }
}

/// Result for one name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResult {
    pub entry: NameEntry,
    pub status: LookupStatus,
    pub users: Vec<DirectoryUser>,
    pub error: Option<String>,
}

impl LookupResult {
    pub fn from_users(entry: NameEntry, users: Vec<DirectoryUser>) -> Self {
        let status = match users.len() {
            0 => LookupStatus::NotFound,
            1 => LookupStatus::Found,
            _ => LookupStatus::Multiple,
        };
        Self {
            entry,
            status,
            users,
            error: None,
        }
    }

    /// The single UPN, when exactly one user matched.
    pub fn upn(&self) -> Option<&str> {
        match (self.status, self.users.first()) {
            (LookupStatus::Found, Some(u)) => Some(&u.user_principal_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupSummary {
    pub total: usize,
    pub found: usize,
    pub multiple: usize,
    pub not_found: usize,
    pub errors: usize,
}

pub fn summarize(results: &[LookupResult]) -> LookupSummary {
    results.iter().fold(
        LookupSummary {
            total: results.len(),
            ..LookupSummary::default()
        },
        |mut s, r| {
            match r.status {
                LookupStatus::Found => s.found += 1,
                LookupStatus::Multiple => s.multiple += 1,
                LookupStatus::NotFound => s.not_found += 1,
                LookupStatus::Error => s.errors += 1,
            }
            s
        },
    )
}

/// Looks every name up in order. A failed lookup is recorded and the run continues.
pub async fn lookup_names(
    directory: &dyn DirectoryConnector,
    names: &[NameEntry],
    kill_switch: &KillSwitch,
) -> Vec<LookupResult> {
    let mut results = Vec::with_capacity(names.len());

    for entry in names {
        if kill_switch.is_active() {
            warn!(remaining = names.len() - results.len(), "Lookup cancelled");
            break;
        }

        let result = match directory
            .find_users_by_name(&entry.first_name, &entry.last_name)
            .await
        {
            Ok(users) => LookupResult::from_users(entry.clone(), users),
            Err(e) => {
                warn!(name = %entry, kind = %OutcomeKind::from(&e), error = %e, "Lookup failed");
                LookupResult {
                    entry: entry.clone(),
                    status: LookupStatus::Error,
                    users: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        debug!(name = %entry, status = result.status.label(), "Looked up name");
        results.push(result);
    }

    let summary = summarize(&results);
    info!(
        total = summary.total,
        found = summary.found,
        multiple = summary.multiple,
        not_found = summary.not_found,
        errors = summary.errors,
        "UPN lookup finished"
    );
    results
}
