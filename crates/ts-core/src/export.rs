//! Report export to timestamped CSV and JSON files.
//!
//! Column sets follow what each run collected; they are not a stable schema.

use crate::lookup::{LookupResult, LookupStatus};
use crate::matches::PermissionMatch;
use crate::removal::RemovalRecord;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// `<dir>/<stem>_<YYYYMMDD_HHMMSS>.<ext>`
pub fn timestamped_path(dir: &Path, stem: &str, ext: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.{}", stem, at.format("%Y%m%d_%H%M%S"), ext))
}

fn ensure_parent(path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize, ExportError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), rows = rows.len(), "Exported CSV");
    Ok(rows.len())
}

#[derive(Serialize)]
struct MatchRow<'a> {
    #[serde(rename = "Site URL")]
    site_url: &'a str,
    #[serde(rename = "Surface")]
    surface: &'a str,
    #[serde(rename = "Container")]
    container: &'a str,
    #[serde(rename = "Roles")]
    roles: String,
    #[serde(rename = "Principal")]
    principal: &'a str,
    #[serde(rename = "Found At")]
    found_at: String,
}

pub fn write_matches_csv(path: &Path, matches: &[PermissionMatch]) -> Result<usize, ExportError> {
    let rows: Vec<MatchRow<'_>> = matches
        .iter()
        .map(|m| MatchRow {
            site_url: &m.site_url,
            surface: m.grant.surface.as_str(),
            container: &m.grant.container,
            roles: m.grant.roles.join("; "),
            principal: &m.grant.principal_login,
            found_at: m.found_at.to_rfc3339(),
        })
        .collect();
    write_rows(path, &rows)
}

#[derive(Serialize)]
struct RemovalRow<'a> {
    #[serde(rename = "Site URL")]
    site_url: &'a str,
    #[serde(rename = "Permission")]
    description: &'a str,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Outcome")]
    kind: String,
    #[serde(rename = "Message")]
    message: &'a str,
    #[serde(rename = "Timestamp")]
    at: String,
}

pub fn write_removals_csv(path: &Path, records: &[RemovalRecord]) -> Result<usize, ExportError> {
    let rows: Vec<RemovalRow<'_>> = records
        .iter()
        .map(|r| RemovalRow {
            site_url: &r.site_url,
            description: &r.description,
            status: format!("{:?}", r.status),
            kind: r.kind.map(|k| k.to_string()).unwrap_or_default(),
            message: r.message.as_deref().unwrap_or(""),
            at: r.at.to_rfc3339(),
        })
        .collect();
    write_rows(path, &rows)
}

#[derive(Serialize)]
struct LookupRow<'a> {
    #[serde(rename = "First Name")]
    first_name: &'a str,
    #[serde(rename = "Last Name")]
    last_name: &'a str,
    #[serde(rename = "UPN")]
    upn: &'a str,
    #[serde(rename = "Email")]
    email: &'a str,
    #[serde(rename = "User ID")]
    user_id: &'a str,
    #[serde(rename = "Status")]
    status: &'a str,
}

/// One row per found user; a name with several matches produces several rows.
pub fn write_lookup_csv(path: &Path, results: &[LookupResult]) -> Result<usize, ExportError> {
    let mut rows = Vec::new();
    for result in results {
        match result.status {
            LookupStatus::Found | LookupStatus::Multiple => {
                for user in &result.users {
                    rows.push(LookupRow {
                        first_name: &result.entry.first_name,
                        last_name: &result.entry.last_name,
                        upn: &user.user_principal_name,
                        email: user.mail.as_deref().unwrap_or("N/A"),
                        user_id: &user.id,
                        status: result.status.label(),
                    });
                }
            }
            LookupStatus::NotFound | LookupStatus::Error => rows.push(LookupRow {
                first_name: &result.entry.first_name,
                last_name: &result.entry.last_name,
                upn: "",
                email: "",
                user_id: "",
                status: result.status.label(),
            }),
        }
    }
    write_rows(path, &rows)
}

/// Writes any serializable report as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExportError> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Exported JSON");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ts_connectors::testing::{sample_admin_grant, sample_user};

    #[test]
    fn test_timestamped_path() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = timestamped_path(Path::new("/tmp/out"), "permission_matches", "csv", at);
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/permission_matches_20240309_140507.csv")
        );
    }

    #[test]
    fn test_matches_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.csv");
        let m = PermissionMatch::new(
            0,
            sample_admin_grant("https://contoso.sharepoint.com/sites/hr", "login"),
        );
        assert_eq!(write_matches_csv(&path, &[m]).unwrap(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Site URL,Surface,Container,Roles,Principal,Found At"
        );
        assert!(lines
            .next()
            .unwrap()
            .starts_with("https://contoso.sharepoint.com/sites/hr,site_collection_admin,"));
    }

    #[test]
    fn test_lookup_csv_rows_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("upn.csv");
        let results = vec![
            LookupResult::from_users(
                crate::lookup::NameEntry::new("Sam", "Lee"),
                vec![sample_user("u1", "Sam", "Lee"), sample_user("u2", "Sam", "Lee")],
            ),
            LookupResult::from_users(crate::lookup::NameEntry::new("No", "Body"), vec![]),
        ];
        assert_eq!(write_lookup_csv(&path, &results).unwrap(), 3);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "First Name,Last Name,UPN,Email,User ID,Status");
        assert!(lines[1].ends_with(",u1,Multiple"));
        assert_eq!(lines[3], "No,Body,,,,Not Found");
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json(&path, &serde_json::json!({ "matches": 3 })).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["matches"], 3);
    }
}
