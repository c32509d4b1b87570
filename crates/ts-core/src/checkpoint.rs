//! Scan progress checkpoints.
//!
//! A checkpoint records which sites completed their checks and the matches
//! found so far. It is rewritten after every batch by writing a temporary
//! file next to the target and renaming it over the old one.

use crate::matches::PermissionMatch;
use crate::scanner::ScanFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Checkpoint belongs to '{found}', not '{expected}'")]
    PrincipalMismatch { expected: String, found: String },

    #[error("Unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
}

/// Persisted scan progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub version: u32,
    pub principal: String,
    /// Normalized URLs of sites whose checks completed without error.
    pub processed: BTreeSet<String>,
    pub matches: Vec<PermissionMatch>,
    /// Failures of the last attempt; failed sites are retried on resume.
    pub failures: Vec<ScanFailure>,
    pub updated_at: DateTime<Utc>,
}

impl ScanCheckpoint {
    pub fn new(principal: &str) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            principal: principal.to_string(),
            processed: BTreeSet::new(),
            matches: Vec::new(),
            failures: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Loads a checkpoint. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let checkpoint: ScanCheckpoint = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(checkpoint.version));
        }

        info!(
            path = %path.display(),
            processed = checkpoint.processed.len(),
            matches = checkpoint.matches.len(),
            "Loaded scan checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Loads a checkpoint for `principal`, rejecting one written for someone else.
    pub fn load_for(path: &Path, principal: &str) -> Result<Option<Self>, CheckpointError> {
        match Self::load(path)? {
            Some(c) if !c.principal.eq_ignore_ascii_case(principal) => {
                Err(CheckpointError::PrincipalMismatch {
                    expected: principal.to_string(),
                    found: c.principal,
                })
            }
            other => Ok(other),
        }
    }

    /// Writes the checkpoint atomically.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(self)?;
        let tmp = tmp_path(path);
        {
            let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&json).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        std::fs::rename(&tmp, path).map_err(io_err)?;

        debug!(
            path = %path.display(),
            processed = self.processed.len(),
            "Saved scan checkpoint"
        );
        Ok(())
    }

    pub fn is_processed(&self, site_url: &str) -> bool {
        self.processed.contains(&normalize_site_url(site_url))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Identity used to de-duplicate sites: no trailing slash, lowercase.
pub fn normalize_site_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}
