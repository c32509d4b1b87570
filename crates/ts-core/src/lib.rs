//! # ts-core
//!
//! Scan, confirm and mutate engine for tenant-sweep.
//!
//! This crate provides the bounded-concurrency permission scanner, scan
//! checkpoints, the confirmation-gated removal executor, report export,
//! and the directory lifecycle runs (UPN lookup, offboarding, bulk group
//! membership).

pub mod checkpoint;
pub mod export;
pub mod lifecycle;
pub mod lookup;
pub mod matches;
pub mod outcome;
pub mod removal;
pub mod scanner;

pub use checkpoint::{normalize_site_url, CheckpointError, ScanCheckpoint};
pub use export::{
    timestamped_path, write_json, write_lookup_csv, write_matches_csv, write_removals_csv,
    ExportError,
};
pub use lifecycle::{
    LifecycleError, LifecycleRunner, LifecycleStep, MembershipAction, MembershipResult,
    MembershipStatus, OffboardReport, StepRecord, StepStatus,
};
pub use lookup::{
    lookup_names, parse_name_list, summarize, LookupResult, LookupStatus, LookupSummary,
    NameEntry,
};
pub use matches::{MatchCollection, PermissionMatch};
pub use outcome::OutcomeKind;
pub use removal::{proposals_for, RemovalExecutor, RemovalRecord, RemovalReport, RemovalStatus};
pub use scanner::{
    dedupe_sites, FailurePolicy, PermissionScanner, ScanError, ScanFailure, ScanOptions,
    ScanReport,
};
