//! # ts-observability
//!
//! Logging, metrics, and audit trail for tenant-sweep.
//!
//! This crate provides structured logging with tracing, sweep metrics on the
//! `metrics` facade, and the audit log of confirmations and mutations.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEventType, AuditLog, AuditLogEntry, AuditResult};
pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::{SweepMetrics, SweepSummary};
