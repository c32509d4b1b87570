//! Configuration validation for tenant-sweep.
//!
//! Runs before any command that talks to the tenant so that missing
//! credentials surface as one readable list instead of a 401 mid-run.

use crate::config::AppConfig;
use colored::Colorize;
use ts_connectors::PermissionSurface;

/// Above this many concurrent site checks SharePoint throttling becomes likely.
const HIGH_CONCURRENCY: usize = 50;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Problems that prevent a run.
    pub errors: Vec<String>,
    /// Problems worth fixing that do not prevent a run.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Prints the validation result to stderr.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            eprintln!();
            eprintln!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                eprintln!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            eprintln!();
            eprintln!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                eprintln!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            eprintln!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration before a run.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_tenant(config, &mut result);
        Self::validate_credentials(config, &mut result);
        Self::validate_scan(config, &mut result);
        Self::validate_output(config, &mut result);

        result
    }

    fn validate_tenant(config: &AppConfig, result: &mut ValidationResult) {
        if config.tenant.tenant_id.trim().is_empty() {
            result.add_error(
                "Missing required config: tenant.tenant_id. Set it in the config file \
                 or through TS_TENANT_ID.",
            );
        }
        if config.tenant.tenant_name.trim().is_empty() {
            result.add_error(
                "Missing required config: tenant.tenant_name (the 'contoso' in \
                 contoso.sharepoint.com). Set it in the config file or through TS_TENANT_NAME.",
            );
        } else if config.tenant.tenant_name.contains('.') {
            result.add_warning(format!(
                "tenant.tenant_name '{}' looks like a domain; expected the short name only.",
                config.tenant.tenant_name
            ));
        }
    }

    fn validate_credentials(config: &AppConfig, result: &mut ValidationResult) {
        let tenant = &config.tenant;

        if !tenant.client_id.is_empty() && tenant.client_secret.is_empty() {
            result.add_warning(
                "tenant.client_id is set but no client secret was given (TS_CLIENT_SECRET).",
            );
        }

        if tenant.access_token.is_empty() && !tenant.has_client_credentials() {
            result.add_error(
                "Missing Graph credentials. Provide tenant.client_id and TS_CLIENT_SECRET, \
                 or an access token through TS_ACCESS_TOKEN.",
            );
        }

        if tenant.sharepoint_token.is_empty() {
            if tenant.has_client_credentials() {
                result.add_warning(
                    "SharePoint will use client-secret app-only auth, which many tenants reject. \
                     Set TS_SHAREPOINT_TOKEN if site checks fail with 401.",
                );
            } else {
                result.add_error(
                    "Missing SharePoint credentials. Provide client credentials or \
                     TS_SHAREPOINT_TOKEN.",
                );
            }
        }
    }

    fn validate_scan(config: &AppConfig, result: &mut ValidationResult) {
        let scan = &config.scan;

        if scan.concurrency == 0 {
            result.add_error("scan.concurrency must be at least 1.");
        } else if scan.concurrency > HIGH_CONCURRENCY {
            result.add_warning(format!(
                "scan.concurrency is {}. Values above {} are likely to be throttled by SharePoint.",
                scan.concurrency, HIGH_CONCURRENCY
            ));
        }

        if scan.batch_size == 0 {
            result.add_error("scan.batch_size must be at least 1.");
        }

        if scan.stop_after == Some(0) {
            result.add_warning("scan.stop_after is 0; scans will stop before checking any site.");
        }

        for surface in &scan.surfaces {
            if let Err(e) = surface.parse::<PermissionSurface>() {
                result.add_error(format!("scan.surfaces: {}", e));
            }
        }
    }

    fn validate_output(config: &AppConfig, result: &mut ValidationResult) {
        let dir = &config.output.directory;
        if !dir.exists() {
            result.add_warning(format!(
                "Output directory '{}' does not exist; it will be created on first export.",
                dir.display()
            ));
        } else if !dir.is_dir() {
            result.add_error(format!(
                "Output path '{}' exists but is not a directory.",
                dir.display()
            ));
        }
    }
}
