//! Configuration loading for the tenant-sweep CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use ts_connectors::{
    AuthConfig, ConnectorConfig, GraphConfig, SecureString, SharePointConfig,
};

const REDACTED: &str = "***REDACTED***";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tenant identity and credentials.
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Scan defaults, overridable per run.
    #[serde(default)]
    pub scan: ScanConfig,

    /// HTTP behaviour shared by both connectors.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Where reports and audit logs are written.
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Entra tenant id (GUID or primary domain).
    #[serde(default)]
    pub tenant_id: String,

    /// Short tenant name, the `contoso` in `contoso.sharepoint.com`.
    #[serde(default)]
    pub tenant_name: String,

    /// App registration used for client-credentials auth.
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Pre-acquired Graph access token; takes precedence over client credentials.
    #[serde(default)]
    pub access_token: String,

    /// Pre-acquired SharePoint access token.
    #[serde(default)]
    pub sharepoint_token: String,
}

impl TenantConfig {
    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Stop dispatching after this many matches.
    #[serde(default)]
    pub stop_after: Option<usize>,

    #[serde(default)]
    pub fail_loud: bool,

    #[serde(default)]
    pub include_onedrive: bool,

    /// Permission surfaces to check; empty means all.
    #[serde(default)]
    pub surfaces: Vec<String>,
}

fn default_concurrency() -> usize {
    10
}

fn default_batch_size() -> usize {
    100
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            stop_after: None,
            fail_loud: false,
            include_onedrive: false,
            surfaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base URL overrides, used against test tenants and proxies.
    #[serde(default)]
    pub graph_base_url: String,

    #[serde(default)]
    pub sharepoint_base_url: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            graph_base_url: String::new(),
            sharepoint_base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// Write the audit trail as JSON lines next to the reports.
    #[serde(default = "default_true")]
    pub audit_log: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            audit_log: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub json_format: bool,
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Applies `TS_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let tenant = &mut self.tenant;
        let fields: [(&str, &mut String); 6] = [
            ("TS_TENANT_ID", &mut tenant.tenant_id),
            ("TS_TENANT_NAME", &mut tenant.tenant_name),
            ("TS_CLIENT_ID", &mut tenant.client_id),
            ("TS_CLIENT_SECRET", &mut tenant.client_secret),
            ("TS_ACCESS_TOKEN", &mut tenant.access_token),
            ("TS_SHAREPOINT_TOKEN", &mut tenant.sharepoint_token),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();
        for secret in [
            &mut config.tenant.client_secret,
            &mut config.tenant.access_token,
            &mut config.tenant.sharepoint_token,
        ] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        config
    }

    fn connector_config(&self, name: &str, base_url: &str, auth: AuthConfig) -> ConnectorConfig {
        ConnectorConfig {
            name: name.to_string(),
            base_url: base_url.to_string(),
            auth,
            timeout_secs: self.connection.timeout_secs,
            max_retries: self.connection.max_retries,
            verify_tls: true,
            headers: HashMap::new(),
        }
    }

    fn auth_for(&self, token: &str, scope: &str) -> AuthConfig {
        let tenant = &self.tenant;
        if !token.is_empty() {
            AuthConfig::BearerToken {
                token: SecureString::from(token),
            }
        } else if tenant.has_client_credentials() {
            AuthConfig::entra_client_credentials(
                &tenant.tenant_id,
                &tenant.client_id,
                SecureString::from(tenant.client_secret.as_str()),
                scope,
            )
        } else {
            AuthConfig::None
        }
    }

    pub fn graph_config(&self) -> GraphConfig {
        let auth = self.auth_for(&self.tenant.access_token, GRAPH_SCOPE);
        GraphConfig {
            connector: self.connector_config("graph", &self.connection.graph_base_url, auth),
            tenant_id: self.tenant.tenant_id.clone(),
            page_size: 999,
        }
    }

    pub fn sharepoint_config(&self) -> SharePointConfig {
        let scope = SharePointConfig::default_scope(&self.tenant.tenant_name);
        let auth = self.auth_for(&self.tenant.sharepoint_token, &scope);
        SharePointConfig {
            connector: self.connector_config(
                "sharepoint",
                &self.connection.sharepoint_base_url,
                auth,
            ),
            tenant_name: self.tenant.tenant_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scan.concurrency, 10);
        assert_eq!(config.scan.batch_size, 100);
        assert_eq!(config.output.directory, PathBuf::from("reports"));
        assert!(matches!(config.graph_config().connector.auth, AuthConfig::None));
    }

    #[test]
    fn test_redact_secrets() {
        let mut config = AppConfig::default();
        config.tenant.client_id = "app-1".to_string();
        config.tenant.client_secret = "secret-value".to_string();
        config.tenant.sharepoint_token = "sp-token".to_string();

        let redacted = config.redact_secrets();
        assert_eq!(redacted.tenant.client_secret, REDACTED);
        assert_eq!(redacted.tenant.sharepoint_token, REDACTED);
        assert_eq!(redacted.tenant.access_token, "");
        assert_eq!(redacted.tenant.client_id, "app-1");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.tenant.tenant_id = "from-file".to_string();

        let env: HashMap<&str, &str> = [
            ("TS_TENANT_ID", "from-env"),
            ("TS_CLIENT_SECRET", "s3cret"),
            ("TS_ACCESS_TOKEN", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.tenant.tenant_id, "from-env");
        assert_eq!(config.tenant.client_secret, "s3cret");
        assert_eq!(config.tenant.access_token, "");
    }

    #[test]
    fn test_auth_selection() {
        let mut config = AppConfig::default();
        config.tenant.tenant_id = "tenant-1".to_string();
        config.tenant.tenant_name = "contoso".to_string();
        config.tenant.client_id = "app-1".to_string();
        config.tenant.client_secret = "secret".to_string();
        config.tenant.sharepoint_token = "sp-token".to_string();

        match config.graph_config().connector.auth {
            AuthConfig::OAuth2 { scopes, .. } => assert_eq!(scopes, vec![GRAPH_SCOPE]),
            other => panic!("expected OAuth2, got {:?}", other),
        }
        assert!(matches!(
            config.sharepoint_config().connector.auth,
            AuthConfig::BearerToken { .. }
        ));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
tenant:
  tenant_id: 7f1c0000-0000-0000-0000-000000000000
  tenant_name: contoso
  client_id: app-1
scan:
  concurrency: 25
  stop_after: 3
  surfaces: [groups, admins]
output:
  directory: /var/reports/sweep
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tenant.tenant_name, "contoso");
        assert_eq!(config.scan.concurrency, 25);
        assert_eq!(config.scan.batch_size, 100);
        assert_eq!(config.scan.stop_after, Some(3));
        assert_eq!(config.scan.surfaces.len(), 2);
        assert!(config.output.audit_log);
    }
}
