//! Connector trait definitions for tenant-sweep.
//!
//! Two service surfaces are modelled: the directory (Microsoft Graph users,
//! groups and site enumeration) and site permissions (SharePoint groups,
//! site collection administrators and role assignments).

use crate::secure_string::SecureString;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors that can occur in connectors.
///
/// Variants are chosen from HTTP status codes and transport failures, never
/// from the wording of an error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Configuration shared by every HTTP-backed connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name, used in logs.
    pub name: String,
    /// Base URL relative paths are resolved against.
    pub base_url: String,
    pub auth: AuthConfig,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub verify_tls: bool,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    /// A pre-acquired access token.
    BearerToken { token: SecureString },
    /// OAuth2 client credentials (app-only) against the tenant token endpoint.
    OAuth2 {
        client_id: String,
        client_secret: SecureString,
        token_url: String,
        scopes: Vec<String>,
    },
}

impl AuthConfig {
    /// Client-credentials configuration for a Microsoft Entra tenant.
    pub fn entra_client_credentials(
        tenant_id: &str,
        client_id: &str,
        client_secret: SecureString,
        scope: &str,
    ) -> Self {
        AuthConfig::OAuth2 {
            client_id: client_id.to_string(),
            client_secret,
            token_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                tenant_id
            ),
            scopes: vec![scope.to_string()],
        }
    }
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the connector type ("directory", "sites").
    fn connector_type(&self) -> &str;

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;

    async fn test_connection(&self) -> ConnectorResult<bool>;
}

// ============================================================================
// Directory
// ============================================================================

/// A directory account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: String,
    pub user_principal_name: String,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub mail: Option<String>,
    pub account_enabled: Option<bool>,
}

/// A directory group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub id: String,
    pub display_name: String,
    pub mail: Option<String>,
    pub security_enabled: Option<bool>,
}

/// A site known to the tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteRef {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    /// True for OneDrive personal sites.
    pub personal: bool,
}

impl SiteRef {
    /// Whether a site URL points at a OneDrive personal site.
    pub fn is_personal_url(url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        lower.contains("-my.sharepoint.") || lower.contains("/personal/")
    }
}

/// Result of a group membership add.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    Added,
    AlreadyMember,
}

/// Directory connector (Microsoft Graph semantics).
#[async_trait]
pub trait DirectoryConnector: Connector {
    /// Gets a user by UPN or object id.
    async fn get_user(&self, identifier: &str) -> ConnectorResult<DirectoryUser>;

    /// Finds users by exact given name and surname.
    async fn find_users_by_name(
        &self,
        given_name: &str,
        surname: &str,
    ) -> ConnectorResult<Vec<DirectoryUser>>;

    /// Lists the groups a user is a direct member of.
    async fn list_user_groups(&self, user_id: &str) -> ConnectorResult<Vec<DirectoryGroup>>;

    async fn is_group_member(&self, group_id: &str, user_id: &str) -> ConnectorResult<bool>;

    /// Adds a user to a group. Existing membership is reported, not treated as an error.
    async fn add_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ConnectorResult<MembershipChange>;

    async fn remove_group_member(&self, group_id: &str, user_id: &str) -> ConnectorResult<()>;

    async fn set_account_enabled(&self, user_id: &str, enabled: bool) -> ConnectorResult<()>;

    /// Invalidates refresh tokens and session cookies for a user.
    async fn revoke_sessions(&self, user_id: &str) -> ConnectorResult<()>;

    /// Enumerates tenant sites, optionally including OneDrive personal sites.
    async fn list_sites(&self, include_personal: bool) -> ConnectorResult<Vec<SiteRef>>;
}

// ============================================================================
// Site permissions
// ============================================================================

/// Where on a site a principal holds access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSurface {
    GroupMembership,
    SiteCollectionAdmin,
    SiteRoleAssignment,
    LibraryRoleAssignment,
}

impl PermissionSurface {
    /// Fixed order in which a site is checked.
    pub const ALL: [PermissionSurface; 4] = [
        PermissionSurface::GroupMembership,
        PermissionSurface::SiteCollectionAdmin,
        PermissionSurface::SiteRoleAssignment,
        PermissionSurface::LibraryRoleAssignment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionSurface::GroupMembership => "group_membership",
            PermissionSurface::SiteCollectionAdmin => "site_collection_admin",
            PermissionSurface::SiteRoleAssignment => "site_role_assignment",
            PermissionSurface::LibraryRoleAssignment => "library_role_assignment",
        }
    }
}

impl fmt::Display for PermissionSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionSurface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "group_membership" | "groups" => Ok(PermissionSurface::GroupMembership),
            "site_collection_admin" | "admin" | "admins" => {
                Ok(PermissionSurface::SiteCollectionAdmin)
            }
            "site_role_assignment" | "site_roles" => Ok(PermissionSurface::SiteRoleAssignment),
            "library_role_assignment" | "library_roles" | "libraries" => {
                Ok(PermissionSurface::LibraryRoleAssignment)
            }
            other => Err(format!("Unknown permission surface: {}", other)),
        }
    }
}

/// A user as seen by one site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SitePrincipal {
    /// Site-local numeric user id.
    pub id: i64,
    /// Claims login, e.g. `i:0#.f|membership|user@contoso.com`.
    pub login_name: String,
    pub title: String,
    pub email: Option<String>,
    pub is_site_admin: bool,
}

/// What to call to undo a grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevokeTarget {
    GroupMember { group_id: i64, user_id: i64 },
    SiteAdmin { user_id: i64 },
    SiteRole { principal_id: i64, role_ids: Vec<i64> },
    LibraryRole {
        list_id: String,
        principal_id: i64,
        role_ids: Vec<i64>,
    },
}

/// One place where a principal holds access on a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionGrant {
    pub site_url: String,
    pub surface: PermissionSurface,
    /// Group title, library title, or the site itself.
    pub container: String,
    pub principal_login: String,
    /// Role names (e.g. "Full Control", "Edit").
    pub roles: Vec<String>,
    pub target: RevokeTarget,
}

impl PermissionGrant {
    /// Human readable description used in prompts and reports.
    pub fn describe(&self) -> String {
        match self.surface {
            PermissionSurface::GroupMembership => format!("member of group '{}'", self.container),
            PermissionSurface::SiteCollectionAdmin => "site collection administrator".to_string(),
            PermissionSurface::SiteRoleAssignment => {
                format!("direct site role [{}]", self.roles.join(", "))
            }
            PermissionSurface::LibraryRoleAssignment => format!(
                "library '{}' role [{}]",
                self.container,
                self.roles.join(", ")
            ),
        }
    }
}

/// Site permission connector (SharePoint semantics).
///
/// Every call is scoped to one absolute site URL; implementations must be
/// safe to call concurrently for different sites.
#[async_trait]
pub trait SiteConnector: Connector {
    /// Resolves a login on a site. `Ok(None)` means the principal has never
    /// been seen by the site, which is not an error.
    async fn resolve_principal(
        &self,
        site_url: &str,
        login: &str,
    ) -> ConnectorResult<Option<SitePrincipal>>;

    async fn group_memberships(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>>;

    async fn site_admin_grant(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Option<PermissionGrant>>;

    async fn site_role_grants(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>>;

    /// Role grants on document libraries with unique permissions.
    async fn library_role_grants(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>>;

    /// Removes a previously found grant.
    async fn revoke(&self, grant: &PermissionGrant) -> ConnectorResult<()>;
}
