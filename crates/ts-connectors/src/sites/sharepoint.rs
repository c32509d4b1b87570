//! SharePoint Online site permission connector.
//!
//! Uses the per-site `_api` REST endpoints with `odata=nometadata` JSON.
//! Every call takes an absolute site URL, so one connector serves every
//! site collection in the tenant (including OneDrive personal sites).

use crate::http::HttpClient;
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    PermissionGrant, PermissionSurface, RevokeTarget, SiteConnector, SitePrincipal,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const NOMETADATA: &str = "application/json;odata=nometadata";
/// Role that SharePoint grants implicitly; removing it is neither useful nor allowed.
const LIMITED_ACCESS_ROLE: &str = "Limited Access";
/// BaseTemplate of document libraries.
const DOCUMENT_LIBRARY_TEMPLATE: u32 = 101;

/// SharePoint-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharePointConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    /// Tenant short name, the `contoso` in `contoso.sharepoint.com`.
    pub tenant_name: String,
}

impl SharePointConfig {
    pub fn root_url(tenant_name: &str) -> String {
        format!("https://{}.sharepoint.com", tenant_name)
    }

    /// App-only scope for the tenant's SharePoint resource.
    pub fn default_scope(tenant_name: &str) -> String {
        format!("{}/.default", Self::root_url(tenant_name))
    }
}

/// Site permission connector backed by SharePoint REST.
pub struct SharePointConnector {
    config: SharePointConfig,
    client: HttpClient,
}

impl SharePointConnector {
    pub fn new(config: SharePointConfig) -> ConnectorResult<Self> {
        let mut connector_config = config.connector.clone();
        if connector_config.base_url.is_empty() {
            connector_config.base_url = SharePointConfig::root_url(&config.tenant_name);
        }
        connector_config
            .headers
            .entry("Accept".to_string())
            .or_insert_with(|| NOMETADATA.to_string());

        let client = HttpClient::new(connector_config)?;

        info!(tenant = %config.tenant_name, "SharePoint connector initialized");

        Ok(Self { config, client })
    }

    async fn remove_role_bindings(
        &self,
        scope_path: &str,
        principal_id: i64,
        role_ids: &[i64],
    ) -> ConnectorResult<()> {
        for role_id in role_ids {
            let path = format!(
                "{}/roleassignments/removeroleassignment(principalid={},roledefid={})",
                scope_path, principal_id, role_id
            );
            self.client.post_empty(&path).await?;
        }
        Ok(())
    }
}

/// Joins a site URL and an `_api` relative path.
pub fn site_api(site_url: &str, rest: &str) -> String {
    format!(
        "{}/_api/{}",
        site_url.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}

/// Converts a UPN to the SharePoint claims login; claims logins pass through.
pub fn to_claims_login(login: &str) -> String {
    if login.contains('|') {
        login.to_string()
    } else {
        format!("i:0#.f|membership|{}", login.trim().to_lowercase())
    }
}

/// Splits role bindings into ids and names, dropping Limited Access.
fn removable_roles(bindings: &[SpRoleDefinition]) -> (Vec<i64>, Vec<String>) {
    bindings
        .iter()
        .filter(|b| b.name != LIMITED_ACCESS_ROLE)
        .map(|b| (b.id, b.name.clone()))
        .unzip()
}

#[async_trait]
impl Connector for SharePointConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "sites"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        let path = site_api(self.client.base_url(), "web?$select=Title");
        match self.client.get(&path).await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(ConnectorError::AuthenticationFailed(e)) => Ok(ConnectorHealth::Unhealthy(
                format!("Authentication failed: {}", e),
            )),
            Err(ConnectorError::RateLimited(_)) => {
                Ok(ConnectorHealth::Degraded("Rate limited".to_string()))
            }
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let path = site_api(self.client.base_url(), "web?$select=Title");
        self.client.get(&path).await?;
        Ok(true)
    }
}

#[async_trait]
impl SiteConnector for SharePointConnector {
    #[instrument(skip(self))]
    async fn resolve_principal(
        &self,
        site_url: &str,
        login: &str,
    ) -> ConnectorResult<Option<SitePrincipal>> {
        let claims = to_claims_login(login);
        let path = site_api(
            site_url,
            &format!(
                "web/siteusers(@v)?@v='{}'&$select=Id,LoginName,Title,Email,IsSiteAdmin",
                urlencoding::encode(&claims.replace('\'', "''"))
            ),
        );

        match self.client.get_json::<SpUser>(&path).await {
            Ok(user) => Ok(Some(user.into())),
            Err(ConnectorError::NotFound(_)) => {
                debug!("Principal not present on site");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn group_memberships(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        let path = site_api(
            site_url,
            &format!("web/GetUserById({})/Groups?$select=Id,Title", principal.id),
        );
        let groups: SpCollection<SpGroup> = self.client.get_json(&path).await?;

        Ok(groups
            .value
            .into_iter()
            .map(|g| PermissionGrant {
                site_url: site_url.to_string(),
                surface: PermissionSurface::GroupMembership,
                container: g.title,
                principal_login: principal.login_name.clone(),
                roles: Vec::new(),
                target: RevokeTarget::GroupMember {
                    group_id: g.id,
                    user_id: principal.id,
                },
            })
            .collect())
    }

    async fn site_admin_grant(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Option<PermissionGrant>> {
        // IsSiteAdmin comes back with the principal lookup; no extra round trip.
        if !principal.is_site_admin {
            return Ok(None);
        }
        Ok(Some(PermissionGrant {
            site_url: site_url.to_string(),
            surface: PermissionSurface::SiteCollectionAdmin,
            container: site_url.to_string(),
            principal_login: principal.login_name.clone(),
            roles: vec!["Site Collection Administrator".to_string()],
            target: RevokeTarget::SiteAdmin {
                user_id: principal.id,
            },
        }))
    }

    async fn site_role_grants(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        let path = site_api(
            site_url,
            &format!(
                "web/roleassignments?$expand=RoleDefinitionBindings&$filter=PrincipalId eq {}",
                principal.id
            ),
        );
        let assignments: SpCollection<SpRoleAssignment> = self.client.get_json(&path).await?;

        Ok(assignments
            .value
            .into_iter()
            .filter(|a| a.principal_id == principal.id)
            .filter_map(|a| {
                let (role_ids, roles) = removable_roles(&a.role_definition_bindings);
                if role_ids.is_empty() {
                    return None;
                }
                Some(PermissionGrant {
                    site_url: site_url.to_string(),
                    surface: PermissionSurface::SiteRoleAssignment,
                    container: site_url.to_string(),
                    principal_login: principal.login_name.clone(),
                    roles,
                    target: RevokeTarget::SiteRole {
                        principal_id: principal.id,
                        role_ids,
                    },
                })
            })
            .collect())
    }

    async fn library_role_grants(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        let lists_path = site_api(
            site_url,
            &format!(
                "web/lists?$select=Id,Title,HasUniqueRoleAssignments&$filter=BaseTemplate eq {} and Hidden eq false",
                DOCUMENT_LIBRARY_TEMPLATE
            ),
        );
        let lists: SpCollection<SpList> = self.client.get_json(&lists_path).await?;

        let mut grants = Vec::new();
        for list in lists.value.into_iter().filter(|l| l.has_unique_role_assignments) {
            let path = site_api(
                site_url,
                &format!(
                    "web/lists(guid'{}')/roleassignments?$expand=RoleDefinitionBindings&$filter=PrincipalId eq {}",
                    list.id, principal.id
                ),
            );
            let assignments: SpCollection<SpRoleAssignment> = self.client.get_json(&path).await?;

            for assignment in assignments
                .value
                .into_iter()
                .filter(|a| a.principal_id == principal.id)
            {
                let (role_ids, roles) = removable_roles(&assignment.role_definition_bindings);
                if role_ids.is_empty() {
                    continue;
                }
                grants.push(PermissionGrant {
                    site_url: site_url.to_string(),
                    surface: PermissionSurface::LibraryRoleAssignment,
                    container: list.title.clone(),
                    principal_login: principal.login_name.clone(),
                    roles,
                    target: RevokeTarget::LibraryRole {
                        list_id: list.id.clone(),
                        principal_id: principal.id,
                        role_ids,
                    },
                });
            }
        }

        Ok(grants)
    }

    #[instrument(skip(self, grant), fields(site = %grant.site_url, surface = %grant.surface))]
    async fn revoke(&self, grant: &PermissionGrant) -> ConnectorResult<()> {
        let site = grant.site_url.as_str();
        match &grant.target {
            RevokeTarget::GroupMember { group_id, user_id } => {
                let path = site_api(
                    site,
                    &format!("web/sitegroups({})/users/removebyid({})", group_id, user_id),
                );
                self.client.post_empty(&path).await?;
            }
            RevokeTarget::SiteAdmin { user_id } => {
                let path = site_api(site, &format!("web/GetUserById({})", user_id));
                let body = serde_json::json!({ "IsSiteAdmin": false });
                self.client
                    .post_with_headers(
                        &path,
                        &body,
                        &[("X-HTTP-Method", "MERGE"), ("IF-MATCH", "*")],
                    )
                    .await?;
            }
            RevokeTarget::SiteRole {
                principal_id,
                role_ids,
            } => {
                let scope = site_api(site, "web");
                self.remove_role_bindings(&scope, *principal_id, role_ids)
                    .await?;
            }
            RevokeTarget::LibraryRole {
                list_id,
                principal_id,
                role_ids,
            } => {
                let scope = site_api(site, &format!("web/lists(guid'{}')", list_id));
                self.remove_role_bindings(&scope, *principal_id, role_ids)
                    .await?;
            }
        }

        info!(description = %grant.describe(), "Revoked permission");
        Ok(())
    }
}

// SharePoint REST response types (odata=nometadata)

#[derive(Debug, Deserialize)]
struct SpCollection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpUser {
    id: i64,
    login_name: String,
    #[serde(default)]
    title: String,
    email: Option<String>,
    #[serde(default)]
    is_site_admin: bool,
}

impl From<SpUser> for SitePrincipal {
    fn from(u: SpUser) -> Self {
        SitePrincipal {
            id: u.id,
            login_name: u.login_name,
            title: u.title,
            email: u.email.filter(|e| !e.is_empty()),
            is_site_admin: u.is_site_admin,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpGroup {
    id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpRoleAssignment {
    principal_id: i64,
    #[serde(default)]
    role_definition_bindings: Vec<SpRoleDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpRoleDefinition {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpList {
    id: String,
    title: String,
    #[serde(default)]
    has_unique_role_assignments: bool,
}
