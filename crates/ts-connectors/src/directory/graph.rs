//! Microsoft Graph directory connector.
//!
//! Users, group membership, account state and site enumeration through
//! the Graph v1.0 REST API.

use crate::http::{HttpClient, RateLimitConfig};
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    DirectoryConnector, DirectoryGroup, DirectoryUser, MembershipChange, SiteRef,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

const USER_SELECT: &str = "id,userPrincipalName,displayName,givenName,surname,mail,accountEnabled";
const GROUP_SELECT: &str = "id,displayName,mail,securityEnabled";

/// Graph-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub tenant_id: String,
    /// `$top` used for collection requests.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    999
}

/// Directory connector backed by Microsoft Graph.
pub struct GraphDirectoryConnector {
    config: GraphConfig,
    client: HttpClient,
}

impl GraphDirectoryConnector {
    pub fn new(config: GraphConfig) -> ConnectorResult<Self> {
        // Graph throttles per app per tenant; stay well under the documented ceilings.
        let rate_limit = RateLimitConfig {
            max_requests: 1200,
            period: Duration::from_secs(60),
            burst_size: 50,
        };

        let mut connector_config = config.connector.clone();
        if connector_config.base_url.is_empty() {
            connector_config.base_url = GRAPH_BASE_URL.to_string();
        }

        let client = HttpClient::with_rate_limit(connector_config, Some(rate_limit))?;

        info!(tenant_id = %config.tenant_id, "Graph directory connector initialized");

        Ok(Self { config, client })
    }

    /// Follows `@odata.nextLink` until the collection is exhausted.
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let page: GraphPage<T> = self.client.get_json(&url).await?;
            items.extend(page.value);
            next = page.next_link;
            pages += 1;
        }

        debug!(pages, items = items.len(), "Fetched Graph collection");
        Ok(items)
    }

    fn directory_object_ref(&self, object_id: &str) -> String {
        format!(
            "{}/directoryObjects/{}",
            self.client.base_url().trim_end_matches('/'),
            object_id
        )
    }
}

#[async_trait]
impl Connector for GraphDirectoryConnector {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "directory"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get("/organization?$select=id").await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(ConnectorError::AuthenticationFailed(e)) => Ok(ConnectorHealth::Unhealthy(
                format!("Authentication failed: {}", e),
            )),
            Err(ConnectorError::AuthorizationDenied(_)) => Ok(ConnectorHealth::Unhealthy(
                "Authorization denied - check application permissions".to_string(),
            )),
            Err(ConnectorError::RateLimited(_)) => {
                Ok(ConnectorHealth::Degraded("Rate limited".to_string()))
            }
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.client.get("/organization?$select=id").await?;
        Ok(true)
    }
}

#[async_trait]
impl DirectoryConnector for GraphDirectoryConnector {
    #[instrument(skip(self))]
    async fn get_user(&self, identifier: &str) -> ConnectorResult<DirectoryUser> {
        let path = format!(
            "/users/{}?$select={}",
            urlencoding::encode(identifier),
            USER_SELECT
        );
        match self.client.get_json::<GraphUser>(&path).await {
            Ok(user) => Ok(user.into()),
            Err(ConnectorError::NotFound(_)) => Err(ConnectorError::NotFound(format!(
                "User not found: {}",
                identifier
            ))),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn find_users_by_name(
        &self,
        given_name: &str,
        surname: &str,
    ) -> ConnectorResult<Vec<DirectoryUser>> {
        let filter = build_name_filter(given_name, surname);
        let path = format!(
            "/users?$filter={}&$select={}&$top={}",
            urlencoding::encode(&filter),
            USER_SELECT,
            self.config.page_size
        );
        let users: Vec<GraphUser> = self.get_all(&path).await?;
        Ok(users.into_iter().map(DirectoryUser::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_user_groups(&self, user_id: &str) -> ConnectorResult<Vec<DirectoryGroup>> {
        let path = format!(
            "/users/{}/memberOf/microsoft.graph.group?$select={}&$top={}",
            urlencoding::encode(user_id),
            GROUP_SELECT,
            self.config.page_size
        );
        let groups: Vec<GraphGroup> = self.get_all(&path).await?;
        Ok(groups.into_iter().map(DirectoryGroup::from).collect())
    }

    #[instrument(skip(self))]
    async fn is_group_member(&self, group_id: &str, user_id: &str) -> ConnectorResult<bool> {
        // Direct membership only; checkMemberGroups would also report nested groups.
        let filter = format!("id eq '{}'", escape_odata(user_id));
        let path = format!(
            "/groups/{}/members?$filter={}&$select=id&$count=true",
            urlencoding::encode(group_id),
            urlencoding::encode(&filter)
        );
        let page: GraphPage<GraphObjectId> = self
            .client
            .get_json_with_headers(&path, &[("ConsistencyLevel", "eventual")])
            .await?;
        Ok(page.value.iter().any(|o| o.id.eq_ignore_ascii_case(user_id)))
    }

    #[instrument(skip(self))]
    async fn add_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ConnectorResult<MembershipChange> {
        if self.is_group_member(group_id, user_id).await? {
            debug!("User is already a direct member");
            return Ok(MembershipChange::AlreadyMember);
        }

        let path = format!("/groups/{}/members/$ref", urlencoding::encode(group_id));
        let body = serde_json::json!({ "@odata.id": self.directory_object_ref(user_id) });
        self.client.post(&path, &body).await?;

        info!(group_id, user_id, "Added group member");
        Ok(MembershipChange::Added)
    }

    #[instrument(skip(self))]
    async fn remove_group_member(&self, group_id: &str, user_id: &str) -> ConnectorResult<()> {
        let path = format!(
            "/groups/{}/members/{}/$ref",
            urlencoding::encode(group_id),
            urlencoding::encode(user_id)
        );
        self.client.delete(&path).await?;
        info!(group_id, user_id, "Removed group member");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_account_enabled(&self, user_id: &str, enabled: bool) -> ConnectorResult<()> {
        let path = format!("/users/{}", urlencoding::encode(user_id));
        let body = serde_json::json!({ "accountEnabled": enabled });
        self.client.patch(&path, &body).await?;
        info!(user_id, enabled, "Updated account state");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke_sessions(&self, user_id: &str) -> ConnectorResult<()> {
        let path = format!("/users/{}/revokeSignInSessions", urlencoding::encode(user_id));
        self.client.post_empty(&path).await?;
        info!(user_id, "Revoked sign-in sessions");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_sites(&self, include_personal: bool) -> ConnectorResult<Vec<SiteRef>> {
        let path = format!(
            "/sites/getAllSites?$select=id,webUrl,displayName&$top={}",
            self.config.page_size
        );
        let sites: Vec<GraphSite> = self.get_all(&path).await?;

        let sites: Vec<SiteRef> = sites
            .into_iter()
            .filter_map(|s| {
                let url = s.web_url?;
                let personal = SiteRef::is_personal_url(&url);
                Some(SiteRef {
                    id: s.id.unwrap_or_default(),
                    url,
                    title: s.display_name,
                    personal,
                })
            })
            .filter(|s| include_personal || !s.personal)
            .collect();

        info!(count = sites.len(), include_personal, "Enumerated tenant sites");
        Ok(sites)
    }
}

// Graph API response types

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    #[serde(default)]
    user_principal_name: Option<String>,
    display_name: Option<String>,
    given_name: Option<String>,
    surname: Option<String>,
    mail: Option<String>,
    account_enabled: Option<bool>,
}

impl From<GraphUser> for DirectoryUser {
    fn from(u: GraphUser) -> Self {
        DirectoryUser {
            id: u.id,
            user_principal_name: u.user_principal_name.unwrap_or_default(),
            display_name: u.display_name,
            given_name: u.given_name,
            surname: u.surname,
            mail: u.mail,
            account_enabled: u.account_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphGroup {
    id: String,
    display_name: Option<String>,
    mail: Option<String>,
    security_enabled: Option<bool>,
}

impl From<GraphGroup> for DirectoryGroup {
    fn from(g: GraphGroup) -> Self {
        DirectoryGroup {
            display_name: g.display_name.unwrap_or_else(|| g.id.clone()),
            id: g.id,
            mail: g.mail,
            security_enabled: g.security_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSite {
    id: Option<String>,
    web_url: Option<String>,
    display_name: Option<String>,
}

/// Escapes a literal for use inside an OData single-quoted string.
pub fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

fn build_name_filter(given_name: &str, surname: &str) -> String {
    format!(
        "givenName eq '{}' and surname eq '{}'",
        escape_odata(given_name.trim()),
        escape_odata(surname.trim())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;

    fn connector() -> GraphDirectoryConnector {
        GraphDirectoryConnector::new(GraphConfig {
            connector: test_connector_config("graph-test", ""),
            tenant_id: "contoso".to_string(),
            page_size: 999,
        })
        .unwrap()
    }

    #[test]
    fn test_default_base_url() {
        let c = connector();
        assert_eq!(c.client.base_url(), GRAPH_BASE_URL);
        assert_eq!(
            c.directory_object_ref("abc"),
            "https://graph.microsoft.com/v1.0/directoryObjects/abc"
        );
    }

    #[test]
    fn test_escape_odata() {
        assert_eq!(escape_odata("O'Brien"), "O''Brien");
        assert_eq!(escape_odata("plain"), "plain");
    }

    #[test]
    fn test_build_name_filter() {
        assert_eq!(
            build_name_filter(" Shannon ", "O'Gray"),
            "givenName eq 'Shannon' and surname eq 'O''Gray'"
        );
    }

    #[test]
    fn test_graph_page_parses_next_link() {
        let json = r#"{"value":[{"id":"1"}],"@odata.nextLink":"https://graph.microsoft.com/v1.0/x?$skiptoken=abc"}"#;
        let page: GraphPage<GraphObjectId> = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 1);
        assert!(page.next_link.unwrap().contains("skiptoken"));
    }

    #[test]
    fn test_graph_user_conversion() {
        let json = r#"{"id":"u1","userPrincipalName":"a@b.com","displayName":"A B","accountEnabled":false}"#;
        let user: DirectoryUser = serde_json::from_str::<GraphUser>(json).unwrap().into();
        assert_eq!(user.user_principal_name, "a@b.com");
        assert_eq!(user.account_enabled, Some(false));
        assert!(user.given_name.is_none());
    }
}
