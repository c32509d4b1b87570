//! Mock directory connector for testing.

use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, DirectoryConnector,
    DirectoryGroup, DirectoryUser, MembershipChange, SiteRef,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct DirectoryState {
    users: HashMap<String, DirectoryUser>,
    groups: HashMap<String, DirectoryGroup>,
    /// group id -> member user ids
    members: HashMap<String, BTreeSet<String>>,
    sites: Vec<SiteRef>,
    revoked_sessions: Vec<String>,
    /// operation name -> error returned when it is called
    failures: HashMap<String, ConnectorError>,
}

pub struct MockDirectoryConnector {
    name: String,
    state: Arc<RwLock<DirectoryState>>,
}

impl MockDirectoryConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(DirectoryState::default())),
        }
    }

    /// A small tenant: two users, two groups and three sites (one personal).
    pub async fn with_sample_data(name: &str) -> Self {
        let mock = Self::new(name);
        mock.add_user(crate::testing::sample_user("user-001", "John", "Doe"))
            .await;
        mock.add_user(crate::testing::sample_user("user-002", "Jane", "Roe"))
            .await;
        mock.add_group(group("grp-001", "Finance Team")).await;
        mock.add_group(group("grp-002", "All Staff")).await;
        mock.add_member("grp-001", "user-001").await;
        mock.add_member("grp-002", "user-001").await;
        mock.add_member("grp-002", "user-002").await;
        for (id, url) in [
            ("site-1", "https://contoso.sharepoint.com/sites/finance"),
            ("site-2", "https://contoso.sharepoint.com/sites/hr"),
            (
                "site-3",
                "https://contoso-my.sharepoint.com/personal/john_doe_contoso_com",
            ),
        ] {
            mock.add_site(id, url).await;
        }
        mock
    }

    pub async fn add_user(&self, user: DirectoryUser) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn add_group(&self, group: DirectoryGroup) {
        self.state
            .write()
            .await
            .groups
            .insert(group.id.clone(), group);
    }

    pub async fn add_member(&self, group_id: &str, user_id: &str) {
        self.state
            .write()
            .await
            .members
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub async fn add_site(&self, id: &str, url: &str) {
        self.state.write().await.sites.push(SiteRef {
            id: id.to_string(),
            url: url.to_string(),
            title: None,
            personal: SiteRef::is_personal_url(url),
        });
    }

    /// Makes every call to `operation` (the trait method name) fail with `error`.
    pub async fn fail_on(&self, operation: &str, error: ConnectorError) {
        self.state
            .write()
            .await
            .failures
            .insert(operation.to_string(), error);
    }

    pub async fn members_of(&self, group_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .members
            .get(group_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn revoked_sessions(&self) -> Vec<String> {
        self.state.read().await.revoked_sessions.clone()
    }

    async fn check_failure(&self, operation: &str) -> ConnectorResult<()> {
        match self.state.read().await.failures.get(operation) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn require_user(&self, user_id: &str) -> ConnectorResult<()> {
        if self.state.read().await.users.contains_key(user_id) {
            Ok(())
        } else {
            Err(ConnectorError::NotFound(format!("User not found: {}", user_id)))
        }
    }

    async fn require_group(&self, group_id: &str) -> ConnectorResult<()> {
        if self.state.read().await.groups.contains_key(group_id) {
            Ok(())
        } else {
            Err(ConnectorError::NotFound(format!(
                "Group not found: {}",
                group_id
            )))
        }
    }
}

fn group(id: &str, name: &str) -> DirectoryGroup {
    DirectoryGroup {
        id: id.to_string(),
        display_name: name.to_string(),
        mail: None,
        security_enabled: Some(true),
    }
}

#[async_trait]
impl Connector for MockDirectoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "directory"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(ConnectorHealth::Healthy)
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl DirectoryConnector for MockDirectoryConnector {
    async fn get_user(&self, identifier: &str) -> ConnectorResult<DirectoryUser> {
        self.check_failure("get_user").await?;
        let state = self.state.read().await;
        state
            .users
            .get(identifier)
            .or_else(|| {
                state
                    .users
                    .values()
                    .find(|u| u.user_principal_name.eq_ignore_ascii_case(identifier))
            })
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(format!("User not found: {}", identifier)))
    }

    async fn find_users_by_name(
        &self,
        given_name: &str,
        surname: &str,
    ) -> ConnectorResult<Vec<DirectoryUser>> {
        self.check_failure("find_users_by_name").await?;
        let state = self.state.read().await;
        let mut found: Vec<DirectoryUser> = state
            .users
            .values()
            .filter(|u| {
                u.given_name.as_deref() == Some(given_name.trim())
                    && u.surname.as_deref() == Some(surname.trim())
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn list_user_groups(&self, user_id: &str) -> ConnectorResult<Vec<DirectoryGroup>> {
        self.check_failure("list_user_groups").await?;
        self.require_user(user_id).await?;
        let state = self.state.read().await;
        let mut groups: Vec<DirectoryGroup> = state
            .members
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .filter_map(|(gid, _)| state.groups.get(gid).cloned())
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }

    async fn is_group_member(&self, group_id: &str, user_id: &str) -> ConnectorResult<bool> {
        self.check_failure("is_group_member").await?;
        self.require_group(group_id).await?;
        Ok(self
            .state
            .read()
            .await
            .members
            .get(group_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false))
    }

    async fn add_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ConnectorResult<MembershipChange> {
        self.check_failure("add_group_member").await?;
        self.require_group(group_id).await?;
        self.require_user(user_id).await?;
        let inserted = self
            .state
            .write()
            .await
            .members
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(if inserted {
            MembershipChange::Added
        } else {
            MembershipChange::AlreadyMember
        })
    }

    async fn remove_group_member(&self, group_id: &str, user_id: &str) -> ConnectorResult<()> {
        self.check_failure("remove_group_member").await?;
        self.require_group(group_id).await?;
        let removed = self
            .state
            .write()
            .await
            .members
            .get_mut(group_id)
            .map(|m| m.remove(user_id))
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(ConnectorError::NotFound(format!(
                "{} is not a member of {}",
                user_id, group_id
            )))
        }
    }

    async fn set_account_enabled(&self, user_id: &str, enabled: bool) -> ConnectorResult<()> {
        self.check_failure("set_account_enabled").await?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| ConnectorError::NotFound(format!("User not found: {}", user_id)))?;
        user.account_enabled = Some(enabled);
        Ok(())
    }

    async fn revoke_sessions(&self, user_id: &str) -> ConnectorResult<()> {
        self.check_failure("revoke_sessions").await?;
        self.require_user(user_id).await?;
        self.state
            .write()
            .await
            .revoked_sessions
            .push(user_id.to_string());
        Ok(())
    }

    async fn list_sites(&self, include_personal: bool) -> ConnectorResult<Vec<SiteRef>> {
        self.check_failure("list_sites").await?;
        Ok(self
            .state
            .read()
            .await
            .sites
            .iter()
            .filter(|s| include_personal || !s.personal)
            .cloned()
            .collect())
    }
}
