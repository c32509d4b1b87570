//! Mock site permission connector for testing.
//!
//! Sites that were never registered behave as empty sites on which the
//! principal is unknown. Failures, removal rejections and latency can be
//! injected per site, and the connector records how many calls were in
//! flight at once.

use crate::sites::sharepoint::to_claims_login;
use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, PermissionGrant,
    PermissionSurface, RevokeTarget, SiteConnector, SitePrincipal,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct MockSite {
    principals: HashMap<String, SitePrincipal>,
    grants: Vec<PermissionGrant>,
    next_id: i64,
}

#[derive(Default)]
struct SitesState {
    sites: HashMap<String, MockSite>,
    scan_failures: HashMap<String, ConnectorError>,
    revoke_failures: HashMap<String, ConnectorError>,
    panicking: HashSet<String>,
    visits: HashMap<String, usize>,
    revoked: Vec<PermissionGrant>,
}

pub struct MockSiteConnector {
    name: String,
    state: Arc<RwLock<SitesState>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight gauge when a call finishes.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_ascii_lowercase()
}

impl MockSiteConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(SitesState::default())),
            latency: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers a grant for `login` on a site, creating the principal if needed.
    pub async fn add_grant(
        &self,
        site_url: &str,
        login: &str,
        surface: PermissionSurface,
        container: &str,
    ) -> PermissionGrant {
        let mut state = self.state.write().await;
        let site = state.sites.entry(normalize(site_url)).or_default();
        let claims = to_claims_login(login);

        let principal_id = match site.principals.get(&claims) {
            Some(p) => p.id,
            None => {
                site.next_id += 1;
                let principal = SitePrincipal {
                    id: site.next_id,
                    login_name: claims.clone(),
                    title: login.to_string(),
                    email: Some(login.to_string()),
                    is_site_admin: false,
                };
                site.principals.insert(claims.clone(), principal);
                site.next_id
            }
        };

        let grant_index = site.grants.len() as i64 + 1;
        let (roles, target) = match surface {
            PermissionSurface::GroupMembership => (
                Vec::new(),
                RevokeTarget::GroupMember {
                    group_id: grant_index,
                    user_id: principal_id,
                },
            ),
            PermissionSurface::SiteCollectionAdmin => {
                if let Some(p) = site.principals.get_mut(&claims) {
                    p.is_site_admin = true;
                }
                (
                    vec!["Site Collection Administrator".to_string()],
                    RevokeTarget::SiteAdmin {
                        user_id: principal_id,
                    },
                )
            }
            PermissionSurface::SiteRoleAssignment => (
                vec!["Edit".to_string()],
                RevokeTarget::SiteRole {
                    principal_id,
                    role_ids: vec![1073741830],
                },
            ),
            PermissionSurface::LibraryRoleAssignment => (
                vec!["Read".to_string()],
                RevokeTarget::LibraryRole {
                    list_id: format!("list-{}", grant_index),
                    principal_id,
                    role_ids: vec![1073741826],
                },
            ),
        };

        let grant = PermissionGrant {
            site_url: site_url.to_string(),
            surface,
            container: container.to_string(),
            principal_login: claims,
            roles,
            target,
        };
        site.grants.push(grant.clone());
        grant
    }

    /// Every permission check on `site_url` fails with `error`.
    pub async fn fail_site(&self, site_url: &str, error: ConnectorError) {
        self.state
            .write()
            .await
            .scan_failures
            .insert(normalize(site_url), error);
    }

    /// Principal resolution on `site_url` panics, taking its task down.
    pub async fn panic_on_site(&self, site_url: &str) {
        self.state
            .write()
            .await
            .panicking
            .insert(normalize(site_url));
    }

    /// Every removal on `site_url` fails with `error`.
    pub async fn reject_revoke(&self, site_url: &str, error: ConnectorError) {
        self.state
            .write()
            .await
            .revoke_failures
            .insert(normalize(site_url), error);
    }

    /// Number of times a site was scanned (principal resolutions).
    pub async fn visits(&self, site_url: &str) -> usize {
        self.state
            .read()
            .await
            .visits
            .get(&normalize(site_url))
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_visits(&self) -> usize {
        self.state.read().await.visits.values().sum()
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn revoked(&self) -> Vec<PermissionGrant> {
        self.state.read().await.revoked.clone()
    }

    pub async fn remaining_grants(&self, site_url: &str) -> Vec<PermissionGrant> {
        self.state
            .read()
            .await
            .sites
            .get(&normalize(site_url))
            .map(|s| s.grants.clone())
            .unwrap_or_default()
    }

    async fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(self.in_flight.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }

    async fn check_scan_failure(&self, site_url: &str) -> ConnectorResult<()> {
        match self.state.read().await.scan_failures.get(&normalize(site_url)) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn grants_for(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
        surface: PermissionSurface,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        let _guard = self.enter().await;
        self.check_scan_failure(site_url).await?;
        Ok(self
            .state
            .read()
            .await
            .sites
            .get(&normalize(site_url))
            .map(|s| {
                s.grants
                    .iter()
                    .filter(|g| g.surface == surface && g.principal_login == principal.login_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Connector for MockSiteConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "sites"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(ConnectorHealth::Healthy)
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl SiteConnector for MockSiteConnector {
    async fn resolve_principal(
        &self,
        site_url: &str,
        login: &str,
    ) -> ConnectorResult<Option<SitePrincipal>> {
        let _guard = self.enter().await;
        let key = normalize(site_url);
        let panics = {
            let mut state = self.state.write().await;
            *state.visits.entry(key.clone()).or_insert(0) += 1;
            state.panicking.contains(&key)
        };
        if panics {
            panic!("injected panic for {}", site_url);
        }
        self.check_scan_failure(site_url).await?;

        let claims = to_claims_login(login);
        Ok(self
            .state
            .read()
            .await
            .sites
            .get(&key)
            .and_then(|s| s.principals.get(&claims).cloned()))
    }

    async fn group_memberships(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        self.grants_for(site_url, principal, PermissionSurface::GroupMembership)
            .await
    }

    async fn site_admin_grant(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Option<PermissionGrant>> {
        Ok(self
            .grants_for(site_url, principal, PermissionSurface::SiteCollectionAdmin)
            .await?
            .into_iter()
            .next())
    }

    async fn site_role_grants(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        self.grants_for(site_url, principal, PermissionSurface::SiteRoleAssignment)
            .await
    }

    async fn library_role_grants(
        &self,
        site_url: &str,
        principal: &SitePrincipal,
    ) -> ConnectorResult<Vec<PermissionGrant>> {
        self.grants_for(site_url, principal, PermissionSurface::LibraryRoleAssignment)
            .await
    }

    async fn revoke(&self, grant: &PermissionGrant) -> ConnectorResult<()> {
        let _guard = self.enter().await;
        let key = normalize(&grant.site_url);
        let mut state = self.state.write().await;
        if let Some(e) = state.revoke_failures.get(&key) {
            return Err(e.clone());
        }

        let site = state
            .sites
            .get_mut(&key)
            .ok_or_else(|| ConnectorError::NotFound(format!("Site not found: {}", grant.site_url)))?;
        let position = site
            .grants
            .iter()
            .position(|g| g == grant)
            .ok_or_else(|| ConnectorError::NotFound("Grant no longer present".to_string()))?;
        let removed = site.grants.remove(position);
        if removed.surface == PermissionSurface::SiteCollectionAdmin {
            if let Some(p) = site.principals.get_mut(&removed.principal_login) {
                p.is_site_admin = false;
            }
        }
        state.revoked.push(removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://contoso.sharepoint.com/sites/hr";

    #[tokio::test]
    async fn test_unknown_site_has_no_principal() {
        let mock = MockSiteConnector::new("mock");
        let principal = mock
            .resolve_principal("https://contoso.sharepoint.com/sites/none", "a@contoso.com")
            .await
            .unwrap();
        assert!(principal.is_none());
        assert_eq!(mock.total_visits().await, 1);
    }

    #[tokio::test]
    async fn test_grants_are_found_and_revoked() {
        let mock = MockSiteConnector::new("mock");
        let grant = mock
            .add_grant(SITE, "A@Contoso.com", PermissionSurface::SiteCollectionAdmin, "hr")
            .await;

        let principal = mock
            .resolve_principal(SITE, "a@contoso.com")
            .await
            .unwrap()
            .unwrap();
        assert!(principal.is_site_admin);
        assert!(mock.site_admin_grant(SITE, &principal).await.unwrap().is_some());

        mock.revoke(&grant).await.unwrap();
        assert!(mock.remaining_grants(SITE).await.is_empty());
        assert_eq!(mock.revoked().await.len(), 1);

        let err = mock.revoke(&grant).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_scan_failure() {
        let mock = MockSiteConnector::new("mock");
        mock.fail_site(SITE, ConnectorError::AuthorizationDenied("denied".into()))
            .await;
        let err = mock.resolve_principal(SITE, "a@contoso.com").await.unwrap_err();
        assert!(matches!(err, ConnectorError::AuthorizationDenied(_)));
    }
}
