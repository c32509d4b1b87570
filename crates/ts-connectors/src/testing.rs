//! Helpers for connector tests.

use crate::traits::{
    AuthConfig, ConnectorConfig, ConnectorHealth, ConnectorResult, DirectoryUser,
    PermissionGrant, PermissionSurface, RevokeTarget,
};
use std::collections::HashMap;

/// Connector config with no auth and no retries.
pub fn test_connector_config(name: &str, base_url: &str) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        auth: AuthConfig::None,
        timeout_secs: 10,
        max_retries: 0,
        verify_tls: true,
        headers: HashMap::new(),
    }
}

/// Connector config with a static bearer token.
pub fn test_connector_config_with_bearer(
    name: &str,
    base_url: &str,
    token: &str,
) -> ConnectorConfig {
    ConnectorConfig {
        auth: AuthConfig::BearerToken {
            token: crate::SecureString::new(token.to_string()),
        },
        ..test_connector_config(name, base_url)
    }
}

/// A directory user with a UPN derived from the given names.
pub fn sample_user(id: &str, given: &str, surname: &str) -> DirectoryUser {
    let upn = format!(
        "{}.{}@contoso.com",
        given.to_lowercase(),
        surname.to_lowercase().replace(' ', "")
    );
    DirectoryUser {
        id: id.to_string(),
        user_principal_name: upn.clone(),
        display_name: Some(format!("{} {}", given, surname)),
        given_name: Some(given.to_string()),
        surname: Some(surname.to_string()),
        mail: Some(upn),
        account_enabled: Some(true),
    }
}

/// A site admin grant for the given site and login.
pub fn sample_admin_grant(site_url: &str, login: &str) -> PermissionGrant {
    PermissionGrant {
        site_url: site_url.to_string(),
        surface: PermissionSurface::SiteCollectionAdmin,
        container: site_url.to_string(),
        principal_login: login.to_string(),
        roles: vec!["Site Collection Administrator".to_string()],
        target: RevokeTarget::SiteAdmin { user_id: 7 },
    }
}

pub fn assert_healthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Healthy) => {}
        other => panic!("Expected Healthy, got {:?}", other),
    }
}

pub fn assert_unhealthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Unhealthy(_)) => {}
        other => panic!("Expected Unhealthy, got {:?}", other),
    }
}
