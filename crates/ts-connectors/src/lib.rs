//! # ts-connectors
//!
//! Connectors for the Microsoft 365 services tenant-sweep talks to: the
//! directory (Microsoft Graph) and site permissions (SharePoint REST).
//!
//! This crate provides the trait definitions, the HTTP implementations and
//! in-memory mocks used by the test suites.

pub mod directory;
pub mod http;
pub mod secure_string;
pub mod sites;
pub mod testing;
pub mod traits;

pub use secure_string::SecureString;

// Re-export traits
pub use traits::{
    AuthConfig,
    Connector,
    ConnectorConfig,
    ConnectorError,
    ConnectorHealth,
    ConnectorResult,
    // Directory
    DirectoryConnector,
    DirectoryGroup,
    DirectoryUser,
    MembershipChange,
    // Site permissions
    PermissionGrant,
    PermissionSurface,
    RevokeTarget,
    SiteConnector,
    SitePrincipal,
    SiteRef,
};

// Re-export connector implementations
pub use directory::{GraphConfig, GraphDirectoryConnector, MockDirectoryConnector};
pub use http::{HttpClient, RateLimitConfig};
pub use sites::{MockSiteConnector, SharePointConfig, SharePointConnector};
