//! Site permission connectors.

pub mod mock;
pub mod sharepoint;

pub use mock::MockSiteConnector;
pub use sharepoint::{SharePointConfig, SharePointConnector};
