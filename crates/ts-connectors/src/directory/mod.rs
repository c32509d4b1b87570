//! Directory connectors (users, groups, sites).

pub mod graph;
pub mod mock;

pub use graph::{GraphConfig, GraphDirectoryConnector};
pub use mock::MockDirectoryConnector;
