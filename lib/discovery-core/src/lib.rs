//! Client-side service discovery and connection pooling
//!
//! This library provides:
//! - Service registry of live backend endpoints and their connections
//! - Bootstrap scan and change watcher against a coordination store
//! - Round-robin, by-instance and broadcast client selection

pub mod bootstrap;
pub mod config;
pub mod dialer;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod selector;
pub mod store;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::bootstrap;
pub use config::DiscoveryConfig;
pub use dialer::{Channel, Dialer, TcpDialer};
pub use endpoint::Endpoint;
pub use error::{DiscoveryError, Result};
pub use registry::ServiceRegistry;
pub use selector::{ClientFactories, ServiceSelector};
pub use store::{CoordinationStore, Node, WatchEvent};
pub use watcher::Watcher;
