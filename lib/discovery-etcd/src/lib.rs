//! etcd v2 coordination store integration
pub mod client;
pub mod store;

pub use client::{EtcdClient, EtcdError};
