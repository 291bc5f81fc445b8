//! Discovery configuration loaded from the environment

use crate::{DiscoveryError, Result};
use std::time::Duration;

pub const DEFAULT_ETCD: &str = "http://127.0.0.1:2379";
pub const DEFAULT_SERVICE_ROOT: &str = "/backends";
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCH_CAPACITY: usize = 10;

pub const ENV_ETCD_HOST: &str = "ETCD_HOST";
pub const ENV_SERVICE_ROOT: &str = "DISCOVERY_SERVICE_ROOT";
pub const ENV_DIAL_TIMEOUT: &str = "DISCOVERY_DIAL_TIMEOUT_SECS";
pub const ENV_STORE_TIMEOUT: &str = "DISCOVERY_STORE_TIMEOUT_SECS";
pub const ENV_RETRY_DELAY: &str = "DISCOVERY_RETRY_DELAY_SECS";
pub const ENV_WATCH_CAPACITY: &str = "DISCOVERY_WATCH_CAPACITY";

/// Discovery configuration
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveryConfig {
    /// Coordination store endpoints, tried in order
    pub etcd_endpoints: Vec<String>,
    /// Directory holding one subdirectory per service
    pub service_root: String,
    /// Timeout for dialing a single backend endpoint
    pub dial_timeout: Duration,
    /// Timeout for connecting to the store and for listing requests
    pub store_timeout: Duration,
    /// Delay before resubscribing after the watch stream ends
    pub retry_delay: Duration,
    /// Capacity of the bounded watch event channel
    pub watch_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec![DEFAULT_ETCD.to_string()],
            service_root: DEFAULT_SERVICE_ROOT.to_string(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            watch_capacity: DEFAULT_WATCH_CAPACITY,
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_ETCD_HOST) {
            let endpoints = parse_endpoints(&raw);
            if !endpoints.is_empty() {
                config.etcd_endpoints = endpoints;
            }
        }
        if let Some(raw) = lookup(ENV_SERVICE_ROOT) {
            config.service_root = normalize_root(&raw)?;
        }
        if let Some(raw) = lookup(ENV_DIAL_TIMEOUT) {
            config.dial_timeout = parse_secs(ENV_DIAL_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STORE_TIMEOUT) {
            config.store_timeout = parse_secs(ENV_STORE_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_DELAY) {
            config.retry_delay = parse_secs(ENV_RETRY_DELAY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_WATCH_CAPACITY) {
            config.watch_capacity = match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    return Err(DiscoveryError::InvalidConfiguration(format!(
                        "{} must be a positive integer, got {:?}",
                        ENV_WATCH_CAPACITY, raw
                    )))
                }
            };
        }

        Ok(config)
    }
}

/// Split a semicolon-separated endpoint list, defaulting the scheme to http
fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.contains("://") {
                s.trim_end_matches('/').to_string()
            } else {
                format!("http://{}", s.trim_end_matches('/'))
            }
        })
        .collect()
}

fn normalize_root(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(DiscoveryError::InvalidConfiguration(format!(
            "{} must name a directory, got {:?}",
            ENV_SERVICE_ROOT, raw
        )));
    }
    Ok(format!("/{}", trimmed))
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            DiscoveryError::InvalidConfiguration(format!(
                "{} must be a number of seconds, got {:?}",
                name, raw
            ))
        })
}
