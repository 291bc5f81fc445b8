//! Service registry for live backend endpoints and their connections

use crate::endpoint::{normalize_key, split_key};
use crate::{Dialer, DiscoveryError, Endpoint, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// ServiceRegistry maintains the dialed endpoints of every known service
///
/// All access goes through a single reader/writer lock. Service entries are
/// created on the first successful add and are kept even once empty, so
/// "never seen" and "currently empty" both answer `NotAvailable`.
pub struct ServiceRegistry<D: Dialer> {
    // Map of service name to its endpoints
    services: RwLock<HashMap<String, ServiceInfo<D::Conn>>>,
    dialer: D,
}

/// Endpoints registered under one service name
#[derive(Debug)]
pub struct ServiceInfo<C> {
    pub name: String,
    pub endpoints: Vec<Endpoint<C>>,
    cursor: AtomicUsize,
}

impl<C> ServiceInfo<C> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoints: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl<D: Dialer> ServiceRegistry<D> {
    pub fn new(dialer: D) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            dialer,
        }
    }

    /// Get the dialer used for new endpoints
    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Dial `address` and register it under `key`.
    ///
    /// An existing endpoint with the same key is replaced in place and its
    /// connection closed. Re-adding a key with an unchanged address is a
    /// no-op and does not dial.
    pub async fn add_endpoint(&self, key: &str, address: &str) -> Result<()> {
        let key = normalize_key(key);
        let (service_name, _) =
            split_key(key).ok_or_else(|| DiscoveryError::InvalidKey(key.to_string()))?;

        {
            let services = self.services.read().await;
            let unchanged = services.get(service_name).is_some_and(|service| {
                service
                    .endpoints
                    .iter()
                    .any(|e| e.key == key && e.address == address)
            });
            if unchanged {
                debug!("Endpoint already registered: {} -- {}", key, address);
                return Ok(());
            }
        }

        // Dial outside the lock so a slow backend never stalls lookups
        let conn = match self.dialer.dial(key, address).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Did not connect: {} -- {}: {}", key, address, e);
                return Err(e);
            }
        };

        let replaced = {
            let mut services = self.services.write().await;
            let service = services
                .entry(service_name.to_string())
                .or_insert_with(|| {
                    debug!("New service type: {}", service_name);
                    ServiceInfo::new(service_name)
                });

            let endpoint = Endpoint::new(key, address, conn);
            match service.endpoints.iter_mut().find(|e| e.key == key) {
                Some(existing) => Some(std::mem::replace(existing, endpoint)),
                None => {
                    service.endpoints.push(endpoint);
                    None
                }
            }
        };

        match replaced {
            Some(old) => {
                debug!("Endpoint replaced: {} -- {} -> {}", key, old.address, address);
                self.dialer.close(old.conn).await;
            }
            None => debug!("Endpoint added: {} -- {}", key, address),
        }
        Ok(())
    }

    /// Remove the endpoint registered under `key` and close its connection.
    ///
    /// Returns whether anything was removed; unknown keys are ignored.
    pub async fn remove_endpoint(&self, key: &str) -> bool {
        let key = normalize_key(key);
        let Some((service_name, _)) = split_key(key) else {
            debug!("Ignoring removal of malformed key: {}", key);
            return false;
        };

        let removed = {
            let mut services = self.services.write().await;
            let Some(service) = services.get_mut(service_name) else {
                debug!("No such service: {}", service_name);
                return false;
            };
            match service.endpoints.iter().position(|e| e.key == key) {
                Some(index) => service.endpoints.remove(index),
                None => {
                    debug!("No such endpoint: {}", key);
                    return false;
                }
            }
        };

        self.dialer.close(removed.conn).await;
        debug!("Endpoint removed: {}", key);
        true
    }

    /// Pick the next endpoint of a service in rotation
    pub async fn select_round_robin(&self, service_name: &str) -> Result<Endpoint<D::Conn>> {
        let services = self.services.read().await;
        let service = Self::available(&services, service_name)?;

        // The divisor is read under the same guard as the element access
        let current = service.cursor.fetch_add(1, Ordering::SeqCst);
        service
            .endpoints
            .get(current % service.endpoints.len())
            .cloned()
            .ok_or_else(|| DiscoveryError::NotAvailable(service_name.to_string()))
    }

    /// Pick the endpoint of a specific instance
    pub async fn select_by_id(&self, service_name: &str, id: &str) -> Result<Endpoint<D::Conn>> {
        let services = self.services.read().await;
        let service = Self::available(&services, service_name)?;

        service
            .endpoints
            .iter()
            .find(|e| e.instance_id() == Some(id))
            .cloned()
            .ok_or_else(|| DiscoveryError::NotAvailable(format!("{}/{}", service_name, id)))
    }

    /// Snapshot of every endpoint of a service, keyed by endpoint key
    pub async fn select_all(
        &self,
        service_name: &str,
    ) -> Result<HashMap<String, Endpoint<D::Conn>>> {
        let services = self.services.read().await;
        let service = Self::available(&services, service_name)?;

        Ok(service
            .endpoints
            .iter()
            .map(|e| (e.key.clone(), e.clone()))
            .collect())
    }

    /// Number of endpoints currently registered for a service
    pub async fn endpoint_count(&self, service_name: &str) -> usize {
        let services = self.services.read().await;
        services
            .get(service_name)
            .map(|s| s.endpoints.len())
            .unwrap_or(0)
    }

    /// Names of every service seen so far, including empty ones
    pub async fn service_names(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get count of known services
    pub async fn service_count(&self) -> usize {
        let services = self.services.read().await;
        services.len()
    }

    /// Endpoint keys per service, in selection order
    pub async fn snapshot(&self) -> HashMap<String, Vec<String>> {
        let services = self.services.read().await;
        services
            .iter()
            .map(|(name, service)| {
                let keys = service.endpoints.iter().map(|e| e.key.clone()).collect();
                (name.clone(), keys)
            })
            .collect()
    }

    fn available<'a>(
        services: &'a HashMap<String, ServiceInfo<D::Conn>>,
        service_name: &str,
    ) -> Result<&'a ServiceInfo<D::Conn>> {
        services
            .get(service_name)
            .filter(|s| !s.endpoints.is_empty())
            .ok_or_else(|| DiscoveryError::NotAvailable(service_name.to_string()))
    }
}
