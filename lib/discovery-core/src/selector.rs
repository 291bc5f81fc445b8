//! Typed client resolution on top of registry selection
//!
//! Each backend integration registers a constructor that wraps a raw
//! connection into its RPC client. Lookups select an endpoint and hand its
//! connection to the constructor registered for that service name.
//!
//! Every lookup failure surfaces as `NotAvailable`, including a missing
//! or mistyped constructor.

use crate::{Dialer, DiscoveryError, Result, ServiceRegistry};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

type FactoryFn<C, T> = Arc<dyn Fn(C) -> T + Send + Sync>;

/// Per-service constructors turning a connection into a typed client
pub struct ClientFactories<C> {
    factories: HashMap<String, Box<dyn Any + Send + Sync>>,
    _conn: PhantomData<fn(C)>,
}

impl<C: 'static> ClientFactories<C> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            _conn: PhantomData,
        }
    }

    /// Register the client constructor for `service`, replacing any previous one
    pub fn register<T, F>(&mut self, service: impl Into<String>, factory: F) -> &mut Self
    where
        T: 'static,
        F: Fn(C) -> T + Send + Sync + 'static,
    {
        let service = service.into();
        debug!("Registered client factory for service: {}", service);
        let factory: FactoryFn<C, T> = Arc::new(factory);
        self.factories.insert(service, Box::new(factory));
        self
    }

    /// Builder form of `register`
    pub fn with<T, F>(mut self, service: impl Into<String>, factory: F) -> Self
    where
        T: 'static,
        F: Fn(C) -> T + Send + Sync + 'static,
    {
        self.register(service, factory);
        self
    }

    pub fn contains(&self, service: &str) -> bool {
        self.factories.contains_key(service)
    }

    fn factory<T: 'static>(&self, service: &str) -> Result<&FactoryFn<C, T>> {
        let Some(factory) = self.factories.get(service) else {
            warn!("No client factory registered for service: {}", service);
            return Err(DiscoveryError::NotAvailable(service.to_string()));
        };
        factory.downcast_ref::<FactoryFn<C, T>>().ok_or_else(|| {
            warn!(
                "Client factory for {} does not build {}",
                service,
                std::any::type_name::<T>()
            );
            DiscoveryError::NotAvailable(service.to_string())
        })
    }
}

impl<C: 'static> Default for ClientFactories<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// ServiceSelector resolves service names to typed clients
pub struct ServiceSelector<D: Dialer> {
    registry: Arc<ServiceRegistry<D>>,
    factories: ClientFactories<D::Conn>,
}

impl<D: Dialer> ServiceSelector<D> {
    pub fn new(registry: Arc<ServiceRegistry<D>>, factories: ClientFactories<D::Conn>) -> Self {
        Self {
            registry,
            factories,
        }
    }

    /// Get the service registry
    pub fn registry(&self) -> &Arc<ServiceRegistry<D>> {
        &self.registry
    }

    /// Client for the next instance of `service` in rotation
    pub async fn lookup<T: 'static>(&self, service: &str) -> Result<T> {
        let factory = self.factories.factory::<T>(service)?;
        let endpoint = self.registry.select_round_robin(service).await?;
        Ok(factory(endpoint.conn))
    }

    /// Client for a specific instance of `service`
    pub async fn lookup_by_id<T: 'static>(&self, service: &str, id: &str) -> Result<T> {
        let factory = self.factories.factory::<T>(service)?;
        let endpoint = self.registry.select_by_id(service, id).await?;
        Ok(factory(endpoint.conn))
    }

    /// Clients for every instance of `service`, keyed by endpoint key
    pub async fn lookup_all<T: 'static>(&self, service: &str) -> Result<HashMap<String, T>> {
        let factory = self.factories.factory::<T>(service)?;
        let endpoints = self.registry.select_all(service).await?;
        Ok(endpoints
            .into_iter()
            .map(|(key, endpoint)| (key, factory(endpoint.conn)))
            .collect())
    }
}
