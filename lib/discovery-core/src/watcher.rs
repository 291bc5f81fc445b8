//! Background watcher keeping the registry in sync with the coordination store

use crate::config::{DEFAULT_RETRY_DELAY, DEFAULT_WATCH_CAPACITY};
use crate::endpoint::is_instance_key;
use crate::{CoordinationStore, Dialer, DiscoveryConfig, Result, ServiceRegistry, WatchEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Watcher applies change notifications beneath the service root to the registry.
///
/// It resubscribes after a fixed delay whenever the stream fails or closes,
/// without bound, until cancelled.
pub struct Watcher<S: CoordinationStore, D: Dialer> {
    store: Arc<S>,
    registry: Arc<ServiceRegistry<D>>,
    root: String,
    retry_delay: Duration,
    capacity: usize,
}

impl<S: CoordinationStore, D: Dialer> Watcher<S, D> {
    /// Create a watcher on `root` with default delay and capacity
    pub fn new(store: Arc<S>, registry: Arc<ServiceRegistry<D>>, root: impl Into<String>) -> Self {
        Self {
            store,
            registry,
            root: root.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            capacity: DEFAULT_WATCH_CAPACITY,
        }
    }

    /// Create a watcher from a discovery configuration
    pub fn from_config(
        store: Arc<S>,
        registry: Arc<ServiceRegistry<D>>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self::new(store, registry, config.service_root.clone())
            .with_retry_delay(config.retry_delay)
            .with_capacity(config.watch_capacity)
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Run the watch loop on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run the watch loop until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!("Watching {} for service changes", self.root);

        loop {
            let outcome = self.watch_once(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            match outcome {
                Ok(()) => warn!(
                    "Watch stream on {} closed, resubscribing in {:?}",
                    self.root, self.retry_delay
                ),
                Err(e) => error!(
                    "Watch stream on {} failed: {}, resubscribing in {:?}",
                    self.root, e, self.retry_delay
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!("Watcher on {} stopped", self.root);
    }

    /// One subscription: apply events until the stream ends.
    ///
    /// Events already queued when the stream ends are still applied.
    async fn watch_once(&self, cancel: &CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(self.capacity);
        let watch = self.store.watch(&self.root, tx);
        tokio::pin!(watch);

        let mut outcome = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = &mut watch, if outcome.is_none() => outcome = Some(result),
                event = rx.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => break,
                },
            }
        }

        outcome.unwrap_or(Ok(()))
    }

    /// Apply a single change notification to the registry
    pub async fn apply(&self, event: WatchEvent) {
        let node = &event.node;
        if node.dir {
            debug!("Ignoring directory event: {} {}", event.action, node.key);
            return;
        }
        if !is_instance_key(&self.root, &node.key) {
            warn!("Ignoring event outside service layout: {}", node.key);
            return;
        }

        if event.is_delete() {
            debug!("Node delete: {}", node.key);
            self.registry.remove_endpoint(&node.key).await;
        } else {
            debug!("Node add: {} {}", node.key, node.value_str());
            // Dial failures are logged by the registry
            let _ = self
                .registry
                .add_endpoint(&node.key, node.value_str())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDialer, ScriptedStore};
    use crate::Node;
    use std::future::Future;

    fn watcher(store: ScriptedStore) -> Watcher<ScriptedStore, MockDialer> {
        let registry = Arc::new(ServiceRegistry::new(MockDialer::new()));
        Watcher::new(Arc::new(store), registry, "/backends")
            .with_retry_delay(Duration::from_millis(10))
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_apply_add_and_delete() {
        let watcher = watcher(ScriptedStore::new(None));
        let registry = watcher.registry.clone();

        watcher.apply(WatchEvent::set("/backends/auth/1", ":50051")).await;
        watcher.apply(WatchEvent::set("/backends/auth/2", ":50052")).await;
        assert_eq!(registry.endpoint_count("auth").await, 2);

        watcher.apply(WatchEvent::delete("/backends/auth/1")).await;
        for _ in 0..3 {
            let endpoint = registry.select_round_robin("auth").await.unwrap();
            assert_eq!(endpoint.key, "/backends/auth/2");
        }
    }

    #[tokio::test]
    async fn test_apply_cleared_value_removes() {
        let watcher = watcher(ScriptedStore::new(None));
        let registry = watcher.registry.clone();

        watcher.apply(WatchEvent::set("/backends/auth/1", ":50051")).await;
        watcher.apply(WatchEvent::set("/backends/auth/1", "")).await;
        assert_eq!(registry.endpoint_count("auth").await, 0);
    }

    #[tokio::test]
    async fn test_apply_ignores_directories_and_stray_keys() {
        let watcher = watcher(ScriptedStore::new(None));
        let registry = watcher.registry.clone();

        watcher
            .apply(WatchEvent {
                action: "set".to_string(),
                node: Node::directory("/backends/auth", vec![]),
            })
            .await;
        watcher.apply(WatchEvent::set("/backends/stray", ":1")).await;
        watcher.apply(WatchEvent::set("/elsewhere/auth/1", ":1")).await;

        assert_eq!(registry.service_count().await, 0);
        assert_eq!(registry.dialer().dial_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_after_reconnect_is_idempotent() {
        let store = ScriptedStore::new(None)
            .with_session(
                vec![
                    WatchEvent::set("/backends/auth/1", ":50051"),
                    WatchEvent::set("/backends/auth/2", ":50052"),
                    WatchEvent::delete("/backends/auth/3"),
                ],
                true,
            )
            .with_session(
                vec![
                    WatchEvent::set("/backends/auth/1", ":50051"),
                    WatchEvent::set("/backends/auth/2", ":50052"),
                    WatchEvent::delete("/backends/auth/3"),
                    WatchEvent::delete("/backends/auth/1"),
                ],
                false,
            );
        let watcher = watcher(store);
        let registry = watcher.registry.clone();
        let store = watcher.store.clone();

        let cancel = CancellationToken::new();
        let handle = watcher.spawn(cancel.clone());

        // Third subscription blocks once the script is exhausted
        eventually(|| {
            let store = store.clone();
            async move { store.subscriptions() >= 3 }
        })
        .await;

        assert_eq!(
            registry.snapshot().await["auth"],
            vec!["/backends/auth/2".to_string()]
        );
        assert_eq!(registry.dialer().dial_count(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_watcher() {
        let watcher = watcher(ScriptedStore::new(None));
        let cancel = CancellationToken::new();
        let handle = watcher.spawn(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let store = ScriptedStore::new(None).with_session(vec![], true);
        let registry = Arc::new(ServiceRegistry::new(MockDialer::new()));
        let store = Arc::new(store);
        let watcher = Watcher::new(store.clone(), registry, "/backends")
            .with_retry_delay(Duration::from_secs(3600));

        let cancel = CancellationToken::new();
        let handle = watcher.spawn(cancel.clone());
        eventually(|| {
            let store = store.clone();
            async move { store.subscriptions() >= 1 }
        })
        .await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.subscriptions(), 1);
    }
}
