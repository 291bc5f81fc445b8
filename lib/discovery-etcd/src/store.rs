//! CoordinationStore implementation over the etcd v2 keys API

use crate::client::EtcdClient;
use async_trait::async_trait;
use discovery_core::{CoordinationStore, Node, Result, WatchEvent};
use tokio::sync::mpsc;
use tracing::debug;

#[async_trait]
impl CoordinationStore for EtcdClient {
    async fn list(&self, root: &str) -> Result<Node> {
        let query = [
            ("recursive", "true".to_string()),
            ("sorted", "true".to_string()),
        ];
        match self.get(root, &query, Some(self.request_timeout())).await {
            Ok(response) => Ok(response.node),
            // A reachable cluster without the root yet simply has no services
            Err(e) if e.is_key_not_found() => {
                debug!("{} does not exist yet", root);
                Ok(Node::directory(root, vec![]))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn watch(&self, root: &str, events: mpsc::Sender<WatchEvent>) -> Result<()> {
        let mut wait_index: Option<u64> = None;

        loop {
            let mut query = watch_query();
            if let Some(index) = wait_index {
                query.push(("waitIndex", index.to_string()));
            }

            let response = tokio::select! {
                biased;
                _ = events.closed() => return Ok(()),
                response = self.get(root, &query, None) => response?,
            };

            wait_index = Some(response.node.modified_index + 1);
            let event = WatchEvent {
                action: response.action,
                node: response.node,
            };
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}

fn watch_query() -> Vec<(&'static str, String)> {
    vec![
        ("wait", "true".to_string()),
        ("recursive", "true".to_string()),
    ]
}
