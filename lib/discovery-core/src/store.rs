//! Coordination store abstraction
//!
//! The layout is `{root}/{service}/{instance} = "{host}:{port}"`. Node and
//! event shapes follow the etcd v2 keys API so a concrete client can
//! deserialize straight into them.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A node in the coordination store tree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub modified_index: u64,
}

impl Node {
    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn directory(key: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            key: key.into(),
            dir: true,
            nodes,
            ..Default::default()
        }
    }

    /// Value of a leaf, empty when absent
    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// A change notification from a watch subscription
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub action: String,
    pub node: Node,
}

impl WatchEvent {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: "set".to_string(),
            node: Node::leaf(key, value),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            action: "delete".to_string(),
            node: Node {
                key: key.into(),
                ..Default::default()
            },
        }
    }

    /// Deletions are either explicit delete actions or a cleared value
    pub fn is_delete(&self) -> bool {
        matches!(
            self.action.as_str(),
            "delete" | "expire" | "compareAndDelete"
        ) || self.node.value_str().is_empty()
    }
}

/// Client of the external coordination store
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Recursive listing of everything beneath `root`
    async fn list(&self, root: &str) -> Result<Node>;

    /// Stream changes beneath `root` into `events`.
    ///
    /// Returns `Ok(())` when the stream ends or the receiver goes away and
    /// `Err` when the subscription fails.
    async fn watch(&self, root: &str, events: mpsc::Sender<WatchEvent>) -> Result<()>;
}
