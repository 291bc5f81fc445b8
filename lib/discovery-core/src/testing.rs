//! In-memory doubles for the dialer and the coordination store

use crate::{CoordinationStore, Dialer, DiscoveryError, Node, Result, WatchEvent};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq)]
pub struct MockConn {
    pub id: usize,
    pub address: String,
}

/// Dialer that records every dial and close
#[derive(Default)]
pub struct MockDialer {
    failing: Mutex<HashSet<String>>,
    dials: AtomicUsize,
    closed: Mutex<Vec<String>>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_address(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    type Conn = MockConn;

    async fn dial(&self, key: &str, address: &str) -> Result<MockConn> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(DiscoveryError::DialFailed {
                key: key.to_string(),
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let id = self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            id,
            address: address.to_string(),
        })
    }

    async fn close(&self, conn: MockConn) {
        self.closed.lock().unwrap().push(conn.address);
    }
}

/// One watch subscription: events to deliver, then how the stream ends
pub struct Session {
    pub events: Vec<WatchEvent>,
    pub fail: bool,
}

/// Coordination store with a fixed listing and scripted watch sessions.
///
/// Once the scripted sessions run out, `watch` blocks forever.
pub struct ScriptedStore {
    listing: Option<Node>,
    sessions: Mutex<VecDeque<Session>>,
    subscriptions: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(listing: Option<Node>) -> Self {
        Self {
            listing,
            sessions: Mutex::new(VecDeque::new()),
            subscriptions: AtomicUsize::new(0),
        }
    }

    pub fn with_session(self, events: Vec<WatchEvent>, fail: bool) -> Self {
        self.sessions
            .lock()
            .unwrap()
            .push_back(Session { events, fail });
        self
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for ScriptedStore {
    async fn list(&self, root: &str) -> Result<Node> {
        self.listing
            .clone()
            .ok_or_else(|| DiscoveryError::Store(format!("{} unreachable", root)))
    }

    async fn watch(&self, _root: &str, events: mpsc::Sender<WatchEvent>) -> Result<()> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().unwrap().pop_front();
        let Some(session) = session else {
            return std::future::pending().await;
        };

        for event in session.events {
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }
        if session.fail {
            Err(DiscoveryError::Store("watch stream reset".to_string()))
        } else {
            Ok(())
        }
    }
}
