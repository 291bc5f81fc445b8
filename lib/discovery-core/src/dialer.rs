//! Endpoint dialing with a bounded connect timeout

use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

/// Establishes and releases transport connections to backend instances
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Shared connection handle handed to typed client factories
    type Conn: Clone + Send + Sync + 'static;

    /// Connect to `address`, bounded by the dialer's timeout
    async fn dial(&self, key: &str, address: &str) -> Result<Self::Conn>;

    /// Release a connection previously returned by `dial`
    async fn close(&self, conn: Self::Conn);
}

/// Shared TCP channel to a backend instance
#[derive(Clone, Debug)]
pub struct Channel {
    address: String,
    stream: Arc<Mutex<TcpStream>>,
}

impl Channel {
    /// Address this channel was dialed with
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Underlying stream, for clients that speak the wire protocol
    pub fn stream(&self) -> &Arc<Mutex<TcpStream>> {
        &self.stream
    }
}

/// Dialer producing plain TCP channels
#[derive(Clone, Debug)]
pub struct TcpDialer {
    timeout: Duration,
    keepalive: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            keepalive: Duration::from_secs(30),
        }
    }

    /// `":50051"` means the loopback interface
    fn resolve_address(address: &str) -> String {
        if address.starts_with(':') {
            format!("127.0.0.1{}", address)
        } else {
            address.to_string()
        }
    }

    fn configure(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = Channel;

    async fn dial(&self, key: &str, address: &str) -> Result<Channel> {
        let target = Self::resolve_address(address);
        let dial_failed = |reason: String| DiscoveryError::DialFailed {
            key: key.to_string(),
            address: address.to_string(),
            reason,
        };

        let stream = connect_within(self.timeout, TcpStream::connect(&target))
            .await
            .map_err(dial_failed)?;

        if let Err(e) = self.configure(&stream) {
            warn!("Failed to configure socket for {}: {}", target, e);
        }

        debug!("Connected to {} ({})", key, target);
        Ok(Channel {
            address: address.to_string(),
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    async fn close(&self, conn: Channel) {
        let mut stream = conn.stream.lock().await;
        if let Err(e) = stream.shutdown().await {
            debug!("Error closing channel to {}: {}", conn.address, e);
        }
    }
}

/// Await a connect future for at most `timeout`
async fn connect_within<F, T>(timeout: Duration, connect: F) -> std::result::Result<T, String>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio_timeout(timeout, connect).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", timeout)),
    }
}
