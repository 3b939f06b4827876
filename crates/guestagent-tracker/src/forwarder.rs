//! Direct forwarding to a host-side proxy.
//!
//! Unprivileged installs cannot have the host switch listen on arbitrary host
//! interfaces, so a proxy running on the host does it instead. The tracker
//! tells it about each binding through a [`PortForwarder`].

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::ApiError;
use crate::portmap::{PortBinding, PortKey, PortMap};

/// Port mapping handed to a [`PortForwarder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Whether the mapping is being withdrawn.
    pub remove: bool,
    /// The ports involved.
    pub ports: PortMap,
}

impl PortMapping {
    /// Mapping that publishes a single binding.
    #[must_use]
    pub fn add(key: PortKey, binding: PortBinding) -> Self {
        Self {
            remove: false,
            ports: PortMap::from([(key, vec![binding])]),
        }
    }

    /// Mapping that withdraws a single binding.
    #[must_use]
    pub fn remove(key: PortKey, binding: PortBinding) -> Self {
        Self {
            remove: true,
            ports: PortMap::from([(key, vec![binding])]),
        }
    }
}

/// Something that can relay port mappings to the host.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Deliver one mapping.
    async fn send(&self, mapping: PortMapping) -> Result<(), ApiError>;
}

/// Forwarder writing newline-delimited JSON to a host proxy over TCP.
///
/// A fresh connection is made per mapping; the proxy treats each line as a
/// complete request.
#[derive(Debug, Clone)]
pub struct TcpForwarder {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpForwarder {
    /// Default connect and write timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a forwarder for the proxy at `addr`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Set the connect and write timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address of the host proxy.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn deliver(&self, line: &[u8]) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(line).await?;
        stream.shutdown().await
    }
}

#[async_trait]
impl PortForwarder for TcpForwarder {
    async fn send(&self, mapping: PortMapping) -> Result<(), ApiError> {
        let mut line = serde_json::to_vec(&mapping)
            .map_err(|e| ApiError::new(format!("encoding port mapping: {e}")))?;
        line.push(b'\n');

        tracing::debug!(proxy = %self.addr, remove = mapping.remove, "Sending port mapping");

        match tokio::time::timeout(self.timeout, self.deliver(&line)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ApiError::new(format!(
                "forwarding to {} failed: {e}",
                self.addr
            ))),
            Err(_) => Err(ApiError::new(format!(
                "forwarding to {} timed out after {:?}",
                self.addr, self.timeout
            ))),
        }
    }
}
