//! Exposing single bindings through the host switch.
//!
//! The host switch runs a small forwarder API:
//!
//! - `POST /services/forwarder/expose` with `{"local", "remote", "protocol"}`
//! - `POST /services/forwarder/unexpose` with `{"local", "protocol"}`
//!
//! `local` is the host-side listen address and `remote` is where the switch
//! delivers the traffic inside the guest. Any non-2xx answer carries the
//! reason as plain text.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, TrackerError, TrackerResult};
use crate::forwarder::{PortForwarder, PortMapping};
use crate::portmap::{PortBinding, PortKey, Protocol, join_host_port};

/// Address of the virtual switch gateway as seen from the host.
pub const HOST_SWITCH_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 127, 2);

/// Address unprivileged installs listen on.
pub const LOOPBACK_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;

const EXPOSE_PATH: &str = "services/forwarder/expose";
const UNEXPOSE_PATH: &str = "services/forwarder/unexpose";

/// Body of an expose call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExposeRequest {
    /// Host-side listen address.
    pub local: String,
    /// Guest address reached through the switch.
    pub remote: String,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,
}

/// Body of an unexpose call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnexposeRequest {
    /// Host-side listen address to withdraw.
    pub local: String,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,
}

/// HTTP client for the host switch forwarder API.
#[derive(Debug, Clone)]
pub struct SwitchClient {
    client: Client,
    expose_url: Url,
    unexpose_url: Url,
}

impl SwitchClient {
    /// Create a client for the forwarder API rooted at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if `endpoint` is not an http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> TrackerResult<Self> {
        let invalid = |reason: String| TrackerError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut base = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
        }
        // Url::join drops the last path segment unless it ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let expose_url = base.join(EXPOSE_PATH).map_err(|e| invalid(e.to_string()))?;
        let unexpose_url = base.join(UNEXPOSE_PATH).map_err(|e| invalid(e.to_string()))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            expose_url,
            unexpose_url,
        })
    }

    /// Ask the switch to start forwarding.
    pub async fn expose(&self, request: &ExposeRequest) -> Result<(), ApiError> {
        tracing::debug!(local = %request.local, remote = %request.remote, "Exposing port");
        self.post(&self.expose_url, request).await
    }

    /// Ask the switch to stop forwarding.
    pub async fn unexpose(&self, request: &UnexposeRequest) -> Result<(), ApiError> {
        tracing::debug!(local = %request.local, "Unexposing port");
        self.post(&self.unexpose_url, request).await
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &Url, body: &T) -> Result<(), ApiError> {
        let response = self.client.post(url.clone()).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = text.trim_end();
        if message.is_empty() {
            Err(ApiError::new(status.to_string()))
        } else {
            Err(ApiError::new(message))
        }
    }
}

/// How bindings reach the host, fixed when the tracker is built.
#[derive(Clone)]
pub enum ExposureChannel {
    /// Admin install: the switch listens on the requested host IP itself.
    Privileged,
    /// Non-admin install: the switch only listens on loopback and a host-side
    /// proxy takes the requested address.
    Unprivileged(Arc<dyn PortForwarder>),
}

impl ExposureChannel {
    /// Whether this is an admin install.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Privileged)
    }
}

impl std::fmt::Debug for ExposureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Privileged => f.write_str("Privileged"),
            Self::Unprivileged(_) => f.write_str("Unprivileged"),
        }
    }
}

/// Exposes and unexposes one binding at a time.
#[derive(Debug, Clone)]
pub struct ExposureGateway {
    switch: SwitchClient,
    channel: ExposureChannel,
}

impl ExposureGateway {
    /// Create a gateway dispatching through `switch` over `channel`.
    #[must_use]
    pub fn new(switch: SwitchClient, channel: ExposureChannel) -> Self {
        Self { switch, channel }
    }

    /// The channel selected at construction.
    #[must_use]
    pub fn channel(&self) -> &ExposureChannel {
        &self.channel
    }

    /// Host-side listen address for `binding`.
    #[must_use]
    pub fn local_address(&self, binding: &PortBinding) -> String {
        match self.channel {
            ExposureChannel::Privileged => binding.to_string(),
            ExposureChannel::Unprivileged(_) => {
                join_host_port(&LOOPBACK_IP.to_string(), binding.host_port)
            }
        }
    }

    /// Switch address traffic for `binding` is delivered to.
    ///
    /// This uses the host port: the container runtime already publishes the
    /// container port on the same port number inside the guest.
    #[must_use]
    pub fn remote_address(binding: &PortBinding) -> String {
        join_host_port(&HOST_SWITCH_IP.to_string(), binding.host_port)
    }

    /// Expose one binding.
    ///
    /// On the unprivileged channel the switch is called before the proxy. If
    /// the proxy refuses, the switch entry is withdrawn again.
    pub async fn expose(&self, key: PortKey, binding: &PortBinding) -> Result<(), ApiError> {
        let request = ExposeRequest {
            local: self.local_address(binding),
            remote: Self::remote_address(binding),
            protocol: key.protocol,
        };
        self.switch.expose(&request).await?;

        let ExposureChannel::Unprivileged(forwarder) = &self.channel else {
            return Ok(());
        };
        let Err(forward) = forwarder.send(PortMapping::add(key, binding.clone())).await else {
            return Ok(());
        };

        // Withdraw the switch entry so it never outlives the failed binding.
        let rollback = UnexposeRequest {
            local: request.local,
            protocol: key.protocol,
        };
        match self.switch.unexpose(&rollback).await {
            Ok(()) => Err(forward),
            Err(undo) => Err(ApiError::new(format!(
                "{}; {}",
                forward.message, undo.message
            ))),
        }
    }

    /// Unexpose one binding.
    ///
    /// On the unprivileged channel the proxy is released before the switch,
    /// and both are attempted even if the first one fails.
    pub async fn unexpose(&self, key: PortKey, binding: &PortBinding) -> Result<(), ApiError> {
        let forwarded = match &self.channel {
            ExposureChannel::Privileged => Ok(()),
            ExposureChannel::Unprivileged(forwarder) => {
                forwarder
                    .send(PortMapping::remove(key, binding.clone()))
                    .await
            }
        };

        let request = UnexposeRequest {
            local: self.local_address(binding),
            protocol: key.protocol,
        };
        let switched = self.switch.unexpose(&request).await;

        match (forwarded, switched) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(forward), Err(switch)) => Err(ApiError::new(format!(
                "{}; {}",
                forward.message, switch.message
            ))),
        }
    }
}
