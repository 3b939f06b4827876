//! Reconciling container port maps with the host switch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use guestagent_common::ContainerId;

use crate::error::{ApiError, BindingFailure, FailureList, Operation, TrackerError, TrackerResult};
use crate::forwarder::PortForwarder;
use crate::gateway::{ExposureChannel, ExposureGateway, SwitchClient};
use crate::portmap::{PortBinding, PortKey, PortMap};
use crate::store::PortStateStore;

/// Keeps the host's forwarding table in line with running containers.
///
/// Implementations are called from container event handlers, possibly from
/// several tasks at once.
///
/// Containers are keyed by [`ContainerId`], which only admits ids of 1 to 128
/// ASCII letters, digits, `-`, `_` or `.` starting with a letter or digit.
/// Ids from Docker, containerd and nerdctl all fit; anything else is rejected
/// before it reaches a tracker.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Expose `ports` for a container, replacing whatever it had before.
    async fn add(&self, id: &ContainerId, ports: PortMap) -> TrackerResult<()>;

    /// Unexpose everything tracked for a container and forget it.
    ///
    /// The container is forgotten before its ports are withdrawn, so an
    /// `add` for the same id that lands meanwhile is kept.
    async fn remove(&self, id: &ContainerId) -> TrackerResult<()>;

    /// Unexpose and forget every tracked container.
    async fn remove_all(&self) -> TrackerResult<()>;

    /// Ports currently exposed for a container.
    fn get(&self, id: &ContainerId) -> Option<PortMap>;
}

/// Construction options for [`ApiTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Root URL of the host switch forwarder API.
    pub api_base_url: String,
    /// Whether the install may bind arbitrary host interfaces.
    pub admin_install: bool,
    /// Timeout for each call to the switch.
    pub request_timeout: Duration,
    /// Upper bound on calls in flight within one batch.
    pub max_concurrent_requests: usize,
}

impl TrackerConfig {
    /// Default host switch endpoint.
    pub const DEFAULT_API_BASE_URL: &'static str = "http://192.168.127.1:80";

    /// Create a configuration for `api_base_url`.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Set whether this is an admin install.
    #[must_use]
    pub fn with_admin_install(mut self, admin_install: bool) -> Self {
        self.admin_install = admin_install;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the number of calls allowed in flight per batch (at least one).
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: Self::DEFAULT_API_BASE_URL.to_string(),
            admin_install: false,
            request_timeout: Duration::from_secs(10),
            max_concurrent_requests: 4,
        }
    }
}

/// [`Tracker`] backed by the host switch forwarder API.
#[derive(Debug)]
pub struct ApiTracker {
    gateway: ExposureGateway,
    store: PortStateStore,
    concurrency: usize,
}

impl ApiTracker {
    /// Create a tracker.
    ///
    /// `forwarder` is only used by non-admin installs, where it is required.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid, the HTTP client cannot be
    /// built, or a non-admin install has no forwarder.
    pub fn new(
        config: TrackerConfig,
        forwarder: Option<Arc<dyn PortForwarder>>,
    ) -> TrackerResult<Self> {
        let channel = if config.admin_install {
            ExposureChannel::Privileged
        } else {
            ExposureChannel::Unprivileged(forwarder.ok_or(TrackerError::MissingForwarder)?)
        };
        let switch = SwitchClient::new(&config.api_base_url, config.request_timeout)?;

        tracing::info!(
            endpoint = %config.api_base_url,
            admin_install = config.admin_install,
            "Port tracker ready"
        );

        Ok(Self {
            gateway: ExposureGateway::new(switch, channel),
            store: PortStateStore::new(),
            concurrency: config.max_concurrent_requests.max(1),
        })
    }

    /// The gateway used for individual calls.
    #[must_use]
    pub fn gateway(&self) -> &ExposureGateway {
        &self.gateway
    }

    /// Containers currently tracked.
    #[must_use]
    pub fn tracked(&self) -> Vec<ContainerId> {
        self.store.list().into_iter().map(|(id, _)| id).collect()
    }

    /// Run `operation` against every binding in `ports` and hand back each
    /// binding with its outcome, in input order.
    async fn dispatch<'a>(
        &self,
        operation: Operation,
        ports: &'a PortMap,
    ) -> Vec<(PortKey, &'a PortBinding, Result<(), ApiError>)> {
        let calls: Vec<_> = ports
            .iter()
            .flat_map(|(key, bindings)| bindings.iter().map(move |binding| (*key, binding)))
            .map(|(key, binding)| self.call(operation, key, binding))
            .collect();

        stream::iter(calls)
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn call<'a>(
        &self,
        operation: Operation,
        key: PortKey,
        binding: &'a PortBinding,
    ) -> (PortKey, &'a PortBinding, Result<(), ApiError>) {
        let outcome = match operation {
            Operation::Expose => self.gateway.expose(key, binding).await,
            Operation::Unexpose => self.gateway.unexpose(key, binding).await,
        };
        (key, binding, outcome)
    }

    async fn unexpose_all(
        &self,
        id: &ContainerId,
        ports: &PortMap,
        context: Option<&'static str>,
        failures: &mut FailureList,
    ) {
        let outcomes = self.dispatch(Operation::Unexpose, ports).await;

        for (key, binding, outcome) in outcomes {
            if let Err(source) = outcome {
                tracing::warn!(
                    container_id = %id.short(),
                    port = %key,
                    binding = %binding,
                    error = %source,
                    "Failed to unexpose port"
                );
                let failure = BindingFailure::new(Operation::Unexpose, binding.clone(), source);
                failures.push(match context {
                    Some(context) => failure.with_context(context),
                    None => failure,
                });
            }
        }
    }
}

#[async_trait]
impl Tracker for ApiTracker {
    async fn add(&self, id: &ContainerId, ports: PortMap) -> TrackerResult<()> {
        let outcomes = self.dispatch(Operation::Expose, &ports).await;

        let mut committed = PortMap::new();
        let mut failures = FailureList::new();
        for (key, binding, outcome) in outcomes {
            match outcome {
                Ok(()) => committed.entry(key).or_default().push(binding.clone()),
                Err(source) => {
                    tracing::warn!(
                        container_id = %id.short(),
                        port = %key,
                        binding = %binding,
                        error = %source,
                        "Failed to expose port"
                    );
                    failures.push(BindingFailure::new(
                        Operation::Expose,
                        binding.clone(),
                        source,
                    ));
                }
            }
        }

        tracing::info!(
            container_id = %id.short(),
            exposed = committed.values().map(Vec::len).sum::<usize>(),
            failed = failures.len(),
            "Exposed container ports"
        );
        self.store.set(id.clone(), committed);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TrackerError::Expose(failures))
        }
    }

    async fn remove(&self, id: &ContainerId) -> TrackerResult<()> {
        let Some(ports) = self.store.delete(id) else {
            tracing::debug!(container_id = %id.short(), "No ports tracked, nothing to remove");
            return Ok(());
        };

        let mut failures = FailureList::new();
        self.unexpose_all(id, &ports, None, &mut failures).await;

        tracing::info!(
            container_id = %id.short(),
            failed = failures.len(),
            "Removed container ports"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TrackerError::Unexpose(failures))
        }
    }

    async fn remove_all(&self) -> TrackerResult<()> {
        let snapshot = self.store.list();

        let mut failures = FailureList::new();
        for (id, ports) in &snapshot {
            self.unexpose_all(id, ports, Some(BindingFailure::REMOVE_ALL), &mut failures)
                .await;
        }
        self.store.delete_all();

        tracing::info!(
            containers = snapshot.len(),
            failed = failures.len(),
            "Removed all tracked ports"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TrackerError::Unexpose(failures))
        }
    }

    fn get(&self, id: &ContainerId) -> Option<PortMap> {
        self.store.get(id)
    }
}
