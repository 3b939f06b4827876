//! # guestagent-tracker
//!
//! Keeps container ports published on the host machine.
//!
//! The guest agent watches container lifecycle events and calls into an
//! [`ApiTracker`] whenever a container's published ports change. The tracker
//! exposes each binding through the host switch forwarder API, remembers
//! which bindings actually made it, and withdraws them again when the
//! container goes away.
//!
//! Individual calls are never retried and never abort a batch: every binding
//! is attempted and the failures come back together as one
//! [`TrackerError`].

#![warn(missing_docs)]

pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod portmap;
pub mod store;
pub mod tracker;

pub use error::{ApiError, BindingFailure, FailureList, Operation, TrackerError, TrackerResult};
pub use forwarder::{PortForwarder, PortMapping, TcpForwarder};
pub use gateway::{
    ExposeRequest, ExposureChannel, ExposureGateway, HOST_SWITCH_IP, LOOPBACK_IP, SwitchClient,
    UnexposeRequest,
};
pub use portmap::{PortBinding, PortKey, PortMap, Protocol};
pub use store::PortStateStore;
pub use tracker::{ApiTracker, Tracker, TrackerConfig};
