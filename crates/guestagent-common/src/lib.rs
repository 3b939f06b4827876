//! # guestagent-common
//!
//! Shared types for the guest agent.
//!
//! This crate provides the pieces used by both the port tracker and the
//! agent binary:
//! - Validated container identifiers
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;

pub use error::{GuestAgentError, GuestAgentResult};
pub use id::ContainerId;
