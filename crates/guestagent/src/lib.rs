//! # guestagent
//!
//! Guest-side agent that keeps container ports reachable from the host.
//!
//! The agent reads container port events, feeds them to a
//! [`guestagent_tracker::ApiTracker`], and withdraws every exposed port when
//! it shuts down.

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod events;

pub use cli::Cli;
pub use config::{AgentConfig, LogFormat};
pub use events::{EventStats, PortEvent};
