//! Command line definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::LogFormat;

/// Guest agent - keeps container ports exposed through the host switch
#[derive(Parser, Debug, Default)]
#[command(name = "guestagent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "GUESTAGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root URL of the host switch forwarder API
    #[arg(long, env = "GUESTAGENT_API_ENDPOINT")]
    pub api_endpoint: Option<String>,

    /// Expose ports on the requested host IPs (admin install)
    #[arg(long, env = "GUESTAGENT_ADMIN_INSTALL")]
    pub admin_install: bool,

    /// Host proxy address used by non-admin installs
    #[arg(long, env = "GUESTAGENT_FORWARDER_ADDRESS")]
    pub forwarder_address: Option<SocketAddr>,

    /// Timeout for each host switch call, in seconds
    #[arg(long, env = "GUESTAGENT_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Calls allowed in flight per batch
    #[arg(long, env = "GUESTAGENT_MAX_CONCURRENT_REQUESTS")]
    pub max_concurrent_requests: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, env = "GUESTAGENT_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}
