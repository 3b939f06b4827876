//! Agent configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! command line flags (or their `GUESTAGENT_*` environment variables):
//!
//! ```toml
//! api-endpoint = "http://192.168.127.1:80"
//! admin-install = false
//! forwarder-address = "127.0.0.1:6443"
//! request-timeout-secs = 10
//! max-concurrent-requests = 4
//! log-format = "json"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use guestagent_common::{GuestAgentError, GuestAgentResult};
use guestagent_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentConfig {
    /// Root URL of the host switch forwarder API.
    pub api_endpoint: String,
    /// Whether ports are exposed on the requested host IPs.
    pub admin_install: bool,
    /// Host proxy used by non-admin installs.
    pub forwarder_address: Option<SocketAddr>,
    /// Timeout for each host switch call, in seconds.
    pub request_timeout_secs: u64,
    /// Calls allowed in flight per batch.
    pub max_concurrent_requests: usize,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        Self {
            api_endpoint: tracker.api_base_url,
            admin_install: tracker.admin_install,
            forwarder_address: None,
            request_timeout_secs: tracker.request_timeout.as_secs(),
            max_concurrent_requests: tracker.max_concurrent_requests,
            log_format: LogFormat::default(),
        }
    }
}

impl AgentConfig {
    /// Per-user configuration file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("guestagent").join("config.toml"))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> GuestAgentResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GuestAgentError::config(format!("reading {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&text)?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Build the effective configuration for `cli`.
    ///
    /// An explicit `--config` file must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a file fails to load or the result is invalid.
    pub fn resolve(cli: &Cli) -> GuestAgentResult<Self> {
        let base = match &cli.config {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(&path)?,
                _ => Self::default(),
            },
        };

        let config = base.with_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides on top of this configuration.
    #[must_use]
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(endpoint) = &cli.api_endpoint {
            self.api_endpoint.clone_from(endpoint);
        }
        self.admin_install |= cli.admin_install;
        if let Some(addr) = cli.forwarder_address {
            self.forwarder_address = Some(addr);
        }
        if let Some(secs) = cli.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if let Some(limit) = cli.max_concurrent_requests {
            self.max_concurrent_requests = limit;
        }
        if let Some(format) = cli.log_format {
            self.log_format = format;
        }
        self
    }

    /// Check that the configuration can start an agent.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> GuestAgentResult<()> {
        if self.api_endpoint.trim().is_empty() {
            return Err(GuestAgentError::config("api-endpoint must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(GuestAgentError::config(
                "request-timeout-secs must be at least 1",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(GuestAgentError::config(
                "max-concurrent-requests must be at least 1",
            ));
        }
        if !self.admin_install && self.forwarder_address.is_none() {
            return Err(GuestAgentError::config(
                "forwarder-address is required unless admin-install is set",
            ));
        }
        Ok(())
    }

    /// Tracker options derived from this configuration.
    #[must_use]
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::new(self.api_endpoint.clone())
            .with_admin_install(self.admin_install)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_max_concurrent_requests(self.max_concurrent_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full_file() {
        let file = write_config(
            r#"
            api-endpoint = "http://10.0.0.1:8080"
            admin-install = true
            request-timeout-secs = 3
            max-concurrent-requests = 8
            log-format = "json"
            "#,
        );

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.api_endpoint, "http://10.0.0.1:8080");
        assert!(config.admin_install);
        assert_eq!(config.request_timeout_secs, 3);
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_keys_use_defaults() {
        let file = write_config(r#"forwarder-address = "127.0.0.1:6443""#);

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.api_endpoint, TrackerConfig::DEFAULT_API_BASE_URL);
        assert_eq!(config.forwarder_address, Some("127.0.0.1:6443".parse().unwrap()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("admin = true");
        let err = AgentConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, GuestAgentError::Config { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/guestagent.toml")),
            admin_install: true,
            ..Cli::default()
        };
        assert!(AgentConfig::resolve(&cli).is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let file = write_config(
            r#"
            api-endpoint = "http://10.0.0.1:8080"
            request-timeout-secs = 3
            "#,
        );
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            api_endpoint: Some("http://192.168.127.1:80".to_string()),
            admin_install: true,
            ..Cli::default()
        };

        let config = AgentConfig::resolve(&cli).unwrap();
        assert_eq!(config.api_endpoint, "http://192.168.127.1:80");
        assert!(config.admin_install);
        assert_eq!(config.request_timeout_secs, 3);
    }

    #[test]
    fn non_admin_needs_forwarder() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("forwarder-address"));
    }

    #[test]
    fn tracker_config_mirrors_settings() {
        let config = AgentConfig {
            admin_install: true,
            request_timeout_secs: 7,
            max_concurrent_requests: 2,
            ..AgentConfig::default()
        };

        let tracker = config.tracker_config();
        assert!(tracker.admin_install);
        assert_eq!(tracker.request_timeout, Duration::from_secs(7));
        assert_eq!(tracker.max_concurrent_requests, 2);
    }
}
