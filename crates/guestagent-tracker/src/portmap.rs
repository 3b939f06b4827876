//! Container port bindings.
//!
//! The types here mirror the shape docker reports in
//! `NetworkSettings.Ports`, so a port map read from the container runtime
//! deserializes straight into a [`PortMap`]:
//!
//! ```json
//! { "80/tcp": [ { "HostIp": "127.0.0.1", "HostPort": "8080" } ] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered mapping from container port to the host bindings exposed for it.
pub type PortMap = BTreeMap<PortKey, Vec<PortBinding>>;

/// Protocol for port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Protocol {
    /// TCP protocol.
    #[default]
    Tcp,
    /// UDP protocol.
    Udp,
    /// SCTP protocol.
    Sctp,
}

impl Protocol {
    /// Get the lowercase protocol name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            _ => Err(PortParseError(format!("unknown protocol '{s}'"))),
        }
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Error returned when a port key or protocol cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid port specification: {0}")]
pub struct PortParseError(String);

/// A container port and protocol, written as `"80/tcp"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortKey {
    /// Container port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl PortKey {
    /// Create a TCP port key.
    #[must_use]
    pub const fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    /// Create a UDP port key.
    #[must_use]
    pub const fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

impl FromStr for PortKey {
    type Err = PortParseError;

    /// Parses `"<port>[/<proto>]"`; the protocol defaults to TCP like docker does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = match s.split_once('/') {
            Some((port, proto)) => (port, proto.parse()?),
            None => (s, Protocol::Tcp),
        };
        let port = port
            .parse()
            .map_err(|_| PortParseError(format!("invalid port in '{s}'")))?;
        Ok(Self { port, protocol })
    }
}

impl Serialize for PortKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One host-side address a container port is published on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host IP to bind to; empty means every interface.
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    /// Host port.
    #[serde(rename = "HostPort", with = "host_port")]
    pub host_port: u16,
}

impl PortBinding {
    /// Create a binding on `host_ip:host_port`.
    pub fn new(host_ip: impl Into<String>, host_port: u16) -> Self {
        Self {
            host_ip: host_ip.into(),
            host_port,
        }
    }

    /// Host IP with the empty "all interfaces" form spelled out.
    #[must_use]
    pub fn host_ip_or_unspecified(&self) -> &str {
        if self.host_ip.is_empty() {
            "0.0.0.0"
        } else {
            &self.host_ip
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_host_port(self.host_ip_or_unspecified(), self.host_port))
    }
}

/// Join a host and a port, bracketing IPv6 literals.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Docker encodes host ports as strings; accept numbers too.
mod host_port {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u16),
    }

    pub fn serialize<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(port)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(port) => Ok(port),
            Raw::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid host port '{text}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_key_parse() {
        assert_eq!("80/tcp".parse::<PortKey>().unwrap(), PortKey::tcp(80));
        assert_eq!("53/UDP".parse::<PortKey>().unwrap(), PortKey::udp(53));
        assert_eq!("8080".parse::<PortKey>().unwrap(), PortKey::tcp(8080));
        assert!("http/tcp".parse::<PortKey>().is_err());
        assert!("80/icmp".parse::<PortKey>().is_err());
        assert!("70000/tcp".parse::<PortKey>().is_err());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(format!("{}", Protocol::Tcp), "tcp");
        assert_eq!(format!("{}", Protocol::Udp), "udp");
        assert_eq!(PortKey::udp(53).to_string(), "53/udp");
    }

    #[test]
    fn test_binding_display() {
        assert_eq!(PortBinding::new("127.0.0.2", 80).to_string(), "127.0.0.2:80");
        assert_eq!(PortBinding::new("", 443).to_string(), "0.0.0.0:443");
        assert_eq!(PortBinding::new("::1", 8080).to_string(), "[::1]:8080");
    }

    #[test]
    fn test_docker_port_map_json() {
        let json = r#"{
            "443/tcp": [{"HostIp": "127.0.0.1", "HostPort": "8443"}],
            "80/tcp": [
                {"HostIp": "0.0.0.0", "HostPort": "8080"},
                {"HostIp": "::", "HostPort": 8080}
            ]
        }"#;
        let ports: PortMap = serde_json::from_str(json).unwrap();

        assert_eq!(ports.len(), 2);
        assert_eq!(
            ports[&PortKey::tcp(80)],
            vec![PortBinding::new("0.0.0.0", 8080), PortBinding::new("::", 8080)]
        );
        assert_eq!(ports[&PortKey::tcp(443)], vec![PortBinding::new("127.0.0.1", 8443)]);

        let out = serde_json::to_value(&ports).unwrap();
        assert_eq!(out["443/tcp"][0]["HostPort"], "8443");
    }

    #[test]
    fn test_missing_host_ip_defaults_to_empty() {
        let binding: PortBinding = serde_json::from_str(r#"{"HostPort": "5432"}"#).unwrap();
        assert_eq!(binding, PortBinding::new("", 5432));
    }

    #[test]
    fn test_invalid_host_port_rejected() {
        assert!(serde_json::from_str::<PortBinding>(r#"{"HostPort": "web"}"#).is_err());
    }
}
