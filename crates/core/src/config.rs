//! Configuration types shared across crates.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `server.download_timeout_secs` (30 days).
pub const MAX_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

/// Node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:1789").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Label of this node. Must differ from every peer label.
    #[serde(default = "default_label")]
    pub label: String,
    /// How long a request waits for a peer fetch before giving up, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Longest silence tolerated while reading from a peer, in seconds.
    #[serde(default = "default_peer_read_timeout_secs")]
    pub peer_read_timeout_secs: u64,
    /// Expose Prometheus metrics at /_internal/api/metrics.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:1789".to_string()
}

fn default_label() -> String {
    "local".to_string()
}

fn default_download_timeout_secs() -> u64 {
    7200 // 2 hours
}

fn default_peer_read_timeout_secs() -> u64 {
    60
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            label: default_label(),
            download_timeout_secs: default_download_timeout_secs(),
            peer_read_timeout_secs: default_peer_read_timeout_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Get the download timeout as a Duration, capped at
    /// [`MAX_DOWNLOAD_TIMEOUT_SECS`].
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs.min(MAX_DOWNLOAD_TIMEOUT_SECS))
    }

    /// Get the peer read timeout as a Duration.
    pub fn peer_read_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_read_timeout_secs)
    }
}

/// Local cache directory configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cached files.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

/// A remote node consulted on local misses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer address, "host:port" or "http://host:port".
    pub address: String,
    /// Unique label for the peer.
    pub label: String,
    /// Minimum delay between health probes after a failed probe, in seconds.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
    10
}

impl PeerConfig {
    /// Base URL of the peer, with an `http://` scheme added when missing.
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }

    /// Host part of the peer address.
    pub fn host(&self) -> crate::Result<String> {
        let base = self.base_url();
        let authority = base
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&base);
        let authority = authority.split('/').next().unwrap_or_default();

        let host = if let Some(rest) = authority.strip_prefix('[') {
            // Bracketed IPv6 literal
            rest.split_once(']').map(|(h, _)| h)
        } else {
            authority.rsplit_once(':').map(|(h, _)| h)
        };

        match host {
            Some(h) if !h.is_empty() => Ok(h.to_string()),
            _ => Err(crate::Error::Config(format!(
                "peer {} has invalid host:port address: {}",
                self.label, self.address
            ))),
        }
    }

    /// Get the probe interval as a Duration.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Access token rotation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Seconds between token rotations.
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
}

fn default_rotation_interval_secs() -> u64 {
    3600 // 1 hour
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            rotation_interval_secs: default_rotation_interval_secs(),
        }
    }
}

impl TokenConfig {
    /// Get the rotation interval as a Duration.
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }
}

/// Network access configuration.
///
/// Requests without a valid token are only accepted from these networks and
/// addresses. Peer hosts are always allowed in addition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Allowed CIDR ranges (default: the RFC 1918 private ranges).
    #[serde(default = "default_allow_nets")]
    pub allow_nets: Vec<String>,
    /// Individually allowed IP addresses.
    #[serde(default)]
    pub allow_ips: Vec<String>,
}

fn default_allow_nets() -> Vec<String> {
    vec![
        "10.0.0.0/8".to_string(),
        "172.16.0.0/12".to_string(),
        "192.168.0.0/16".to_string(),
    ]
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allow_nets: default_allow_nets(),
            allow_ips: Vec::new(),
        }
    }
}

impl AccessConfig {
    /// Parse the configured networks. An empty list falls back to the
    /// private ranges.
    pub fn networks(&self) -> crate::Result<Vec<IpNet>> {
        let nets = if self.allow_nets.is_empty() {
            default_allow_nets()
        } else {
            self.allow_nets.clone()
        };

        nets.iter()
            .map(|n| {
                n.parse::<IpNet>()
                    .map_err(|e| crate::Error::Config(format!("invalid network '{n}': {e}")))
            })
            .collect()
    }

    /// Parse the configured addresses.
    pub fn addresses(&self) -> crate::Result<Vec<IpAddr>> {
        self.allow_ips
            .iter()
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map_err(|e| crate::Error::Config(format!("invalid address '{ip}': {e}")))
            })
            .collect()
    }
}

/// Complete node configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Node configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Cache directory configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Peers consulted on local misses, in lookup order.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Token rotation configuration.
    #[serde(default)]
    pub token: TokenConfig,
    /// Network access configuration.
    #[serde(default)]
    pub access: AccessConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the loopback interface as an allowed network.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                download_timeout_secs: 30,
                ..Default::default()
            },
            cache: CacheConfig::default(),
            peers: Vec::new(),
            token: TokenConfig::default(),
            access: AccessConfig {
                allow_nets: vec!["127.0.0.0/8".to_string()],
                allow_ips: Vec::new(),
            },
        }
    }

    /// Validate configuration invariants. Any error here is fatal at startup.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.label.trim().is_empty() {
            return Err(crate::Error::Config("server.label cannot be empty".to_string()));
        }

        if self.server.download_timeout_secs == 0
            || self.server.download_timeout_secs > MAX_DOWNLOAD_TIMEOUT_SECS
        {
            return Err(crate::Error::Config(format!(
                "server.download_timeout_secs must be between 1 and {MAX_DOWNLOAD_TIMEOUT_SECS}"
            )));
        }

        if self.server.peer_read_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "server.peer_read_timeout_secs cannot be 0".to_string(),
            ));
        }

        if self.token.rotation_interval_secs == 0 {
            return Err(crate::Error::Config(
                "token.rotation_interval_secs cannot be 0".to_string(),
            ));
        }

        let mut labels = HashSet::with_capacity(self.peers.len() + 1);
        labels.insert(self.server.label.as_str());
        for peer in &self.peers {
            if peer.label.trim().is_empty() {
                return Err(crate::Error::Config(format!(
                    "peer {} has an empty label",
                    peer.address
                )));
            }
            if !labels.insert(peer.label.as_str()) {
                return Err(crate::Error::Config(format!(
                    "label {} conflict",
                    peer.label
                )));
            }
            peer.host()?;
        }

        self.access.networks()?;
        self.access.addresses()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(address: &str, label: &str) -> PeerConfig {
        PeerConfig {
            address: address.to_string(),
            label: label.to_string(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.download_timeout_secs, 7200);
        assert_eq!(config.token.rotation_interval_secs, 3600);
        assert_eq!(config.access.allow_nets.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_download_timeout_bounds() {
        let mut config = AppConfig::default();
        config.server.download_timeout_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(
            config.server.download_timeout(),
            Duration::from_secs(MAX_DOWNLOAD_TIMEOUT_SECS)
        );

        config.server.download_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.server.download_timeout_secs = MAX_DOWNLOAD_TIMEOUT_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_peer_read_timeout_rejected() {
        let mut config = AppConfig::default();
        assert_eq!(config.server.peer_read_timeout(), Duration::from_secs(60));
        config.server.peer_read_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_peer_without_interval() {
        let json = r#"{"address": "10.0.0.2:1789", "label": "dc-b"}"#;
        let peer: PeerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(peer.probe_interval_secs, 10);
        assert_eq!(peer.base_url(), "http://10.0.0.2:1789");
    }

    #[test]
    fn test_peer_host_extraction() {
        assert_eq!(peer("10.0.0.2:1789", "a").host().unwrap(), "10.0.0.2");
        assert_eq!(peer("http://cache-b:80/", "a").host().unwrap(), "cache-b");
        assert_eq!(peer("[::1]:1789", "a").host().unwrap(), "::1");
        assert!(peer("no-port", "a").host().is_err());
    }

    #[test]
    fn test_duplicate_peer_label_rejected() {
        let mut config = AppConfig::default();
        config.peers = vec![peer("10.0.0.2:1789", "b"), peer("10.0.0.3:1789", "b")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_label_equal_to_local_rejected() {
        let mut config = AppConfig::default();
        config.server.label = "a".to_string();
        config.peers = vec![peer("10.0.0.2:1789", "a")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        let mut config = AppConfig::default();
        config.access.allow_nets = vec!["10.0.0.0/33".to_string()];
        assert!(config.validate().is_err());

        config.access.allow_nets = vec!["10.0.0.0/8".to_string()];
        config.access.allow_ips = vec!["not-an-ip".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_nets_fall_back_to_private_ranges() {
        let access = AccessConfig {
            allow_nets: Vec::new(),
            allow_ips: Vec::new(),
        };
        let nets = access.networks().unwrap();
        assert_eq!(nets.len(), 3);
        assert!(nets[2].contains(&"192.168.1.10".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_zero_rotation_interval_rejected() {
        let mut config = AppConfig::default();
        config.token.rotation_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
