//! Node configuration: TOML file with command line overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use eyre::{Result, WrapErr};
use peerlink_net::{Endpoint, PeerLinkConfig};
use peerlink_net_tcp::TcpConfig;
use serde::{Deserialize, Serialize};

use crate::cli::NodeArgs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct NodeConfig {
    pub(crate) link: PeerLinkConfig,
    pub(crate) tcp: TcpConfig,
    /// Seconds between heartbeats, 0 disables.
    pub(crate) heartbeat_interval: u64,
    /// Peers dialed at startup.
    pub(crate) peers: Vec<Endpoint>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            link: PeerLinkConfig::default(),
            tcp: TcpConfig::default(),
            heartbeat_interval: default_heartbeat_interval(),
            peers: Vec::new(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    15
}

impl NodeConfig {
    /// Load from `path`, or defaults when no file is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse config: {}", path.display()))
    }

    /// Apply command line arguments to override the configuration
    pub(crate) fn apply_args(&mut self, args: &NodeArgs) {
        if let Some(listen) = args.listen {
            self.link.listen = Some(listen);
        }
        if args.allow_multi {
            self.link.allow_multi = true;
        }
        if let Some(secs) = args.disconnect_timeout {
            self.link.disconnect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = args.connect_timeout {
            self.tcp.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = args.heartbeat_interval {
            self.heartbeat_interval = secs;
        }
        for peer in &args.peers {
            if !self.peers.contains(peer) {
                self.peers.push(*peer);
            }
        }
    }

    /// Resolve the configuration for `args`: file first, then flags.
    pub(crate) fn from_args(args: &NodeArgs) -> Result<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_args(args);
        Ok(config)
    }

    pub(crate) fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_interval > 0).then(|| Duration::from_secs(self.heartbeat_interval))
    }

    pub(crate) fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_then_flags() {
        let mut config: NodeConfig = toml::from_str(
            r#"
            heartbeat_interval = 0
            peers = ["10.0.0.2:7000"]

            [link]
            listen = "0.0.0.0:7000"

            [tcp]
            connect_timeout = 2
            "#,
        )
        .unwrap();
        assert!(config.heartbeat().is_none());
        assert!(!config.link.allow_multi);
        assert_eq!(config.tcp.connect_timeout, Duration::from_secs(2));

        let args = NodeArgs {
            allow_multi: true,
            disconnect_timeout: Some(4),
            peers: vec!["10.0.0.2:7000".parse().unwrap(), "10.0.0.3:7000".parse().unwrap()],
            ..Default::default()
        };
        config.apply_args(&args);

        assert!(config.link.allow_multi);
        assert_eq!(config.link.disconnect_timeout, Duration::from_secs(4));
        assert_eq!(config.link.listen, Some("0.0.0.0:7000".parse().unwrap()));
        assert_eq!(config.peers.len(), 2);
    }

    #[test]
    fn test_effective_config_roundtrips() {
        let config = NodeConfig::default();
        let encoded = config.to_toml().unwrap();
        assert_eq!(toml::from_str::<NodeConfig>(&encoded).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(NodeConfig::load(Some(Path::new("/nonexistent/peerlink.toml"))).is_err());
    }
}
