//! Configuration management for the sync node.

use std::env;
use std::time::Duration;

/// Pull batch size for sync exchanges.
pub const PULL_BATCH_SIZE: usize = 100;
/// Deadline for any single request or handshake exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between orchestrator pull ticks.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);
/// Default gossip hop limit.
pub const DEFAULT_MAX_HOPS: u32 = 3;
/// Delay between gossip sends, dampening fan-out storms.
pub const GOSSIP_SEND_DELAY: Duration = Duration::from_millis(100);
/// How long gossip message ids are remembered.
pub const GOSSIP_SEEN_RETENTION: Duration = Duration::from_secs(300);
/// Period of the gossip seen-set cleanup timer.
pub const GOSSIP_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Interval between discovery broadcasts.
pub const DISCOVERY_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
/// Interval between leader elections.
pub const ELECTION_INTERVAL: Duration = Duration::from_secs(5);
/// Payloads above this size are brotli-compressed when negotiated.
pub const COMPRESSION_THRESHOLD: usize = 1024;
/// Brotli quality for sync payloads.
pub const BROTLI_QUALITY: u32 = 4;

/// Node configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's unique identifier
    pub node_id: String,
    /// Bind address for the sync server
    pub host: String,
    /// Sync server port
    pub port: u16,
    /// Shared cluster secret presented and validated during handshakes
    pub cluster_secret: String,
    /// Whether connections negotiate the encrypted channel
    pub encryption: bool,
    /// Whether brotli compression is offered/accepted
    pub compression: bool,
    /// Interval between orchestrator pull ticks
    pub sync_interval: Duration,
    /// UDP port used for LAN discovery broadcasts
    pub discovery_port: u16,
    /// Statically configured peers as `(host, port, node_id)` triples
    pub static_peers: Vec<(String, u16, String)>,
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_id = env::var("MESHDB_NODE_ID").map_err(|_| ConfigError::MissingNodeId)?;
        if node_id.is_empty() {
            return Err(ConfigError::MissingNodeId);
        }

        let host = env::var("MESHDB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("MESHDB_PORT")
            .unwrap_or_else(|_| "7400".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let discovery_port = env::var("MESHDB_DISCOVERY_PORT")
            .unwrap_or_else(|_| "7401".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let cluster_secret = env::var("MESHDB_CLUSTER_SECRET").unwrap_or_default();

        let encryption = env_flag("MESHDB_ENCRYPTION", true);
        let compression = env_flag("MESHDB_COMPRESSION", true);

        let sync_interval = env::var("MESHDB_SYNC_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SYNC_INTERVAL);

        let static_peers = match env::var("MESHDB_STATIC_PEERS") {
            Ok(v) => parse_static_peers(&v)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            node_id,
            host,
            port,
            cluster_secret,
            encryption,
            compression,
            sync_interval,
            discovery_port,
            static_peers,
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => !matches!(v.as_str(), "0" | "false" | "off"),
        Err(_) => default,
    }
}

/// Parse `host:port:nodeId` triples separated by commas.
fn parse_static_peers(raw: &str) -> Result<Vec<(String, u16, String)>, ConfigError> {
    let mut peers = Vec::new();
    for item in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let mut parts = item.trim().splitn(3, ':');
        let host = parts.next().unwrap_or_default().to_string();
        let port = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(ConfigError::InvalidPort)?;
        let node_id = parts.next().unwrap_or_default().to_string();
        peers.push((host, port, node_id));
    }
    Ok(peers)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MESHDB_NODE_ID environment variable is required")]
    MissingNodeId,

    #[error("invalid port value")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_peer_parsing() {
        let peers = parse_static_peers("10.0.0.2:7400:node-b, 10.0.0.3:7400:node-c").unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], ("10.0.0.2".to_string(), 7400, "node-b".to_string()));
        assert_eq!(peers[1].2, "node-c");
    }

    #[test]
    fn static_peer_parsing_rejects_bad_port() {
        assert!(parse_static_peers("10.0.0.2:x:node-b").is_err());
    }

    #[test]
    fn empty_static_peer_list() {
        assert!(parse_static_peers("").unwrap().is_empty());
    }
}
