//! LAN peer discovery over UDP broadcast.
//!
//! Each instance owns its own pair of sockets: a broadcaster announcing
//! `{nodeId, port}` every few seconds, and a listener surfacing peer
//! observations. Broadcasts originating from this node are noise and are
//! ignored. Observations feed the orchestrator, gossip and the election.

use crate::config::{NodeConfig, DISCOVERY_BROADCAST_INTERVAL};
use crate::error::Result;
use dashmap::DashMap;
use meshdb_engine::RemotePeer;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The broadcast announcement payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Announcement {
    node_id: String,
    port: u16,
}

/// A peer sighting surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerObservation {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

/// Per-instance LAN discovery adapter.
pub struct Discovery {
    node_id: String,
    sync_port: u16,
    discovery_port: u16,
    peers: DashMap<String, RemotePeer>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            node_id: config.node_id.clone(),
            sync_port: config.port,
            discovery_port: config.discovery_port,
            peers: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bind the sockets and start broadcasting and listening. Returns the
    /// observation stream.
    pub async fn start(
        self: &Arc<Self>,
    ) -> Result<mpsc::UnboundedReceiver<PeerObservation>> {
        let listen = UdpSocket::bind(("0.0.0.0", self.discovery_port)).await?;
        let announce = UdpSocket::bind(("0.0.0.0", 0)).await?;
        announce.set_broadcast(true)?;

        tracing::info!(
            node_id = %self.node_id,
            port = self.discovery_port,
            "discovery listening"
        );

        let (observations_tx, observations_rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock().unwrap();

        let discovery = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let payload = match serde_json::to_vec(&Announcement {
                node_id: discovery.node_id.clone(),
                port: discovery.sync_port,
            }) {
                Ok(p) => p,
                Err(_) => return,
            };
            let target: SocketAddr = ([255, 255, 255, 255], discovery.discovery_port).into();
            let mut ticker = tokio::time::interval(DISCOVERY_BROADCAST_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = announce.send_to(&payload, target).await {
                    tracing::debug!(error = %e, "discovery broadcast failed");
                }
            }
        }));

        let discovery = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, from)) = listen.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(announcement) = serde_json::from_slice::<Announcement>(&buf[..len]) else {
                    continue;
                };
                // Our own broadcasts come back; skip them.
                if announcement.node_id == discovery.node_id {
                    continue;
                }
                let observation = PeerObservation {
                    node_id: announcement.node_id,
                    host: from.ip().to_string(),
                    port: announcement.port,
                };
                discovery.observe(&observation);
                if observations_tx.send(observation).is_err() {
                    break;
                }
            }
        }));

        Ok(observations_rx)
    }

    /// Record a sighting in the live peer map.
    pub(crate) fn observe(&self, observation: &PeerObservation) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let fresh = !self.peers.contains_key(&observation.node_id);
        self.peers.insert(
            observation.node_id.clone(),
            RemotePeer::lan(
                observation.node_id.clone(),
                observation.host.clone(),
                observation.port,
                now_ms,
            ),
        );
        if fresh {
            tracing::info!(
                peer_node = %observation.node_id,
                host = %observation.host,
                "lan peer discovered"
            );
        }
    }

    /// Live LAN peers observed so far.
    pub fn lan_peers(&self) -> Vec<RemotePeer> {
        self.peers.iter().map(|e| e.value().clone()).collect()
    }

    /// Stop broadcasting and listening, releasing both sockets.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}
