//! Gossip protocol: epidemic fan-out of fresh writes.
//!
//! Local writes are wrapped in a gossip message with a unique id and hop
//! count zero, queued, and pushed to every known peer. Receivers drop
//! duplicates by id, apply the entries through the resolver, and re-queue
//! the message with one more hop until the TTL runs out. Delivery is
//! best-effort; the resolver makes duplicates harmless.

use crate::client::{ClientConfig, SyncClient};
use crate::config::{
    NodeConfig, DEFAULT_MAX_HOPS, GOSSIP_CLEANUP_INTERVAL, GOSSIP_SEEN_RETENTION,
    GOSSIP_SEND_DELAY,
};
use crate::error::Result;
use crate::ingest;
use dashmap::DashMap;
use futures::future::join_all;
use meshdb_engine::{HlcClock, OplogEntry, RemotePeer, Resolver, Store};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One gossip hop: a batch of entries plus routing metadata.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    pub entries: Vec<OplogEntry>,
    pub source_node_id: String,
    pub message_id: String,
    pub hops: u32,
}

/// The gossip fan-out engine.
pub struct GossipProtocol {
    config: NodeConfig,
    store: Arc<dyn Store>,
    clock: Arc<HlcClock>,
    resolver: Resolver,
    max_hops: u32,
    peers: DashMap<String, RemotePeer>,
    seen: DashMap<String, Instant>,
    queue_tx: mpsc::UnboundedSender<GossipMessage>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<GossipMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipProtocol {
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn Store>,
        clock: Arc<HlcClock>,
        resolver: Resolver,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            clock,
            resolver,
            max_hops: DEFAULT_MAX_HOPS,
            peers: DashMap::new(),
            seen: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Override the hop limit.
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Register a peer for fan-out, keyed by node id.
    pub fn add_peer(&self, peer: RemotePeer) {
        self.peers.insert(peer.node_id.clone(), peer);
    }

    /// Remove a peer from fan-out.
    pub fn remove_peer(&self, node_id: &str) {
        self.peers.remove(node_id);
    }

    /// Number of known peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Announce fresh local writes to the mesh.
    pub fn propagate(&self, entries: Vec<OplogEntry>) {
        if entries.is_empty() {
            return;
        }
        let message_id = self.mint_message_id();
        self.seen.insert(message_id.clone(), Instant::now());
        let message = GossipMessage {
            entries,
            source_node_id: self.config.node_id.clone(),
            message_id,
            hops: 0,
        };
        let _ = self.queue_tx.send(message);
    }

    /// Handle a gossip message received from a peer: dedup, TTL check,
    /// local apply, then re-queue for onward propagation.
    pub async fn on_remote(&self, message: GossipMessage) -> Result<()> {
        if self.seen.contains_key(&message.message_id) {
            tracing::debug!(message_id = %message.message_id, "duplicate gossip dropped");
            return Ok(());
        }
        if message.hops >= self.max_hops {
            tracing::debug!(message_id = %message.message_id, hops = message.hops, "gossip ttl expired");
            return Ok(());
        }
        self.seen.insert(message.message_id.clone(), Instant::now());

        ingest::apply_remote_entries(
            &*self.store,
            &self.clock,
            &self.resolver,
            message.entries.clone(),
        )?;
        tracing::debug!(
            message_id = %message.message_id,
            hops = message.hops,
            entries = message.entries.len(),
            "gossip applied"
        );

        let _ = self.queue_tx.send(GossipMessage {
            hops: message.hops + 1,
            ..message
        });
        Ok(())
    }

    /// Spawn the queue processor and the seen-set cleanup timer.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }

        let Some(mut queue_rx) = self.queue_rx.lock().unwrap().take() else {
            return;
        };
        let gossip = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            // One message at a time, with a damping delay between sends.
            while let Some(message) = queue_rx.recv().await {
                tokio::time::sleep(GOSSIP_SEND_DELAY).await;
                gossip.fan_out(message).await;
            }
        }));

        let gossip = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GOSSIP_CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                gossip.evict_seen();
            }
        }));
    }

    /// Cancel the processor and cleanup tasks. Safe to call once.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Send one message to every peer except its source, isolating per-peer
    /// failures.
    async fn fan_out(&self, message: GossipMessage) {
        let targets: Vec<RemotePeer> = self
            .peers
            .iter()
            .filter(|entry| entry.value().node_id != message.source_node_id)
            .map(|entry| entry.value().clone())
            .collect();
        if targets.is_empty() {
            return;
        }

        let sends = targets
            .iter()
            .map(|peer| self.send_to_peer(peer, &message));
        for (peer, outcome) in targets.iter().zip(join_all(sends).await) {
            if let Err(e) = outcome {
                tracing::warn!(peer_node = %peer.node_id, error = %e, "gossip send failed");
            }
        }
        tracing::debug!(
            message_id = %message.message_id,
            hops = message.hops,
            peers = targets.len(),
            "gossip hop sent"
        );
    }

    async fn send_to_peer(&self, peer: &RemotePeer, message: &GossipMessage) -> Result<()> {
        let mut client = SyncClient::connect(ClientConfig::for_peer(
            &self.config,
            peer.host.clone(),
            peer.port,
        ))
        .await?;
        let result = client
            .push_gossip(
                &message.entries,
                &message.source_node_id,
                &message.message_id,
                message.hops,
            )
            .await;
        client.disconnect().await;
        result.map(|_| ())
    }

    /// Drop seen entries older than the retention window.
    fn evict_seen(&self) {
        let cutoff = Instant::now()
            .checked_sub(GOSSIP_SEEN_RETENTION)
            .unwrap_or_else(Instant::now);
        self.seen.retain(|_, inserted| *inserted > cutoff);
    }

    fn mint_message_id(&self) -> String {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!(
            "{}-{}-{}",
            self.config.node_id,
            now_ms,
            uuid::Uuid::new_v4().simple()
        )
    }
}
