//! Sync orchestrator: periodically pulls the oplog from every known peer.
//!
//! Peers sync in parallel within a tick, but each peer session reads its
//! batches sequentially, so the orchestrator can never outrun the store.
//! A failing peer is logged and skipped; it neither poisons the other
//! peers nor the next tick.

use crate::client::{ClientConfig, SyncClient};
use crate::config::{NodeConfig, PULL_BATCH_SIZE};
use crate::error::Result;
use crate::ingest;
use futures::future::join_all;
use meshdb_engine::{HlcClock, RemotePeer, Resolver, Store};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodic pull scheduler over the known peer set.
pub struct SyncOrchestrator {
    config: NodeConfig,
    store: Arc<dyn Store>,
    clock: Arc<HlcClock>,
    resolver: Resolver,
    interval: Duration,
    peers: Mutex<Vec<RemotePeer>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn Store>,
        clock: Arc<HlcClock>,
        resolver: Resolver,
    ) -> Self {
        let interval = config.sync_interval;
        Self {
            config,
            store,
            clock,
            resolver,
            interval,
            peers: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        }
    }

    /// Register a peer. Duplicates (by node id) update host and port
    /// instead of multiplying sessions.
    pub fn add_peer(&self, peer: RemotePeer) {
        let mut peers = self.peers.lock().unwrap();
        match peers.iter_mut().find(|p| p.node_id == peer.node_id) {
            Some(existing) => {
                existing.host = peer.host;
                existing.port = peer.port;
                existing.last_seen = peer.last_seen;
            }
            None => {
                tracing::info!(peer_node = %peer.node_id, host = %peer.host, "peer added");
                peers.push(peer);
            }
        }
    }

    /// Drop a peer by node id.
    pub fn remove_peer(&self, node_id: &str) {
        self.peers.lock().unwrap().retain(|p| p.node_id != node_id);
    }

    /// Snapshot of the current peer set.
    pub fn peers(&self) -> Vec<RemotePeer> {
        self.peers.lock().unwrap().clone()
    }

    /// Begin ticking every `sync_interval`.
    pub fn start(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                orchestrator.sync_all().await;
            }
        }));
    }

    /// Cancel the tick timer. Safe to call once.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Run one tick: sync every enabled peer in parallel.
    pub async fn sync_all(&self) {
        let peers: Vec<_> = self
            .peers()
            .into_iter()
            .filter(|p| p.enabled)
            .collect();
        if peers.is_empty() {
            return;
        }

        let sessions = peers.iter().map(|peer| self.sync_peer(peer));
        for (peer, outcome) in peers.iter().zip(join_all(sessions).await) {
            match outcome {
                Ok(pulled) if pulled > 0 => {
                    tracing::debug!(peer_node = %peer.node_id, pulled, "sync tick complete");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(peer_node = %peer.node_id, error = %e, "sync with peer failed");
                }
            }
        }
    }

    /// Pull everything a peer has that we have not seen.
    async fn sync_peer(&self, peer: &RemotePeer) -> Result<usize> {
        let mut client =
            SyncClient::connect(ClientConfig::for_peer(&self.config, peer.host.clone(), peer.port))
                .await?;

        let mut total = 0usize;
        let result = async {
            loop {
                let since = self.store.latest_timestamp()?;
                let (entries, has_more) =
                    client.pull_changes(&since, PULL_BATCH_SIZE).await?;
                if entries.is_empty() {
                    break;
                }
                total += ingest::apply_remote_entries(
                    &*self.store,
                    &self.clock,
                    &self.resolver,
                    entries,
                )?;
                if !has_more {
                    break;
                }
            }
            Ok(total)
        }
        .await;

        client.disconnect().await;
        result
    }
}
