//! Cloud-gateway election among LAN peers.
//!
//! Bully-style over node ids: the lexicographically smallest id among the
//! LAN-discovered peers (plus this node) is the gateway. Elections run
//! immediately on start and then on a fixed interval; subscribers are
//! notified only when this node's gateway role flips.

use crate::config::ELECTION_INTERVAL;
use crate::discovery::Discovery;
use meshdb_engine::PeerKind;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic gateway election over discovery's live peer set.
pub struct LeaderElection {
    node_id: String,
    discovery: Arc<Discovery>,
    current_gateway: Mutex<Option<String>>,
    is_gateway_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElection {
    pub fn new(node_id: impl Into<String>, discovery: Arc<Discovery>) -> Self {
        let (is_gateway_tx, _) = watch::channel(false);
        Self {
            node_id: node_id.into(),
            discovery,
            current_gateway: Mutex::new(None),
            is_gateway_tx,
            task: Mutex::new(None),
        }
    }

    /// Subscribe to gateway-role flips. The receiver yields the current
    /// role immediately and then only on change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.is_gateway_tx.subscribe()
    }

    /// Whether this node is currently the gateway.
    pub fn is_gateway(&self) -> bool {
        *self.is_gateway_tx.borrow()
    }

    /// The node id of the current gateway, if an election has run.
    pub fn current_gateway(&self) -> Option<String> {
        self.current_gateway.lock().unwrap().clone()
    }

    /// Run one election round.
    pub fn elect(&self) {
        let mut candidates: Vec<String> = self
            .discovery
            .lan_peers()
            .into_iter()
            .filter(|p| p.kind == PeerKind::LanDiscovered)
            .map(|p| p.node_id)
            .collect();
        candidates.push(self.node_id.clone());

        // Lexicographically smallest id wins.
        let leader = candidates
            .into_iter()
            .min()
            .unwrap_or_else(|| self.node_id.clone());

        let mut current = self.current_gateway.lock().unwrap();
        if current.as_deref() != Some(leader.as_str()) {
            tracing::info!(gateway = %leader, "cloud gateway changed");
            *current = Some(leader.clone());
        }
        drop(current);

        let is_self = leader == self.node_id;
        self.is_gateway_tx.send_if_modified(|was| {
            if *was != is_self {
                tracing::info!(is_gateway = is_self, "gateway role flipped");
                *was = is_self;
                true
            } else {
                false
            }
        });
    }

    /// Start with an immediate election, then re-elect on the interval.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let election = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ELECTION_INTERVAL);
            loop {
                ticker.tick().await; // first tick fires immediately
                election.elect();
            }
        }));
    }

    /// Cancel the election timer. Safe to call once.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}
