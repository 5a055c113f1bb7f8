//! meshdb node daemon.
//!
//! Wires the store, clock and all sync components together from environment
//! configuration, then runs until interrupted. Peers arrive from static
//! configuration and LAN discovery; both feed the orchestrator and gossip.

use meshdb_engine::{HlcClock, MemoryStore, RemotePeer, Resolver, Store};
use meshdb_node::{
    Discovery, GossipProtocol, LeaderElection, NodeConfig, SyncOrchestrator, SyncServer,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshdb_node=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = NodeConfig::from_env()?;

    tracing::info!(
        node_id = %config.node_id,
        "starting meshdb node on {}:{}",
        config.host,
        config.port
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.initialize()?;
    let clock = Arc::new(HlcClock::new(config.node_id.clone()));
    let resolver = Resolver::default();

    // Sync server
    let server = Arc::new(SyncServer::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&clock),
        resolver,
    ));
    let server_handle = server
        .start(&format!("{}:{}", config.host, config.port))
        .await?;

    // Gossip fan-out, fed by the server's gossip-tagged pushes
    let gossip = Arc::new(GossipProtocol::new(
        config.clone(),
        Arc::clone(&store),
        Arc::clone(&clock),
        resolver,
    ));
    gossip.start();
    server.attach_gossip(Arc::clone(&gossip));

    // Periodic pull orchestration
    let orchestrator = Arc::new(SyncOrchestrator::new(
        config.clone(),
        Arc::clone(&store),
        Arc::clone(&clock),
        resolver,
    ));
    for (host, port, node_id) in &config.static_peers {
        let peer = RemotePeer::static_remote(node_id.clone(), host.clone(), *port);
        store.save_remote_peer(peer.clone())?;
        orchestrator.add_peer(peer.clone());
        gossip.add_peer(peer);
    }
    orchestrator.start();

    // LAN discovery feeds peers into everything else
    let discovery = Arc::new(Discovery::new(&config));
    let mut observations = discovery.start().await?;
    {
        let store = Arc::clone(&store);
        let orchestrator = Arc::clone(&orchestrator);
        let gossip = Arc::clone(&gossip);
        tokio::spawn(async move {
            while let Some(obs) = observations.recv().await {
                let peer = RemotePeer::lan(obs.node_id, obs.host, obs.port, 0);
                if let Err(e) = store.save_remote_peer(peer.clone()) {
                    tracing::warn!(error = %e, "failed to persist discovered peer");
                }
                orchestrator.add_peer(peer.clone());
                gossip.add_peer(peer);
            }
        });
    }

    // Gateway election over the LAN peer set
    let election = Arc::new(LeaderElection::new(
        config.node_id.clone(),
        Arc::clone(&discovery),
    ));
    election.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    election.stop();
    discovery.stop();
    orchestrator.stop();
    gossip.stop();
    server_handle.stop();
    store.close()?;

    Ok(())
}
