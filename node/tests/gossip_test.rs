//! Integration tests for gossip propagation.
//!
//! Three real nodes on loopback form a triangle; one write gossips out and
//! every node converges while duplicates and TTL-expired hops are dropped.

use meshdb_engine::{
    Document, HlcClock, HlcTimestamp, MemoryStore, OplogEntry, RemotePeer, Resolver, Store,
};
use meshdb_node::{GossipProtocol, NodeConfig, SyncServer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct GossipNode {
    config: NodeConfig,
    store: Arc<MemoryStore>,
    gossip: Arc<GossipProtocol>,
    handle: meshdb_node::ServerHandle,
}

async fn spawn_gossip_node(node_id: &str) -> GossipNode {
    let config = NodeConfig {
        node_id: node_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        cluster_secret: "secret".to_string(),
        encryption: false,
        compression: false,
        sync_interval: Duration::from_secs(5),
        discovery_port: 0,
        static_peers: Vec::new(),
    };
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(HlcClock::new(node_id));
    let resolver = Resolver::default();

    let server = Arc::new(SyncServer::new(
        &config,
        store.clone() as Arc<dyn Store>,
        clock.clone(),
        resolver,
    ));
    let handle = server.start("127.0.0.1:0").await.unwrap();

    let gossip = Arc::new(GossipProtocol::new(
        config.clone(),
        store.clone() as Arc<dyn Store>,
        clock,
        resolver,
    ));
    gossip.start();
    server.attach_gossip(gossip.clone());

    GossipNode {
        config,
        store,
        gossip,
        handle,
    }
}

fn wire_triangle(nodes: &[&GossipNode]) {
    for node in nodes {
        for other in nodes {
            if node.config.node_id != other.config.node_id {
                node.gossip.add_peer(RemotePeer::static_remote(
                    other.config.node_id.clone(),
                    "127.0.0.1",
                    other.handle.local_addr().port(),
                ));
            }
        }
    }
}

async fn wait_for_doc(store: &MemoryStore, collection: &str, key: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if store.document(collection, key).unwrap().is_some() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "gossip did not converge"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn triangle_converges_with_exactly_one_application() {
    let a = spawn_gossip_node("A").await;
    let b = spawn_gossip_node("B").await;
    let c = spawn_gossip_node("C").await;
    wire_triangle(&[&a, &b, &c]);

    // A writes locally, then announces the fresh entry.
    let stamp = HlcTimestamp::new(100, 0, "A");
    let doc = Document::new(
        "users",
        "alice",
        json!({"name": "Alice"}).to_string(),
        stamp.clone(),
    );
    a.store.put_document(doc).unwrap();
    a.gossip.propagate(vec![OplogEntry::put(
        "users",
        "alice",
        json!({"name": "Alice"}).to_string(),
        stamp,
    )]);

    wait_for_doc(&b.store, "users", "alice").await;
    wait_for_doc(&c.store, "users", "alice").await;

    // Give the relayed hops time to bounce around; dedup must hold the
    // entry count at exactly one application per node.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(a.store.oplog_len(), 1);
    assert_eq!(b.store.oplog_len(), 1);
    assert_eq!(c.store.oplog_len(), 1);

    for node in [&a, &b, &c] {
        node.gossip.stop();
        node.handle.stop();
    }
}

#[tokio::test]
async fn hop_limit_stops_propagation() {
    let a = spawn_gossip_node("A").await;
    let b = spawn_gossip_node("B").await;
    wire_triangle(&[&a, &b]);

    // A message already at the hop limit is dropped by the receiver and
    // never applied.
    let expired = meshdb_node::GossipMessage {
        entries: vec![OplogEntry::put(
            "users",
            "zoe",
            json!({}).to_string(),
            HlcTimestamp::new(50, 0, "X"),
        )],
        source_node_id: "X".to_string(),
        message_id: "X-1-abc".to_string(),
        hops: 3,
    };
    b.gossip.on_remote(expired).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(b.store.document("users", "zoe").unwrap().is_none());
    assert!(a.store.document("users", "zoe").unwrap().is_none());

    for node in [&a, &b] {
        node.gossip.stop();
        node.handle.stop();
    }
}

#[tokio::test]
async fn seen_set_suppresses_redelivered_copies() {
    let a = spawn_gossip_node("A").await;

    let first = meshdb_node::GossipMessage {
        entries: vec![OplogEntry::put(
            "users",
            "dup",
            json!({"v": 1}).to_string(),
            HlcTimestamp::new(100, 0, "B"),
        )],
        source_node_id: "B".to_string(),
        message_id: "B-100-echo".to_string(),
        hops: 0,
    };
    a.gossip.on_remote(first).await.unwrap();
    assert_eq!(a.store.oplog_len(), 1);

    // The same message id routed back (with different content, even) is
    // dropped outright by the seen set.
    let echoed = meshdb_node::GossipMessage {
        entries: vec![OplogEntry::put(
            "users",
            "dup2",
            json!({"v": 2}).to_string(),
            HlcTimestamp::new(200, 0, "B"),
        )],
        source_node_id: "C".to_string(),
        message_id: "B-100-echo".to_string(),
        hops: 1,
    };
    a.gossip.on_remote(echoed).await.unwrap();
    assert_eq!(a.store.oplog_len(), 1);
    assert!(a.store.document("users", "dup2").unwrap().is_none());

    a.gossip.stop();
    a.handle.stop();
}
