//! Integration tests for the sync protocol.
//!
//! Each test spins up real nodes on loopback sockets: a store, a clock and
//! a sync server per node, with clients or the orchestrator driving the
//! exchanges.

use meshdb_engine::{Document, HlcClock, HlcTimestamp, MemoryStore, Resolver, Store};
use meshdb_node::{
    ClientConfig, NodeConfig, SyncClient, SyncError, SyncOrchestrator, SyncServer,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct TestNode {
    config: NodeConfig,
    store: Arc<MemoryStore>,
    clock: Arc<HlcClock>,
    handle: meshdb_node::ServerHandle,
}

fn node_config(node_id: &str, secret: &str, encryption: bool) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        cluster_secret: secret.to_string(),
        encryption,
        compression: true,
        sync_interval: Duration::from_millis(200),
        discovery_port: 0,
        static_peers: Vec::new(),
    }
}

/// Start a node's server on an ephemeral loopback port.
async fn spawn_node(node_id: &str, secret: &str, encryption: bool) -> TestNode {
    let config = node_config(node_id, secret, encryption);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(HlcClock::new(node_id));
    let server = Arc::new(SyncServer::new(
        &config,
        store.clone() as Arc<dyn Store>,
        clock.clone(),
        Resolver::default(),
    ));
    let handle = server.start("127.0.0.1:0").await.unwrap();
    TestNode {
        config,
        store,
        clock,
        handle,
    }
}

fn client_config(from: &TestNode, to: &TestNode) -> ClientConfig {
    ClientConfig {
        node_id: from.config.node_id.clone(),
        host: "127.0.0.1".to_string(),
        port: to.handle.local_addr().port(),
        auth_token: to.config.cluster_secret.clone(),
        encryption: to.config.encryption,
        compression: true,
    }
}

fn orchestrator_for(node: &TestNode) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        node.config.clone(),
        node.store.clone() as Arc<dyn Store>,
        node.clock.clone(),
        Resolver::default(),
    ))
}

fn peer_of(node: &TestNode) -> meshdb_engine::RemotePeer {
    meshdb_engine::RemotePeer::static_remote(
        node.config.node_id.clone(),
        "127.0.0.1",
        node.handle.local_addr().port(),
    )
}

#[tokio::test]
async fn two_node_pull_convergence() {
    let a = spawn_node("A", "secret", false).await;
    let b = spawn_node("B", "secret", false).await;

    let stamp = HlcTimestamp::new(100, 0, "A");
    a.store
        .put_document(Document::new(
            "users",
            "alice",
            json!({"name": "Alice", "age": 30}).to_string(),
            stamp.clone(),
        ))
        .unwrap();

    let orchestrator = orchestrator_for(&b);
    orchestrator.add_peer(peer_of(&a));
    orchestrator.sync_all().await;

    let doc = b.store.document("users", "alice").unwrap().unwrap();
    assert_eq!(doc.json(), Some(json!({"name": "Alice", "age": 30})));
    assert_eq!(doc.timestamp, stamp);
    assert_eq!(b.store.latest_timestamp().unwrap(), stamp);

    a.handle.stop();
    b.handle.stop();
}

#[tokio::test]
async fn periodic_orchestrator_converges_within_interval() {
    let a = spawn_node("A", "secret", false).await;
    let b = spawn_node("B", "secret", false).await;

    a.store
        .put_document(Document::new(
            "users",
            "alice",
            json!({"name": "Alice"}).to_string(),
            HlcTimestamp::new(100, 0, "A"),
        ))
        .unwrap();

    let orchestrator = orchestrator_for(&b);
    orchestrator.add_peer(peer_of(&a));
    orchestrator.start();

    // The 200 ms tick interval should converge well within a second.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if b.store.document("users", "alice").unwrap().is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "did not converge");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    orchestrator.stop();
    a.handle.stop();
    b.handle.stop();
}

#[tokio::test]
async fn bidirectional_override() {
    let a = spawn_node("A", "secret", false).await;
    let b = spawn_node("B", "secret", false).await;

    a.store
        .put_document(Document::new(
            "users",
            "alice",
            json!({"name": "Alice", "age": 30}).to_string(),
            HlcTimestamp::new(100, 0, "A"),
        ))
        .unwrap();

    // B pulls A's write, then overrides it with a newer one.
    let orchestrator_b = orchestrator_for(&b);
    orchestrator_b.add_peer(peer_of(&a));
    orchestrator_b.sync_all().await;

    let b_stamp = HlcTimestamp::new(200, 0, "B");
    b.store
        .put_document(Document::new(
            "users",
            "alice",
            json!({"name": "Alice Updated", "age": 31}).to_string(),
            b_stamp.clone(),
        ))
        .unwrap();

    // A pulls from B and adopts the override.
    let orchestrator_a = orchestrator_for(&a);
    orchestrator_a.add_peer(peer_of(&b));
    orchestrator_a.sync_all().await;

    let doc = a.store.document("users", "alice").unwrap().unwrap();
    assert_eq!(doc.json(), Some(json!({"name": "Alice Updated", "age": 31})));
    assert_eq!(doc.timestamp, b_stamp);

    a.handle.stop();
    b.handle.stop();
}

#[tokio::test]
async fn delete_propagation() {
    let a = spawn_node("A", "secret", false).await;
    let b = spawn_node("B", "secret", false).await;

    a.store
        .put_document(Document::new(
            "users",
            "bob",
            json!({"name": "Bob"}).to_string(),
            HlcTimestamp::new(100, 0, "A"),
        ))
        .unwrap();

    let orchestrator = orchestrator_for(&b);
    orchestrator.add_peer(peer_of(&a));
    orchestrator.sync_all().await;
    assert!(b.store.document("users", "bob").unwrap().unwrap().is_active());

    let delete_stamp = HlcTimestamp::new(300, 0, "A");
    a.store
        .delete_document("users", "bob", delete_stamp.clone())
        .unwrap();
    orchestrator.sync_all().await;

    let doc = b.store.document("users", "bob").unwrap().unwrap();
    assert!(doc.tombstone);
    assert!(doc.data.is_empty());
    assert_eq!(doc.timestamp, delete_stamp);

    a.handle.stop();
    b.handle.stop();
}

#[tokio::test]
async fn handshake_rejection_surfaces_auth_error() {
    let server = spawn_node("S", "good", false).await;

    let mut bad = client_config(&server, &server);
    bad.node_id = "C".to_string();
    bad.auth_token = "bad".to_string();
    let result = SyncClient::connect(bad).await;
    assert!(matches!(result, Err(SyncError::Auth(_))));

    // The server keeps accepting: a correct token connects right after.
    let mut good = client_config(&server, &server);
    good.node_id = "C".to_string();
    let mut client = SyncClient::connect(good).await.unwrap();
    let (entries, has_more) = client
        .pull_changes(&HlcTimestamp::zero(), 100)
        .await
        .unwrap();
    assert!(entries.is_empty());
    assert!(!has_more);
    client.disconnect().await;

    server.handle.stop();
}

#[tokio::test]
async fn encrypted_channel_syncs_and_compresses() {
    let a = spawn_node("A", "secret", true).await;
    let b = spawn_node("B", "secret", true).await;

    // A payload well over the compression threshold.
    let big_text: String = "meshdb ".repeat(400);
    a.store
        .put_document(Document::new(
            "docs",
            "big",
            json!({"text": big_text}).to_string(),
            HlcTimestamp::new(100, 0, "A"),
        ))
        .unwrap();

    let orchestrator = orchestrator_for(&b);
    orchestrator.add_peer(peer_of(&a));
    orchestrator.sync_all().await;

    let doc = b.store.document("docs", "big").unwrap().unwrap();
    assert_eq!(doc.json().unwrap()["text"], json!(big_text));

    a.handle.stop();
    b.handle.stop();
}

#[tokio::test]
async fn pull_pages_through_large_oplogs() {
    let a = spawn_node("A", "secret", false).await;
    let b = spawn_node("B", "secret", false).await;

    // 250 writes: three pull pages at the batch size of 100.
    for i in 0..250u64 {
        a.store
            .put_document(Document::new(
                "items",
                format!("item-{i}"),
                json!({"n": i}).to_string(),
                a.clock.now(),
            ))
            .unwrap();
    }

    let orchestrator = orchestrator_for(&b);
    orchestrator.add_peer(peer_of(&a));
    orchestrator.sync_all().await;

    assert_eq!(b.store.oplog_len(), 250);
    assert_eq!(
        b.store.latest_timestamp().unwrap(),
        a.store.latest_timestamp().unwrap()
    );

    a.handle.stop();
    b.handle.stop();
}

#[tokio::test]
async fn push_applies_through_the_resolver() {
    let server = spawn_node("S", "secret", false).await;

    // Existing newer local state on the server.
    let newer = HlcTimestamp::new(500, 0, "S");
    server
        .store
        .put_document(Document::new(
            "users",
            "alice",
            json!({"v": "newer"}).to_string(),
            newer.clone(),
        ))
        .unwrap();

    let mut cfg = client_config(&server, &server);
    cfg.node_id = "C".to_string();
    let mut client = SyncClient::connect(cfg).await.unwrap();

    let stale = meshdb_engine::OplogEntry::put(
        "users",
        "alice",
        json!({"v": "stale"}).to_string(),
        HlcTimestamp::new(100, 0, "C"),
    );
    let fresh = meshdb_engine::OplogEntry::put(
        "users",
        "carol",
        json!({"v": "fresh"}).to_string(),
        HlcTimestamp::new(600, 0, "C"),
    );
    assert!(client.push_changes(&[stale, fresh]).await.unwrap());
    client.disconnect().await;

    // The stale write lost; the fresh one landed; the clock saw both.
    let alice = server.store.document("users", "alice").unwrap().unwrap();
    assert_eq!(alice.json(), Some(json!({"v": "newer"})));
    assert!(server.store.document("users", "carol").unwrap().is_some());
    assert!(server.clock.now() > HlcTimestamp::new(600, 0, "C"));

    server.handle.stop();
}

#[tokio::test]
async fn malformed_session_only_kills_that_connection() {
    use tokio::io::AsyncWriteExt;

    let server = spawn_node("S", "secret", false).await;
    let addr = server.handle.local_addr();

    // A raw socket that speaks garbage instead of a handshake frame.
    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    raw.write_all(&[0xFF; 64]).await.unwrap();
    drop(raw);

    // The server still serves well-behaved clients.
    let mut cfg = client_config(&server, &server);
    cfg.node_id = "C".to_string();
    let client = SyncClient::connect(cfg).await;
    assert!(client.is_ok());

    server.handle.stop();
}
