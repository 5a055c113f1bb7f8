//! Document, oplog and peer entities.
//!
//! A document is the unit of storage and of conflict resolution; its
//! identity is `(collection, key)`. Deletion is modeled as a tombstone so
//! that the deletion itself replicates with its timestamp.

use crate::{CollectionName, DocumentKey, HlcTimestamp, NodeId};
use serde::{Deserialize, Serialize};

/// A JSON document in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Collection this document belongs to
    pub collection: CollectionName,
    /// Unique key within the collection
    pub key: DocumentKey,
    /// UTF-8 JSON text of the payload; empty when tombstoned
    pub data: String,
    /// Timestamp of the write that produced this state
    pub timestamp: HlcTimestamp,
    /// Soft delete flag
    pub tombstone: bool,
}

impl Document {
    /// Create a live document.
    pub fn new(
        collection: impl Into<CollectionName>,
        key: impl Into<DocumentKey>,
        data: impl Into<String>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data: data.into(),
            timestamp,
            tombstone: false,
        }
    }

    /// Create a tombstone marking the key as deleted at `timestamp`.
    pub fn tombstone(
        collection: impl Into<CollectionName>,
        key: impl Into<DocumentKey>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data: String::new(),
            timestamp,
            tombstone: true,
        }
    }

    /// Check if the document is live (not deleted).
    pub fn is_active(&self) -> bool {
        !self.tombstone
    }

    /// Parse the payload as JSON. Tombstones yield `None`.
    pub fn json(&self) -> Option<serde_json::Value> {
        if self.tombstone || self.data.is_empty() {
            return None;
        }
        serde_json::from_str(&self.data).ok()
    }
}

/// The kind of write an oplog entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Put,
    Delete,
}

impl OpKind {
    /// Wire name of the operation, as exchanged between peers.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Put => "put",
            OpKind::Delete => "delete",
        }
    }

    /// Parse a wire name; anything unknown is treated as a put.
    pub fn parse(s: &str) -> Self {
        match s {
            "delete" => OpKind::Delete,
            _ => OpKind::Put,
        }
    }
}

/// An append-only operation log entry. Entries are never mutated; the oplog
/// under HLC order is the replication channel between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OplogEntry {
    /// Collection the write targeted
    pub collection: CollectionName,
    /// Key the write targeted
    pub key: DocumentKey,
    /// UTF-8 JSON text of the payload; empty for deletes
    pub data: String,
    /// Timestamp of the write
    pub timestamp: HlcTimestamp,
    /// Whether this was a put or a delete
    pub operation: OpKind,
}

impl OplogEntry {
    /// Build the entry recording a put.
    pub fn put(
        collection: impl Into<CollectionName>,
        key: impl Into<DocumentKey>,
        data: impl Into<String>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data: data.into(),
            timestamp,
            operation: OpKind::Put,
        }
    }

    /// Build the entry recording a delete.
    pub fn delete(
        collection: impl Into<CollectionName>,
        key: impl Into<DocumentKey>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data: String::new(),
            timestamp,
            operation: OpKind::Delete,
        }
    }
}

/// How a remote peer became known to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerKind {
    /// Observed via LAN discovery broadcasts
    LanDiscovered,
    /// Statically configured
    StaticRemote,
    /// A configured cloud endpoint
    CloudRemote,
}

/// A known remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePeer {
    /// The peer's node id
    pub node_id: NodeId,
    /// Reachable host
    pub host: String,
    /// Sync server port
    pub port: u16,
    /// How this peer became known
    pub kind: PeerKind,
    /// Milliseconds since epoch of the last observation
    pub last_seen: u64,
    /// Whether the orchestrator should sync with it
    pub enabled: bool,
}

impl RemotePeer {
    /// Register a peer observed on the LAN.
    pub fn lan(node_id: impl Into<NodeId>, host: impl Into<String>, port: u16, seen: u64) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            kind: PeerKind::LanDiscovered,
            last_seen: seen,
            enabled: true,
        }
    }

    /// Register a statically configured peer.
    pub fn static_remote(node_id: impl Into<NodeId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            kind: PeerKind::StaticRemote,
            last_seen: 0,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_document() {
        let ts = HlcTimestamp::new(100, 0, "node-a");
        let doc = Document::new("users", "alice", r#"{"name":"Alice"}"#, ts.clone());

        assert_eq!(doc.collection, "users");
        assert_eq!(doc.key, "alice");
        assert!(doc.is_active());
        assert_eq!(doc.json(), Some(json!({"name": "Alice"})));
        assert_eq!(doc.timestamp, ts);
    }

    #[test]
    fn tombstone_has_empty_data() {
        let ts = HlcTimestamp::new(300, 0, "node-a");
        let doc = Document::tombstone("users", "bob", ts);

        assert!(doc.tombstone);
        assert!(!doc.is_active());
        assert!(doc.data.is_empty());
        assert_eq!(doc.json(), None);
    }

    #[test]
    fn op_kind_wire_names() {
        assert_eq!(OpKind::Put.as_str(), "put");
        assert_eq!(OpKind::Delete.as_str(), "delete");
        assert_eq!(OpKind::parse("delete"), OpKind::Delete);
        assert_eq!(OpKind::parse("put"), OpKind::Put);
        assert_eq!(OpKind::parse("garbage"), OpKind::Put);
    }

    #[test]
    fn oplog_entry_constructors() {
        let ts = HlcTimestamp::new(100, 0, "node-a");
        let put = OplogEntry::put("users", "alice", "{}", ts.clone());
        assert_eq!(put.operation, OpKind::Put);

        let del = OplogEntry::delete("users", "alice", ts);
        assert_eq!(del.operation, OpKind::Delete);
        assert!(del.data.is_empty());
    }

    #[test]
    fn serialization_roundtrip() {
        let ts = HlcTimestamp::new(100, 2, "node-a");
        let entry = OplogEntry::put("users", "alice", r#"{"age":30}"#, ts);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""operation":"put""#));
        let parsed: OplogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, parsed);
    }

    #[test]
    fn remote_peer_kinds() {
        let lan = RemotePeer::lan("node-b", "192.168.1.7", 7400, 1000);
        assert_eq!(lan.kind, PeerKind::LanDiscovered);
        assert!(lan.enabled);

        let fixed = RemotePeer::static_remote("node-c", "10.0.0.2", 7400);
        assert_eq!(fixed.kind, PeerKind::StaticRemote);
    }
}
