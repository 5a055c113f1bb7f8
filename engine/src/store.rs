//! The store contract and the in-memory reference store.
//!
//! The engine does not own persistence. Durable backends implement [`Store`]
//! and keep its two atomicity promises: a document is never visible without
//! its oplog entry (and vice versa), and `apply_batch` lands wholesale or
//! not at all. Implementations own their internal locking; every method
//! takes `&self` and must be safe to call from concurrent sessions.

use crate::{
    error::Result, CollectionName, Document, DocumentKey, Error, HlcTimestamp, NodeId, OplogEntry,
    QueryNode, RemotePeer,
};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Durable document + oplog + peer-registry storage.
pub trait Store: Send + Sync {
    /// Prepare the store for use. Idempotent.
    fn initialize(&self) -> Result<()>;

    /// Flush and refuse further writes. Safe to call once.
    fn close(&self) -> Result<()>;

    /// The highest timestamp across documents and oplog, or the zero stamp
    /// when the store is empty. Used as the pull cursor.
    fn latest_timestamp(&self) -> Result<HlcTimestamp>;

    /// Fetch one document by identity.
    fn document(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Upsert a document and append its oplog entry atomically.
    fn put_document(&self, doc: Document) -> Result<()>;

    /// Upsert a tombstone and append a delete oplog entry atomically.
    fn delete_document(&self, collection: &str, key: &str, timestamp: HlcTimestamp) -> Result<()>;

    /// Oplog entries strictly greater than `since` under the HLC total
    /// order, ascending, at most `limit`.
    fn oplog_after(&self, since: &HlcTimestamp, limit: usize) -> Result<Vec<OplogEntry>>;

    /// Apply a resolved remote batch: all documents upserted and all oplog
    /// entries recorded, or the whole batch rejected.
    fn apply_batch(&self, docs: Vec<Document>, oplog: Vec<OplogEntry>) -> Result<()>;

    /// Names of all collections ever written.
    fn collections(&self) -> Result<Vec<CollectionName>>;

    /// Active documents of a collection matching the filter tree.
    fn find_documents(&self, collection: &str, query: &QueryNode) -> Result<Vec<Document>>;

    /// All registered remote peers.
    fn remote_peers(&self) -> Result<Vec<RemotePeer>>;

    /// Insert or update a peer, keyed by node id.
    fn save_remote_peer(&self, peer: RemotePeer) -> Result<()>;

    /// Remove a peer by node id. Unknown ids are a no-op.
    fn remove_remote_peer(&self, node_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    closed: bool,
    documents: HashMap<(CollectionName, DocumentKey), Document>,
    /// Kept sorted by timestamp; the HLC forbids duplicate stamps, so
    /// re-delivered entries are dropped on insert.
    oplog: Vec<OplogEntry>,
    collections: HashSet<CollectionName>,
    peers: HashMap<NodeId, RemotePeer>,
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    /// Insert one oplog entry at its sorted position. Duplicate timestamps
    /// (idempotent re-delivery) are dropped.
    fn insert_oplog(&mut self, entry: OplogEntry) {
        match self
            .oplog
            .binary_search_by(|e| e.timestamp.cmp(&entry.timestamp))
        {
            Ok(_) => {}
            Err(pos) => self.oplog.insert(pos, entry),
        }
    }

    fn upsert(&mut self, doc: Document) {
        self.collections.insert(doc.collection.clone());
        self.documents
            .insert((doc.collection.clone(), doc.key.clone()), doc);
    }
}

/// In-memory [`Store`] used by tests, demos and as the reference semantics
/// for durable backends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty, open store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of oplog entries currently held.
    pub fn oplog_len(&self) -> usize {
        self.inner.read().unwrap().oplog.len()
    }
}

fn validate(doc: &Document) -> Result<()> {
    if doc.tombstone {
        if !doc.data.is_empty() {
            return Err(Error::InvalidPayload("tombstone carries data".into()));
        }
        return Ok(());
    }
    serde_json::from_str::<serde_json::Value>(&doc.data)
        .map_err(|e| Error::InvalidPayload(e.to_string()))?;
    Ok(())
}

impl Store for MemoryStore {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.inner.write().unwrap().closed = true;
        Ok(())
    }

    fn latest_timestamp(&self) -> Result<HlcTimestamp> {
        let inner = self.inner.read().unwrap();
        let doc_max = inner.documents.values().map(|d| &d.timestamp).max();
        let log_max = inner.oplog.last().map(|e| &e.timestamp);
        Ok(doc_max
            .into_iter()
            .chain(log_max)
            .max()
            .cloned()
            .unwrap_or_else(HlcTimestamp::zero))
    }

    fn document(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn put_document(&self, doc: Document) -> Result<()> {
        validate(&doc)?;
        let mut inner = self.inner.write().unwrap();
        inner.check_open()?;
        let entry = OplogEntry::put(
            doc.collection.clone(),
            doc.key.clone(),
            doc.data.clone(),
            doc.timestamp.clone(),
        );
        inner.upsert(doc);
        inner.insert_oplog(entry);
        Ok(())
    }

    fn delete_document(&self, collection: &str, key: &str, timestamp: HlcTimestamp) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.check_open()?;
        let entry = OplogEntry::delete(collection, key, timestamp.clone());
        inner.upsert(Document::tombstone(collection, key, timestamp));
        inner.insert_oplog(entry);
        Ok(())
    }

    fn oplog_after(&self, since: &HlcTimestamp, limit: usize) -> Result<Vec<OplogEntry>> {
        let inner = self.inner.read().unwrap();
        let start = inner.oplog.partition_point(|e| e.timestamp <= *since);
        Ok(inner.oplog[start..].iter().take(limit).cloned().collect())
    }

    fn apply_batch(&self, docs: Vec<Document>, oplog: Vec<OplogEntry>) -> Result<()> {
        for doc in &docs {
            validate(doc)?;
        }
        let mut inner = self.inner.write().unwrap();
        inner.check_open()?;
        // Validation happened above; nothing below can fail, so the batch
        // is all-or-nothing under the single write lock.
        for doc in docs {
            inner.upsert(doc);
        }
        for entry in oplog {
            inner.collections.insert(entry.collection.clone());
            inner.insert_oplog(entry);
        }
        Ok(())
    }

    fn collections(&self) -> Result<Vec<CollectionName>> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<_> = inner.collections.iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn find_documents(&self, collection: &str, query: &QueryNode) -> Result<Vec<Document>> {
        let inner = self.inner.read().unwrap();
        if !inner.collections.contains(collection) {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }
        let mut matches: Vec<_> = inner
            .documents
            .values()
            .filter(|doc| doc.collection == collection && doc.is_active())
            .filter(|doc| doc.json().map(|v| query.matches(&v)).unwrap_or(false))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matches)
    }

    fn remote_peers(&self) -> Result<Vec<RemotePeer>> {
        let inner = self.inner.read().unwrap();
        let mut peers: Vec<_> = inner.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(peers)
    }

    fn save_remote_peer(&self, peer: RemotePeer) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.check_open()?;
        inner.peers.insert(peer.node_id.clone(), peer);
        Ok(())
    }

    fn remove_remote_peer(&self, node_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.check_open()?;
        inner.peers.remove(node_id);
        Ok(())
    }
}
