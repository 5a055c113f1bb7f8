//! Remote batch ingestion.
//!
//! The single path every remote entry takes into the local store, whether it
//! arrived by pull, push or gossip: advance the clock past each observed
//! timestamp, resolve against current document state, and land the surviving
//! documents plus the full entry set in one atomic batch.

use crate::error::Result;
use meshdb_engine::{HlcClock, OplogEntry, Resolution, Resolver, Store};

/// Apply a batch of remote oplog entries. Returns how many documents
/// changed; entries that lost resolution still enter the oplog so the node
/// can serve them onward.
pub fn apply_remote_entries(
    store: &dyn Store,
    clock: &HlcClock,
    resolver: &Resolver,
    entries: Vec<OplogEntry>,
) -> Result<usize> {
    if entries.is_empty() {
        return Ok(0);
    }

    let mut docs = Vec::new();
    for entry in &entries {
        clock.update(&entry.timestamp);
        let local = store.document(&entry.collection, &entry.key)?;
        if let Resolution::Apply(doc) = resolver.resolve(local.as_ref(), entry) {
            docs.push(doc);
        }
    }

    let applied = docs.len();
    store.apply_batch(docs, entries)?;
    Ok(applied)
}
