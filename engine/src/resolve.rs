//! Conflict resolution between local document state and remote operations.
//!
//! This is the core of determinism: every node runs the same resolver over
//! the same oplog entries and converges to the same document state, in any
//! arrival order. Duplicated deliveries are ignored (idempotence).
//!
//! Two strategies are provided:
//! - [`MergeStrategy::LastWriteWins`] - the whole document from the higher
//!   timestamp wins (default)
//! - [`MergeStrategy::DeepMerge`] - structured JSON is merged recursively,
//!   falling back to last-write-wins at every leaf

use crate::{Document, HlcTimestamp, OpKind, OplogEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Merge strategy for conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Higher timestamp wins at the document level (default)
    #[default]
    LastWriteWins,
    /// Recursive JSON merge, last-write-wins at leaves
    DeepMerge,
}

/// Outcome of resolving one remote operation against local state.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Replace local state with this document
    Apply(Document),
    /// The remote operation is stale; keep local state
    Ignore,
}

impl Resolution {
    /// The document to apply, if any.
    pub fn applied(self) -> Option<Document> {
        match self {
            Resolution::Apply(doc) => Some(doc),
            Resolution::Ignore => None,
        }
    }
}

/// The conflict resolver. Stateless; safe to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    strategy: MergeStrategy,
}

impl Resolver {
    /// Create a resolver with the given strategy.
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }

    /// The configured strategy.
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Resolve a remote oplog entry against the current local document.
    pub fn resolve(&self, local: Option<&Document>, remote: &OplogEntry) -> Resolution {
        let Some(local) = local else {
            return Resolution::Apply(document_from_entry(remote));
        };

        match self.strategy {
            MergeStrategy::LastWriteWins => self.resolve_lww(local, remote),
            MergeStrategy::DeepMerge => self.resolve_merge(local, remote),
        }
    }

    fn resolve_lww(&self, local: &Document, remote: &OplogEntry) -> Resolution {
        if remote.timestamp > local.timestamp {
            Resolution::Apply(document_from_entry(remote))
        } else {
            Resolution::Ignore
        }
    }

    fn resolve_merge(&self, local: &Document, remote: &OplogEntry) -> Resolution {
        // Deletes never merge: the tombstone either wins wholesale or loses.
        if remote.operation == OpKind::Delete {
            return self.resolve_lww(local, remote);
        }

        let local_json = parse_content(&local.data);
        let remote_json = parse_content(&remote.data);

        match (local_json, remote_json) {
            (Some(local_value), Some(remote_value)) => {
                let merged = merge_json(
                    &local_value,
                    &local.timestamp,
                    &remote_value,
                    &remote.timestamp,
                );
                let timestamp = local.timestamp.clone().max(remote.timestamp.clone());
                let data = merged.to_string();
                Resolution::Apply(Document::new(
                    remote.collection.clone(),
                    remote.key.clone(),
                    data,
                    timestamp,
                ))
            }
            // Either side empty or unparseable: nothing to merge.
            _ => self.resolve_lww(local, remote),
        }
    }
}

/// Build the document a remote entry stands for: a tombstone for deletes,
/// a live document otherwise.
pub fn document_from_entry(entry: &OplogEntry) -> Document {
    match entry.operation {
        OpKind::Delete => Document::tombstone(
            entry.collection.clone(),
            entry.key.clone(),
            entry.timestamp.clone(),
        ),
        OpKind::Put => Document::new(
            entry.collection.clone(),
            entry.key.clone(),
            entry.data.clone(),
            entry.timestamp.clone(),
        ),
    }
}

fn parse_content(data: &str) -> Option<Value> {
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

/// Recursively merge two JSON values stamped with their write times.
///
/// Objects merge field-wise, arrays of uniformly-keyed objects merge
/// element-wise by `id`/`_id`, everything else is last-write-wins.
pub fn merge_json(
    local: &Value,
    local_ts: &HlcTimestamp,
    remote: &Value,
    remote_ts: &HlcTimestamp,
) -> Value {
    match (local, remote) {
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let mut merged = local_map.clone();
            for (key, remote_value) in remote_map {
                match local_map.get(key) {
                    Some(local_value) => {
                        merged.insert(
                            key.clone(),
                            merge_json(local_value, local_ts, remote_value, remote_ts),
                        );
                    }
                    None => {
                        merged.insert(key.clone(), remote_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        (Value::Array(local_items), Value::Array(remote_items)) => {
            match merge_keyed_arrays(local_items, local_ts, remote_items, remote_ts) {
                Some(merged) => Value::Array(merged),
                None => pick_winner(local, local_ts, remote, remote_ts),
            }
        }
        (l, r) if l == r => l.clone(),
        // Type mismatch or differing primitives: the later write wins.
        _ => pick_winner(local, local_ts, remote, remote_ts),
    }
}

/// Merge arrays element-wise when every element on both sides is an object
/// carrying a unique `id` or `_id`. Remote-only elements are appended in
/// their remote order. Returns `None` when the shape does not qualify.
fn merge_keyed_arrays(
    local_items: &[Value],
    local_ts: &HlcTimestamp,
    remote_items: &[Value],
    remote_ts: &HlcTimestamp,
) -> Option<Vec<Value>> {
    let local_keys = element_keys(local_items)?;
    let remote_keys = element_keys(remote_items)?;

    let mut merged = Vec::with_capacity(local_items.len() + remote_items.len());
    for (key, local_item) in local_keys.iter().zip(local_items) {
        match remote_keys.iter().position(|k| k == key) {
            Some(idx) => merged.push(merge_json(
                local_item,
                local_ts,
                &remote_items[idx],
                remote_ts,
            )),
            None => merged.push(local_item.clone()),
        }
    }
    for (key, remote_item) in remote_keys.iter().zip(remote_items) {
        if !local_keys.contains(key) {
            merged.push(remote_item.clone());
        }
    }
    Some(merged)
}

/// Extract the `id`/`_id` of every element, coerced to string. Returns
/// `None` if any element is not an object, lacks an id, or ids collide.
fn element_keys(items: &[Value]) -> Option<Vec<String>> {
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object()?;
        let id = obj.get("id").or_else(|| obj.get("_id"))?;
        let key = match id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if keys.contains(&key) {
            return None;
        }
        keys.push(key);
    }
    Some(keys)
}

fn pick_winner(
    local: &Value,
    local_ts: &HlcTimestamp,
    remote: &Value,
    remote_ts: &HlcTimestamp,
) -> Value {
    if remote_ts > local_ts {
        remote.clone()
    } else {
        local.clone()
    }
}
