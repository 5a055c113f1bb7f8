//! Sync protocol messages.
//!
//! Messages are schema-defined records with fixed field tags, encoded with
//! prost. Field tags are the interoperability contract; renaming a Rust
//! field is fine, renumbering a tag is a wire break. HLC timestamps travel
//! flattened as `(hlc_wall, hlc_logic, hlc_node)` with the wall time as a
//! decimal string.

use crate::error::{Result, SyncError};
use meshdb_engine::{HlcTimestamp, OpKind, OplogEntry};
use prost::Message;

/// Outer frame message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    HandshakeRequest = 1,
    HandshakeResponse = 2,
    PullChangesRequest = 5,
    ChangeSetResponse = 6,
    PushChangesRequest = 7,
    AckResponse = 8,
    SecureEnvelope = 9,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::HandshakeRequest),
            2 => Ok(MessageType::HandshakeResponse),
            5 => Ok(MessageType::PullChangesRequest),
            6 => Ok(MessageType::ChangeSetResponse),
            7 => Ok(MessageType::PushChangesRequest),
            8 => Ok(MessageType::AckResponse),
            9 => Ok(MessageType::SecureEnvelope),
            other => Err(SyncError::protocol(format!(
                "unknown message type {}",
                other
            ))),
        }
    }
}

/// Compression scheme identifier offered during the handshake.
pub const COMPRESSION_BROTLI: &str = "brotli";

/// Client opens a session: identity, cluster secret, supported compression.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeRequest {
    #[prost(string, tag = "1")]
    pub node_id: String,
    #[prost(string, tag = "2")]
    pub auth_token: String,
    #[prost(string, repeated, tag = "3")]
    pub supported_compression: Vec<String>,
}

/// Server verdict on a session.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeResponse {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    #[prost(string, tag = "2")]
    pub server_node_id: String,
    #[prost(string, tag = "3")]
    pub selected_compression: String,
}

/// One oplog entry on the wire, HLC fields flattened.
#[derive(Clone, PartialEq, Message)]
pub struct WireOplogEntry {
    #[prost(string, tag = "1")]
    pub collection: String,
    #[prost(string, tag = "2")]
    pub key: String,
    #[prost(string, tag = "3")]
    pub json_data: String,
    #[prost(string, tag = "4")]
    pub operation: String,
    #[prost(string, tag = "5")]
    pub hlc_wall: String,
    #[prost(uint32, tag = "6")]
    pub hlc_logic: u32,
    #[prost(string, tag = "7")]
    pub hlc_node: String,
}

/// Request oplog entries strictly after a cursor.
#[derive(Clone, PartialEq, Message)]
pub struct PullChangesRequest {
    #[prost(string, tag = "1")]
    pub since_wall: String,
    #[prost(uint32, tag = "2")]
    pub since_logic: u32,
    #[prost(string, tag = "3")]
    pub since_node: String,
}

/// A batch of oplog entries in ascending HLC order.
#[derive(Clone, PartialEq, Message)]
pub struct ChangeSetResponse {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<WireOplogEntry>,
    #[prost(bool, tag = "2")]
    pub has_more: bool,
}

/// Push a batch of entries. Gossip relays ride the same message: a non-empty
/// `message_id` marks the batch as a gossip hop.
#[derive(Clone, PartialEq, Message)]
pub struct PushChangesRequest {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<WireOplogEntry>,
    #[prost(string, tag = "2")]
    pub source_node_id: String,
    #[prost(string, tag = "3")]
    pub message_id: String,
    #[prost(uint32, tag = "4")]
    pub hops: u32,
}

/// Acknowledgement for a push.
#[derive(Clone, PartialEq, Message)]
pub struct AckResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

/// Outer type-9 frame carrying an authenticated-encrypted inner frame.
#[derive(Clone, PartialEq, Message)]
pub struct SecureEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub ciphertext: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub iv: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub tag: Vec<u8>,
}

impl From<&OplogEntry> for WireOplogEntry {
    fn from(entry: &OplogEntry) -> Self {
        Self {
            collection: entry.collection.clone(),
            key: entry.key.clone(),
            json_data: entry.data.clone(),
            operation: entry.operation.as_str().to_string(),
            hlc_wall: entry.timestamp.wall.to_string(),
            hlc_logic: entry.timestamp.counter,
            hlc_node: entry.timestamp.node_id.clone(),
        }
    }
}

impl WireOplogEntry {
    /// Map back to the domain entry. Fails on an unparseable wall time.
    pub fn into_entry(self) -> Result<OplogEntry> {
        let wall = self
            .hlc_wall
            .parse::<u64>()
            .map_err(|_| SyncError::protocol(format!("bad hlc wall time: {}", self.hlc_wall)))?;
        Ok(OplogEntry {
            collection: self.collection,
            key: self.key,
            data: self.json_data,
            timestamp: HlcTimestamp::new(wall, self.hlc_logic, self.hlc_node),
            operation: OpKind::parse(&self.operation),
        })
    }
}

impl PullChangesRequest {
    /// Build the request from a cursor timestamp.
    pub fn since(cursor: &HlcTimestamp) -> Self {
        Self {
            since_wall: cursor.wall.to_string(),
            since_logic: cursor.counter,
            since_node: cursor.node_id.clone(),
        }
    }

    /// Recover the cursor timestamp.
    pub fn cursor(&self) -> Result<HlcTimestamp> {
        let wall = self
            .since_wall
            .parse::<u64>()
            .map_err(|_| SyncError::protocol(format!("bad cursor wall time: {}", self.since_wall)))?;
        Ok(HlcTimestamp::new(
            wall,
            self.since_logic,
            self.since_node.clone(),
        ))
    }
}

/// Encode entries for the wire.
pub fn to_wire(entries: &[OplogEntry]) -> Vec<WireOplogEntry> {
    entries.iter().map(WireOplogEntry::from).collect()
}

/// Decode wire entries, failing on the first malformed one.
pub fn from_wire(entries: Vec<WireOplogEntry>) -> Result<Vec<OplogEntry>> {
    entries
        .into_iter()
        .map(WireOplogEntry::into_entry)
        .collect()
}

/// Decode a prost message out of a frame payload.
pub fn decode<M: Message + Default>(payload: &[u8]) -> Result<M> {
    M::decode(payload).map_err(SyncError::from)
}
