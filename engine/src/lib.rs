//! # meshdb Engine
//!
//! The deterministic convergence core for meshdb, a decentralized,
//! offline-first, peer-to-peer document database.
//!
//! Every node owns a local store of JSON documents in named collections and
//! converges with its peers by exchanging an append-only operation log. No
//! node is authoritative: convergence is eventually consistent under hybrid
//! logical clock ordering with last-write-wins semantics at the document
//! level (or an optional deep-merge for structured JSON).
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about sockets, files or timers
//! - **Deterministic**: the same oplog entries produce the same documents,
//!   in any arrival order
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`Document`] is a JSON payload at `(collection, key)` stamped with the
//! [`HlcTimestamp`] of its latest write. Deletes keep a tombstone row so the
//! deletion replicates with its own timestamp.
//!
//! ### Oplog
//!
//! Every write appends an immutable [`OplogEntry`]. The oplog, totally
//! ordered by HLC, is the replication channel: peers pull entries after a
//! cursor and push fresh ones.
//!
//! ### Hybrid Logical Clock
//!
//! The [`HlcClock`] combines wallclock milliseconds with a tie-breaking
//! counter and the node id. `now()` is strictly increasing even when the
//! wallclock stalls, and `update()` keeps the clock ahead of everything the
//! node has observed.
//!
//! ### Conflict Resolution
//!
//! The [`Resolver`] decides, per remote entry, whether to apply or ignore:
//! - [`MergeStrategy::LastWriteWins`] - higher timestamp wins (default)
//! - [`MergeStrategy::DeepMerge`] - recursive JSON merge, LWW at leaves
//!
//! ## Quick Start
//!
//! ```rust
//! use meshdb_engine::{Document, HlcClock, MemoryStore, Store};
//! use serde_json::json;
//!
//! let clock = HlcClock::new("node-a");
//! let store = MemoryStore::new();
//!
//! let doc = Document::new(
//!     "users",
//!     "alice",
//!     json!({"name": "Alice", "age": 30}).to_string(),
//!     clock.now(),
//! );
//! store.put_document(doc).unwrap();
//!
//! let fetched = store.document("users", "alice").unwrap().unwrap();
//! assert_eq!(fetched.json(), Some(json!({"name": "Alice", "age": 30})));
//! ```
//!
//! ## Persistence
//!
//! Durable backends implement the [`Store`] trait; [`MemoryStore`] is the
//! reference implementation and defines the contract's semantics.

pub mod document;
pub mod error;
pub mod hlc;
pub mod query;
pub mod resolve;
pub mod store;

// Re-export main types at crate root
pub use document::{Document, OpKind, OplogEntry, PeerKind, RemotePeer};
pub use error::Error;
pub use hlc::{HlcClock, HlcTimestamp};
pub use query::{Comparison, QueryNode, QueryVisitor};
pub use resolve::{document_from_entry, merge_json, MergeStrategy, Resolution, Resolver};
pub use store::{MemoryStore, Store};

/// Type aliases for clarity
pub type NodeId = String;
pub type CollectionName = String;
pub type DocumentKey = String;
