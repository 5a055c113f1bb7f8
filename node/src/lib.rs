//! # meshdb Node
//!
//! The peer-to-peer synchronization substrate for meshdb. Every node runs
//! the same components over a shared [`Store`](meshdb_engine::Store) and
//! [`HlcClock`](meshdb_engine::HlcClock):
//!
//! - [`SyncServer`](server::SyncServer) accepts peers and services pull and
//!   push exchanges over a framed, optionally encrypted and compressed
//!   channel.
//! - [`SyncClient`](client::SyncClient) dials a peer, authenticates with
//!   the shared cluster secret, and pulls or pushes oplog batches.
//! - [`SyncOrchestrator`](orchestrator::SyncOrchestrator) pulls from every
//!   known peer on a fixed interval.
//! - [`GossipProtocol`](gossip::GossipProtocol) fans fresh writes out to
//!   the mesh with TTL and duplicate suppression.
//! - [`Discovery`](discovery::Discovery) surfaces LAN peers from UDP
//!   broadcasts.
//! - [`LeaderElection`](election::LeaderElection) designates the single
//!   cloud gateway among the LAN peers.
//!
//! All components are independently startable and stoppable; none of them
//! is fatal to the process when its peer misbehaves.

pub mod channel;
pub mod client;
pub mod config;
pub mod discovery;
pub mod election;
pub mod error;
pub mod gossip;
pub mod ingest;
pub mod orchestrator;
pub mod protocol;
pub mod server;

pub use client::{ClientConfig, SyncClient};
pub use config::{ConfigError, NodeConfig};
pub use discovery::{Discovery, PeerObservation};
pub use election::LeaderElection;
pub use error::{Result, SyncError};
pub use gossip::{GossipMessage, GossipProtocol};
pub use orchestrator::SyncOrchestrator;
pub use server::{ServerHandle, SharedSecretValidator, SyncServer, TokenValidator};
