//! Sync server: accepts peer connections and services pull/push exchanges.
//!
//! One task per accepted connection, one session per task. A session runs
//! the optional secure handshake, then the application handshake, then
//! serves requests until the peer disconnects or misbehaves. An error on
//! one connection never touches the others.

use crate::channel::SecureChannel;
use crate::config::{NodeConfig, PULL_BATCH_SIZE};
use crate::error::{Result, SyncError};
use crate::gossip::{GossipMessage, GossipProtocol};
use crate::ingest;
use crate::protocol::{
    self, AckResponse, ChangeSetResponse, HandshakeRequest, HandshakeResponse, MessageType,
    PushChangesRequest, COMPRESSION_BROTLI,
};
use meshdb_engine::{HlcClock, Resolver, Store};
use prost::Message;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Validates the token presented during the application handshake.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// Constant-time equality against the shared cluster secret.
pub struct SharedSecretValidator {
    secret: String,
}

impl SharedSecretValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenValidator for SharedSecretValidator {
    fn validate(&self, token: &str) -> bool {
        token.as_bytes().ct_eq(self.secret.as_bytes()).into()
    }
}

/// Handle to a running server; stopping aborts the accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address, useful when the port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Established sessions run to completion.
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// The peer-facing sync server.
pub struct SyncServer {
    node_id: String,
    store: Arc<dyn Store>,
    clock: Arc<HlcClock>,
    resolver: Resolver,
    validator: Arc<dyn TokenValidator>,
    encryption: bool,
    compression: bool,
    gossip: Mutex<Option<Arc<GossipProtocol>>>,
}

impl SyncServer {
    /// Build a server validating tokens against the configured cluster
    /// secret.
    pub fn new(
        config: &NodeConfig,
        store: Arc<dyn Store>,
        clock: Arc<HlcClock>,
        resolver: Resolver,
    ) -> Self {
        Self::with_validator(
            config,
            store,
            clock,
            resolver,
            Arc::new(SharedSecretValidator::new(config.cluster_secret.clone())),
        )
    }

    /// Build a server with an injected token validator.
    pub fn with_validator(
        config: &NodeConfig,
        store: Arc<dyn Store>,
        clock: Arc<HlcClock>,
        resolver: Resolver,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            node_id: config.node_id.clone(),
            store,
            clock,
            resolver,
            validator,
            encryption: config.encryption,
            compression: config.compression,
            gossip: Mutex::new(None),
        }
    }

    /// Route gossip-tagged pushes into the gossip protocol.
    pub fn attach_gossip(&self, gossip: Arc<GossipProtocol>) {
        *self.gossip.lock().unwrap() = Some(gossip);
    }

    /// Bind and start accepting connections.
    pub async fn start(self: &Arc<Self>, addr: &str) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(node_id = %self.node_id, %local_addr, "sync server listening");

        let server = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream).await {
                                tracing::warn!(%peer, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(ServerHandle { local_addr, task })
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut channel = SecureChannel::new(stream);
        if self.encryption {
            channel.secure_handshake(false).await?;
        }

        let peer_node = match self.application_handshake(&mut channel).await? {
            Some(node_id) => node_id,
            None => return Ok(()), // rejected; already answered and closed
        };

        loop {
            let (msg_type, payload) = match channel.recv().await {
                Ok(message) => message,
                Err(SyncError::Transport(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    tracing::debug!(peer_node = %peer_node, "peer disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match msg_type {
                MessageType::PullChangesRequest => {
                    self.serve_pull(&mut channel, &payload).await?;
                }
                MessageType::PushChangesRequest => {
                    self.serve_push(&mut channel, &payload).await?;
                }
                other => {
                    return Err(SyncError::protocol(format!(
                        "unexpected message {:?} in session",
                        other
                    )));
                }
            }
        }
    }

    /// Run the application handshake. Returns the peer's node id when
    /// accepted, `None` when rejected.
    async fn application_handshake(
        &self,
        channel: &mut SecureChannel,
    ) -> Result<Option<String>> {
        let (msg_type, payload) = channel.recv().await?;
        if msg_type != MessageType::HandshakeRequest {
            return Err(SyncError::protocol(
                "first message was not a handshake request",
            ));
        }
        let request: HandshakeRequest = protocol::decode(&payload)?;

        let accepted = self.validator.validate(&request.auth_token);
        let selected = if accepted
            && self.compression
            && request
                .supported_compression
                .iter()
                .any(|c| c == COMPRESSION_BROTLI)
        {
            COMPRESSION_BROTLI.to_string()
        } else {
            String::new()
        };

        let response = HandshakeResponse {
            accepted,
            server_node_id: self.node_id.clone(),
            selected_compression: selected.clone(),
        };
        channel
            .send(MessageType::HandshakeResponse, &response.encode_to_vec())
            .await?;

        if !accepted {
            tracing::warn!(peer_node = %request.node_id, "handshake rejected");
            channel.shutdown().await;
            return Ok(None);
        }
        if selected == COMPRESSION_BROTLI {
            channel.enable_compression();
        }
        tracing::info!(peer_node = %request.node_id, compression = %selected, "handshake accepted");
        Ok(Some(request.node_id))
    }

    async fn serve_pull(&self, channel: &mut SecureChannel, payload: &[u8]) -> Result<()> {
        let request: protocol::PullChangesRequest = protocol::decode(payload)?;
        let cursor = request.cursor()?;

        let entries = self.store.oplog_after(&cursor, PULL_BATCH_SIZE)?;
        let has_more = entries.len() == PULL_BATCH_SIZE;
        tracing::debug!(since = %cursor, count = entries.len(), has_more, "serving pull");

        let response = ChangeSetResponse {
            entries: protocol::to_wire(&entries),
            has_more,
        };
        channel
            .send(MessageType::ChangeSetResponse, &response.encode_to_vec())
            .await
    }

    async fn serve_push(&self, channel: &mut SecureChannel, payload: &[u8]) -> Result<()> {
        let request: PushChangesRequest = protocol::decode(payload)?;
        let success = match self.accept_push(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "push batch rejected");
                false
            }
        };
        channel
            .send(
                MessageType::AckResponse,
                &AckResponse { success }.encode_to_vec(),
            )
            .await
    }

    async fn accept_push(&self, request: PushChangesRequest) -> Result<()> {
        let entries = protocol::from_wire(request.entries)?;

        // A non-empty message id marks a gossip hop; hand it to the gossip
        // layer so dedup, TTL and re-propagation apply.
        if !request.message_id.is_empty() {
            let gossip = self.gossip.lock().unwrap().clone();
            if let Some(gossip) = gossip {
                return gossip
                    .on_remote(GossipMessage {
                        entries,
                        source_node_id: request.source_node_id,
                        message_id: request.message_id,
                        hops: request.hops,
                    })
                    .await;
            }
        }

        ingest::apply_remote_entries(&*self.store, &self.clock, &self.resolver, entries)?;
        Ok(())
    }
}
