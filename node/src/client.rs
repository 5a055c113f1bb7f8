//! Sync client: dials a peer, authenticates, pulls and pushes batches.
//!
//! Requests on one connection are strictly serialized: the client holds
//! `&mut self` across a request, so there is never more than one
//! outstanding exchange, and responses match requests FIFO. Every exchange
//! is bounded by the 30 s request timeout.

use crate::channel::SecureChannel;
use crate::config::{NodeConfig, REQUEST_TIMEOUT};
use crate::error::{Result, SyncError};
use crate::protocol::{
    self, AckResponse, ChangeSetResponse, HandshakeRequest, HandshakeResponse, MessageType,
    PullChangesRequest, PushChangesRequest, COMPRESSION_BROTLI,
};
use meshdb_engine::{HlcTimestamp, OplogEntry};
use prost::Message;
use tokio::net::TcpStream;

/// Connection parameters for one peer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub auth_token: String,
    pub encryption: bool,
    pub compression: bool,
}

impl ClientConfig {
    /// Client settings for a peer, inheriting this node's identity,
    /// secret and channel options.
    pub fn for_peer(config: &NodeConfig, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: config.node_id.clone(),
            host: host.into(),
            port,
            auth_token: config.cluster_secret.clone(),
            encryption: config.encryption,
            compression: config.compression,
        }
    }
}

/// A connected, authenticated session with one peer.
pub struct SyncClient {
    channel: SecureChannel,
    server_node_id: String,
}

impl SyncClient {
    /// Dial, run the secure handshake when enabled, then the application
    /// handshake. A rejected handshake is fatal for the connection.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let stream = tokio::time::timeout(
            REQUEST_TIMEOUT,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await??;

        let mut channel = SecureChannel::new(stream);
        if config.encryption {
            channel.secure_handshake(true).await?;
        }

        let request = HandshakeRequest {
            node_id: config.node_id.clone(),
            auth_token: config.auth_token.clone(),
            supported_compression: if config.compression {
                vec![COMPRESSION_BROTLI.to_string()]
            } else {
                Vec::new()
            },
        };
        let response: HandshakeResponse = exchange(
            &mut channel,
            MessageType::HandshakeRequest,
            &request.encode_to_vec(),
            MessageType::HandshakeResponse,
        )
        .await?;

        if !response.accepted {
            channel.shutdown().await;
            return Err(SyncError::auth("handshake rejected by server"));
        }
        if config.compression && response.selected_compression == COMPRESSION_BROTLI {
            channel.enable_compression();
        }
        tracing::debug!(
            server_node = %response.server_node_id,
            compression = %response.selected_compression,
            "connected"
        );

        Ok(Self {
            channel,
            server_node_id: response.server_node_id,
        })
    }

    /// The node id the server identified itself with.
    pub fn server_node_id(&self) -> &str {
        &self.server_node_id
    }

    /// Pull oplog entries strictly after `since`. Returns the batch and
    /// whether the server has more. A full batch implies more even if the
    /// peer did not set the flag.
    pub async fn pull_changes(
        &mut self,
        since: &HlcTimestamp,
        batch_size: usize,
    ) -> Result<(Vec<OplogEntry>, bool)> {
        let request = PullChangesRequest::since(since);
        let response: ChangeSetResponse = exchange(
            &mut self.channel,
            MessageType::PullChangesRequest,
            &request.encode_to_vec(),
            MessageType::ChangeSetResponse,
        )
        .await?;

        let entries = protocol::from_wire(response.entries)?;
        let has_more = response.has_more || (batch_size > 0 && entries.len() == batch_size);
        Ok((entries, has_more))
    }

    /// Push a batch of local entries. Returns the server's ack verdict.
    pub async fn push_changes(&mut self, entries: &[OplogEntry]) -> Result<bool> {
        self.push(entries, String::new(), String::new(), 0).await
    }

    /// Push a gossip hop: same wire message, tagged with its id, origin and
    /// hop count.
    pub async fn push_gossip(
        &mut self,
        entries: &[OplogEntry],
        source_node_id: &str,
        message_id: &str,
        hops: u32,
    ) -> Result<bool> {
        self.push(
            entries,
            source_node_id.to_string(),
            message_id.to_string(),
            hops,
        )
        .await
    }

    async fn push(
        &mut self,
        entries: &[OplogEntry],
        source_node_id: String,
        message_id: String,
        hops: u32,
    ) -> Result<bool> {
        let request = PushChangesRequest {
            entries: protocol::to_wire(entries),
            source_node_id,
            message_id,
            hops,
        };
        let response: AckResponse = exchange(
            &mut self.channel,
            MessageType::PushChangesRequest,
            &request.encode_to_vec(),
            MessageType::AckResponse,
        )
        .await?;
        Ok(response.success)
    }

    /// Close the connection.
    pub async fn disconnect(mut self) {
        self.channel.shutdown().await;
    }
}

/// One request-response exchange under the request timeout.
async fn exchange<M: Message + Default>(
    channel: &mut SecureChannel,
    request_type: MessageType,
    request: &[u8],
    expected: MessageType,
) -> Result<M> {
    tokio::time::timeout(REQUEST_TIMEOUT, async {
        channel.send(request_type, request).await?;
        let (msg_type, payload) = channel.recv().await?;
        if msg_type != expected {
            return Err(SyncError::protocol(format!(
                "expected {:?}, got {:?}",
                expected, msg_type
            )));
        }
        protocol::decode(&payload)
    })
    .await?
}
