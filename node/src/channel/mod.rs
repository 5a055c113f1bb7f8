//! The secure channel: framing, optional encryption, optional compression.
//!
//! A channel owns one TCP connection. Frames below it, two layers above it:
//! brotli compression for payloads over the threshold once both sides have
//! negotiated it, and an authenticated-encryption envelope once the ECDH
//! handshake has run. The inner compression flag survives encryption and is
//! honored after decryption.

pub mod crypto;
pub mod frame;

use crate::config::{BROTLI_QUALITY, COMPRESSION_THRESHOLD, REQUEST_TIMEOUT};
use crate::error::{Result, SyncError};
use crate::protocol::{self, MessageType, SecureEnvelope};
use crypto::{CipherState, EphemeralKey, SealedRecord};
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest accepted handshake public key blob.
const MAX_PUBKEY_LEN: usize = 2048;

/// A framed, optionally encrypted and compressed connection to one peer.
pub struct SecureChannel {
    stream: TcpStream,
    compression: bool,
    cipher: Option<CipherState>,
}

impl SecureChannel {
    /// Wrap an established TCP connection. No negotiation has happened yet.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            compression: false,
            cipher: None,
        }
    }

    /// Enable brotli for payloads over the threshold. Called by both sides
    /// after the application handshake selects it.
    pub fn enable_compression(&mut self) {
        self.compression = true;
    }

    /// Whether a cipher is active.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Run the ECDH exchange and install the cipher state. Must happen
    /// before any framed message. Fails if the exchange takes over 30 s.
    pub async fn secure_handshake(&mut self, initiator: bool) -> Result<()> {
        let cipher = tokio::time::timeout(REQUEST_TIMEOUT, async {
            let key = EphemeralKey::generate()?;

            // Public keys cross as a 4-byte big-endian length + SPKI DER.
            let der = key.public_der();
            self.stream
                .write_all(&(der.len() as u32).to_be_bytes())
                .await?;
            self.stream.write_all(der).await?;
            self.stream.flush().await?;

            let mut len_bytes = [0u8; 4];
            self.stream.read_exact(&mut len_bytes).await?;
            let len = u32::from_be_bytes(len_bytes) as usize;
            if len == 0 || len > MAX_PUBKEY_LEN {
                return Err(SyncError::crypto(format!(
                    "unreasonable public key length {}",
                    len
                )));
            }
            let mut peer_der = vec![0u8; len];
            self.stream.read_exact(&mut peer_der).await?;

            key.agree(&peer_der, initiator)
        })
        .await??;

        self.cipher = Some(cipher);
        Ok(())
    }

    /// Send one logical message.
    pub async fn send(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<()> {
        let mut compression = 0u8;
        let mut packed = None;
        if self.compression && payload.len() > COMPRESSION_THRESHOLD {
            let compressed = compress(payload)?;
            // The flag is set only when compression actually paid off.
            if compressed.len() < payload.len() {
                packed = Some(compressed);
                compression = 1;
            }
        }
        let body: &[u8] = packed.as_deref().unwrap_or(payload);

        match &self.cipher {
            Some(cipher) => {
                let mut inner = Vec::with_capacity(2 + body.len());
                inner.push(msg_type as u8);
                inner.push(compression);
                inner.extend_from_slice(body);

                let sealed = cipher.encrypt(&inner)?;
                let envelope = SecureEnvelope {
                    ciphertext: sealed.ciphertext,
                    iv: sealed.iv,
                    tag: sealed.tag,
                };
                frame::write_frame(
                    &mut self.stream,
                    MessageType::SecureEnvelope as u8,
                    0,
                    &envelope.encode_to_vec(),
                )
                .await
            }
            None => {
                frame::write_frame(&mut self.stream, msg_type as u8, compression, body).await
            }
        }
    }

    /// Receive one logical message, unwrapping encryption and compression.
    pub async fn recv(&mut self) -> Result<(MessageType, Vec<u8>)> {
        let frame = frame::read_frame(&mut self.stream).await?;
        let outer = MessageType::from_u8(frame.msg_type)?;

        let (msg_type, compression, payload) = if outer == MessageType::SecureEnvelope {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| SyncError::protocol("envelope on a plaintext channel"))?;
            let envelope: SecureEnvelope = protocol::decode(&frame.payload)?;
            let inner = cipher.decrypt(&SealedRecord {
                ciphertext: envelope.ciphertext,
                iv: envelope.iv,
                tag: envelope.tag,
            })?;
            if inner.len() < 2 {
                return Err(SyncError::protocol("inner payload shorter than 2 bytes"));
            }
            (
                MessageType::from_u8(inner[0])?,
                inner[1],
                inner[2..].to_vec(),
            )
        } else {
            if self.cipher.is_some() {
                return Err(SyncError::protocol("plaintext frame on an encrypted channel"));
            }
            (outer, frame.compression, frame.payload)
        };

        let payload = if compression == 1 {
            decompress(&payload)?
        } else {
            payload
        };
        Ok((msg_type, payload))
    }

    /// Close the connection.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Remote address, for logging.
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams {
        quality: BROTLI_QUALITY as i32,
        ..Default::default()
    };
    brotli::BrotliCompress(&mut &payload[..], &mut out, &params)
        .map_err(|e| SyncError::protocol(format!("brotli compress: {}", e)))?;
    Ok(out)
}

fn decompress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut &payload[..], &mut out)
        .map_err(|e| SyncError::protocol(format!("brotli decompress: {}", e)))?;
    Ok(out)
}
