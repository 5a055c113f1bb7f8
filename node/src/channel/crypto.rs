//! Channel cryptography: ECDH key agreement and authenticated records.
//!
//! Each connection performs an ephemeral P-256 exchange; both sides derive
//! the same pair of direction keys and assign them mirrored roles. Records
//! are AES-256-CBC with a fresh IV, authenticated by HMAC-SHA-256 over
//! `IV || ciphertext`. The tag is checked in constant time before any
//! decryption happens.

use crate::error::{Result, SyncError};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use p256::ecdh::EphemeralSecret;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block / IV size.
pub const IV_LEN: usize = 16;
/// HMAC-SHA-256 tag size.
pub const TAG_LEN: usize = 32;

/// An ephemeral key pair for one handshake.
pub struct EphemeralKey {
    secret: EphemeralSecret,
    public_der: Vec<u8>,
}

impl EphemeralKey {
    /// Generate a fresh P-256 key pair.
    pub fn generate() -> Result<Self> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_der = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| SyncError::crypto(format!("public key encoding: {}", e)))?
            .as_bytes()
            .to_vec();
        Ok(Self { secret, public_der })
    }

    /// Our public key in SubjectPublicKeyInfo DER, as sent on the wire.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Complete the agreement against the peer's DER public key and derive
    /// the directional cipher state.
    pub fn agree(self, peer_der: &[u8], initiator: bool) -> Result<CipherState> {
        let peer = PublicKey::from_public_key_der(peer_der)
            .map_err(|e| SyncError::crypto(format!("peer public key: {}", e)))?;
        let shared = self.secret.diffie_hellman(&peer);
        let (encrypt_key, decrypt_key) = derive_keys(shared.raw_secret_bytes(), initiator);
        Ok(CipherState {
            encrypt_key,
            decrypt_key,
        })
    }
}

/// Derive the two direction keys from the shared secret:
/// `K1 = SHA-256(secret || 0x00)`, `K2 = SHA-256(secret || 0x01)`.
/// The initiator encrypts with K1 and decrypts with K2; the responder the
/// opposite.
pub fn derive_keys(shared: &[u8], initiator: bool) -> ([u8; 32], [u8; 32]) {
    let mut k1 = Sha256::new();
    k1.update(shared);
    k1.update([0x00]);
    let k1: [u8; 32] = k1.finalize().into();

    let mut k2 = Sha256::new();
    k2.update(shared);
    k2.update([0x01]);
    let k2: [u8; 32] = k2.finalize().into();

    if initiator {
        (k1, k2)
    } else {
        (k2, k1)
    }
}

/// An encrypted, authenticated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Directional cipher state for one connection.
#[derive(Debug, Clone)]
pub struct CipherState {
    encrypt_key: [u8; 32],
    decrypt_key: [u8; 32],
}

impl CipherState {
    /// Seal a plaintext into `(ciphertext, iv, tag)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedRecord> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&self.encrypt_key, &iv)
            .map_err(|e| SyncError::crypto(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let tag = authenticate(&self.encrypt_key, &iv, &ciphertext)?;

        Ok(SealedRecord {
            ciphertext,
            iv: iv.to_vec(),
            tag,
        })
    }

    /// Verify and open a sealed record. The tag comparison is constant-time;
    /// nothing is decrypted unless it passes.
    pub fn decrypt(&self, record: &SealedRecord) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.decrypt_key)
            .map_err(|e| SyncError::crypto(e.to_string()))?;
        mac.update(&record.iv);
        mac.update(&record.ciphertext);
        mac.verify_slice(&record.tag)
            .map_err(|_| SyncError::auth("record authentication failed"))?;

        let cipher = Aes256CbcDec::new_from_slices(&self.decrypt_key, &record.iv)
            .map_err(|e| SyncError::crypto(e.to_string()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&record.ciphertext)
            .map_err(|_| SyncError::crypto("decryption failed"))
    }
}

fn authenticate(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SyncError::crypto(e.to_string()))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().to_vec())
}
