//! Cryptographic primitives for token integrity tags.
//!
//! The attestation engine only sees the [`IntegrityPrimitive`] trait. A
//! hardware-rooted signer (TrustZone, Secure Enclave) plugs in behind the
//! same trait without touching the issuance protocol.

use crate::types::{Hash256, KeyId, TagAlgorithm};
pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> Hash256 {
    let hash = Sha256::digest(data);
    hash.into()
}

/// Compute Blake3 hash of data (faster, for non-consensus critical paths).
pub fn blake3(data: &[u8]) -> Hash256 {
    let hash = blake3::hash(data);
    *hash.as_bytes()
}

fn key_id_of(domain: &[u8], key: &[u8]) -> KeyId {
    let mut buf = Vec::with_capacity(domain.len() + key.len());
    buf.extend_from_slice(domain);
    buf.extend_from_slice(key);
    let digest = sha256(&buf);
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    KeyId(id)
}

/// Errors raised by an integrity primitive.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Integrity primitive unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key material")]
    InvalidKey,

    #[error("Commitment could not be encoded: {0}")]
    MessageEncoding(String),

    #[error("Integrity tag too large: {0} bytes")]
    TagTooLarge(usize),
}

/// Keyed primitive that produces the integrity tag of a token.
///
/// Key material must never leave the implementation.
pub trait IntegrityPrimitive: Send + Sync {
    fn algorithm(&self) -> TagAlgorithm;

    fn key_id(&self) -> KeyId;

    /// Tag the canonical commitment bytes.
    fn tag(&self, message: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// Verifying counterpart of an [`IntegrityPrimitive`].
pub trait TagVerifier {
    fn algorithm(&self) -> TagAlgorithm;

    fn verify_tag(&self, message: &[u8], tag: &[u8]) -> bool;
}

/// Software Ed25519 signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Create a new signer from a signing key.
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Generate a new random signing key.
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self { signing_key }
    }

    /// Get the verifying (public) key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_id", &self.key_id().to_string())
            .finish_non_exhaustive()
    }
}

impl IntegrityPrimitive for Ed25519Signer {
    fn algorithm(&self) -> TagAlgorithm {
        TagAlgorithm::Ed25519
    }

    fn key_id(&self) -> KeyId {
        self.verifying_key().key_id()
    }

    fn tag(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        use ed25519_dalek::Signer as _;
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

/// Key fingerprint helper for public keys handed to verifiers.
pub trait KeyFingerprint {
    fn key_id(&self) -> KeyId;
}

impl KeyFingerprint for VerifyingKey {
    fn key_id(&self) -> KeyId {
        key_id_of(b"slp-ed25519\0", self.as_bytes())
    }
}

impl TagVerifier for VerifyingKey {
    fn algorithm(&self) -> TagAlgorithm {
        TagAlgorithm::Ed25519
    }

    fn verify_tag(&self, message: &[u8], tag: &[u8]) -> bool {
        match Signature::from_slice(tag) {
            Ok(signature) => self.verify_strict(message, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

/// HMAC-SHA256 keyed by a secret shared with the verifier.
#[derive(Clone)]
pub struct HmacSha256 {
    key: Vec<u8>,
}

impl HmacSha256 {
    /// Wrap existing key material. Empty keys are rejected.
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, SigningError> {
        let key = key.into();
        if key.is_empty() {
            return Err(SigningError::InvalidKey);
        }
        Ok(Self { key })
    }

    /// Generate a fresh 256-bit key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    fn mac(&self) -> Result<Hmac<Sha256>, SigningError> {
        <Hmac<Sha256> as Mac>::new_from_slice(&self.key).map_err(|_| SigningError::InvalidKey)
    }
}

impl fmt::Debug for HmacSha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSha256")
            .field("key_id", &self.key_id().to_string())
            .finish_non_exhaustive()
    }
}

impl IntegrityPrimitive for HmacSha256 {
    fn algorithm(&self) -> TagAlgorithm {
        TagAlgorithm::HmacSha256
    }

    fn key_id(&self) -> KeyId {
        key_id_of(b"slp-hmac-sha256\0", &self.key)
    }

    fn tag(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut mac = self.mac()?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl TagVerifier for HmacSha256 {
    fn algorithm(&self) -> TagAlgorithm {
        TagAlgorithm::HmacSha256
    }

    fn verify_tag(&self, message: &[u8], tag: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(message);
                // constant-time comparison
                mac.verify_slice(tag).is_ok()
            }
            Err(_) => false,
        }
    }
}
