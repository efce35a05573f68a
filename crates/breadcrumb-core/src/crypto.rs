//! Identity keys, signatures and SHA-256.
//!
//! The ledger only signs canonical block pre-images and only hashes byte
//! concatenations, so there is no general-purpose hash type here.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CoreError;

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    parts
        .iter()
        .fold(Sha256::new(), |hasher, part| hasher.chain_update(part))
        .finalize()
        .into()
}

/// The public half of an identity. Every block carries its author's key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    /// Lowercase hex, as written into the pre-image.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check `signature` over `message`.
    ///
    /// Fails with `InvalidPublicKey` for bytes that are not a curve point.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        key.verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", &self.to_hex()[..16])
    }
}

/// A detached Ed25519 signature over a block pre-image.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    /// Lowercase hex. This is the encoding bound into block hashes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 64]> for Ed25519Signature {
    fn from(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// The identity keypair that authors a chain. Never written into the ledger;
/// persisting it is the keystore's job.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// A fresh identity from the OS RNG.
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Rebuild an identity from its 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// The secret seed. Only the keystore should need this.
    pub fn seed(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}
