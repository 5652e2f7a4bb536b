//! Hashing and secp256k1 primitives.
//!
//! Ergo identifies boxes, tokens and transactions by Blake2b-256 digests and
//! authorizes spends with proofs of knowledge of a discrete logarithm over
//! secp256k1. Verification of those proofs lives here so that both the
//! signer and test-side policy checkers agree on one definition.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use secp256k1::schnorr::Signature;
use secp256k1::{Message, XOnlyPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::constants::PUBLIC_KEY_LENGTH;
use crate::error::{AddressError, SignError};

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// A compressed secp256k1 public key (33 bytes).
///
/// The same bytes are stored in the covenant identity register and in P2PK
/// scripts, so the type keeps the serialized form and validates it once.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Parse and validate a compressed point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let point = secp256k1::PublicKey::from_slice(bytes)
            .map_err(|_| AddressError::InvalidPublicKey)?;
        Ok(Self(point.serialize()))
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    fn x_only(&self) -> Result<XOnlyPublicKey, AddressError> {
        secp256k1::PublicKey::from_slice(&self.0)
            .map(|pk| pk.x_only_public_key().0)
            .map_err(|_| AddressError::InvalidPublicKey)
    }

    /// Verify a BIP-340 proof over a 32-byte message digest.
    ///
    /// `index` only labels the error for the input being checked.
    pub fn verify(&self, digest: &[u8; 32], proof: &[u8], index: usize) -> Result<(), SignError> {
        let sig = Signature::from_slice(proof)
            .map_err(|_| SignError::VerificationFailed { index })?;
        let key = self
            .x_only()
            .map_err(|_| SignError::VerificationFailed { index })?;
        secp256k1::SECP256K1
            .verify_schnorr(&sig, &Message::from_digest(*digest), &key)
            .map_err(|_| SignError::VerificationFailed { index })
    }
}

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(pk: secp256k1::PublicKey) -> Self {
        Self(pk.serialize())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}
