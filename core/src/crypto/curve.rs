//! Curve25519 key types used for ratchet, base and pre-keys
//!
//! Public keys serialize as `DJB_TYPE || 32 bytes`, so the encoding stays
//! self-describing on the wire and comparable byte-for-byte.

use std::cmp::Ordering;
use std::fmt;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::consts::DJB_TYPE;
use crate::error::{ProtocolError, Result};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SERIALIZED_PUBLIC_KEY_LENGTH: usize = PUBLIC_KEY_LENGTH + 1;
pub const AGREEMENT_LENGTH: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "crate::util::serde_hex::array")] [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse the type-prefixed wire encoding
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            None => Err(ProtocolError::InvalidKey("empty public key".into())),
            Some((&DJB_TYPE, rest)) => {
                let key: [u8; PUBLIC_KEY_LENGTH] = rest.try_into().map_err(|_| {
                    ProtocolError::InvalidKey(format!("bad public key length {}", bytes.len()))
                })?;
                Ok(Self(key))
            }
            Some((t, _)) => Err(ProtocolError::InvalidKey(format!("unknown key type {t:#04x}"))),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SERIALIZED_PUBLIC_KEY_LENGTH);
        out.push(DJB_TYPE);
        out.extend_from_slice(&self.0);
        out
    }

    pub fn public_key_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Short form for log lines
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering over the serialized form; decides roles in a simultaneous handshake
impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialize().cmp(&other.serialize())
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateKey(#[serde(with = "crate::util::serde_hex::array")] [u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(X25519PublicKey::from(&secret).to_bytes())
    }

    /// X25519 agreement with their public key
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; AGREEMENT_LENGTH] {
        let secret = StaticSecret::from(self.0);
        secret
            .diffie_hellman(&X25519PublicKey::from(their_key.0))
            .to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let private_key = PrivateKey(secret.to_bytes());
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; AGREEMENT_LENGTH] {
        self.private_key.calculate_agreement(their_key)
    }
}
