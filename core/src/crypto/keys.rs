//! Identity keys, pre-key records and pre-key bundles
//!
//! An identity carries two public halves: an X25519 key used in the
//! session agreement and an Ed25519 key that signs pre-keys and
//! key exchange base keys.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::{DJB_TYPE, MEDIUM_MAX_VALUE};
use crate::crypto::curve::{KeyPair, PrivateKey, PublicKey, PUBLIC_KEY_LENGTH};
use crate::error::{ProtocolError, Result};

pub const SERIALIZED_IDENTITY_KEY_LENGTH: usize = 1 + 2 * PUBLIC_KEY_LENGTH;
pub const SIGNATURE_LENGTH: usize = 64;

/// Public identity of a party, pinned by the identity store
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKey {
    agreement_key: PublicKey,
    #[serde(with = "crate::util::serde_hex::verifying_key")]
    verifying_key: VerifyingKey,
}

impl IdentityKey {
    pub fn new(agreement_key: PublicKey, verifying_key: VerifyingKey) -> Self {
        Self {
            agreement_key,
            verifying_key,
        }
    }

    /// Parse `DJB_TYPE || x25519 || ed25519`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SERIALIZED_IDENTITY_KEY_LENGTH {
            return Err(ProtocolError::InvalidKey(format!(
                "bad identity key length {}",
                bytes.len()
            )));
        }
        let agreement_key = PublicKey::deserialize(&bytes[..1 + PUBLIC_KEY_LENGTH])?;
        let verifying_bytes: [u8; PUBLIC_KEY_LENGTH] = bytes[1 + PUBLIC_KEY_LENGTH..]
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey("bad identity verifying key".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&verifying_bytes)
            .map_err(|e| ProtocolError::InvalidKey(format!("identity verifying key: {e}")))?;
        Ok(Self {
            agreement_key,
            verifying_key,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SERIALIZED_IDENTITY_KEY_LENGTH);
        bytes.push(DJB_TYPE);
        bytes.extend_from_slice(self.agreement_key.public_key_bytes());
        bytes.extend_from_slice(self.verifying_key.as_bytes());
        bytes
    }

    /// X25519 half used in the session agreement
    pub fn public_key(&self) -> &PublicKey {
        &self.agreement_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(signature) => self.verifying_key.verify(message, &signature).is_ok(),
            Err(_) => false,
        }
    }

    /// Truncated SHA-256 of the serialized key, formatted as groups of 4 hex chars
    ///
    /// Example: "A1B2-C3D4-E5F6-0718"
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.serialize());
        let hash = hasher.finalize();

        let hex_str = hex::encode(&hash[..8]).to_uppercase();
        hex_str
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", self.fingerprint())
    }
}

/// Long-term identity key pair (Ed25519 for signing, X25519 for agreement)
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    agreement_private: PrivateKey,
    identity_key: IdentityKey,
}

impl IdentityKeyPair {
    /// Generate a new identity key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let agreement = KeyPair::generate();
        Self::assemble(signing_key, agreement.private_key)
    }

    fn assemble(signing_key: SigningKey, agreement_private: PrivateKey) -> Self {
        let identity_key = IdentityKey::new(agreement_private.public_key(), signing_key.verifying_key());
        Self {
            signing_key,
            agreement_private,
            identity_key,
        }
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub(crate) fn private_key(&self) -> &PrivateKey {
        &self.agreement_private
    }

    /// Sign data with Ed25519
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Serialize to bytes (for storage): signing key || agreement private key
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.signing_key.to_bytes());
        bytes[32..].copy_from_slice(&self.agreement_private.to_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(ProtocolError::InvalidKey(format!(
                "bad identity key pair length {}",
                bytes.len()
            )));
        }
        let signing_bytes: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey("identity signing key".into()))?;
        let private_bytes: [u8; 32] = bytes[32..]
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey("identity agreement key".into()))?;
        Ok(Self::assemble(
            SigningKey::from_bytes(&signing_bytes),
            PrivateKey::from_bytes(private_bytes),
        ))
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("identity_key", &self.identity_key)
            .finish_non_exhaustive()
    }
}

/// One-time pre-key (ephemeral, used once)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreKeyRecord {
    pub id: u32,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    pub fn generate(id: u32) -> Self {
        Self::new(id, KeyPair::generate())
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Signed pre-key (medium-term, signed by the identity key)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    /// Unix ms at generation time
    pub timestamp: u64,
    key_pair: KeyPair,
    #[serde(with = "crate::util::serde_hex")]
    signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    pub fn new(id: u32, timestamp: u64, key_pair: KeyPair, signature: Vec<u8>) -> Self {
        Self {
            id,
            timestamp,
            key_pair,
            signature,
        }
    }

    /// Generate a new signed pre-key over the serialized public key
    pub fn generate(id: u32, identity: &IdentityKeyPair) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&key_pair.public_key.serialize());
        Self::new(id, now_ms(), key_pair, signature)
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Verify signature against identity public key
    pub fn verify(&self, identity: &IdentityKey) -> bool {
        identity.verify_signature(&self.key_pair.public_key.serialize(), &self.signature)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Public half of a signed pre-key as published in a bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPreKeyPublic {
    pub id: u32,
    pub public_key: PublicKey,
    pub signature: Vec<u8>,
}

/// Bundle of public keys published for asynchronous session setup
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    /// Optional one-time prekey
    pub pre_key: Option<(u32, PublicKey)>,
    /// Absent for legacy (version 2) bundles
    pub signed_pre_key: Option<SignedPreKeyPublic>,
    pub identity_key: IdentityKey,
}

impl PreKeyBundle {
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<(u32, PublicKey)>,
        signed_pre_key: Option<SignedPreKeyPublic>,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key,
            identity_key,
        }
    }

    /// Create a bundle from our own records
    pub fn from_records(
        registration_id: u32,
        device_id: u32,
        identity: &IdentityKeyPair,
        signed_pre_key: Option<&SignedPreKeyRecord>,
        pre_key: Option<&PreKeyRecord>,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key: pre_key.map(|k| (k.id, k.public_key())),
            signed_pre_key: signed_pre_key.map(|k| SignedPreKeyPublic {
                id: k.id,
                public_key: k.public_key(),
                signature: k.signature().to_vec(),
            }),
            identity_key: *identity.identity_key(),
        }
    }

    /// Verify the signed pre-key signature; false when no signed pre-key is present
    pub fn verify(&self) -> bool {
        self.signed_pre_key.as_ref().is_some_and(|spk| {
            self.identity_key
                .verify_signature(&spk.public_key.serialize(), &spk.signature)
        })
    }
}

/// Random registration id: 14-bit by default, 31-bit when `extended_range`
pub fn generate_registration_id(extended_range: bool) -> u32 {
    let upper = if extended_range { i32::MAX as u32 - 1 } else { 16380 };
    OsRng.gen_range(1..=upper)
}

/// `count` consecutive one-time pre-keys, ids wrapping inside the 24-bit space
pub fn generate_pre_keys(start: u32, count: u32) -> Vec<PreKeyRecord> {
    let start = start.saturating_sub(1);
    (0..count)
        .map(|i| {
            let id = (start.wrapping_add(i) % (MEDIUM_MAX_VALUE - 1)) + 1;
            PreKeyRecord::generate(id)
        })
        .collect()
}

/// Pre-key that is never deleted after use
pub fn generate_last_resort_pre_key() -> PreKeyRecord {
    PreKeyRecord::generate(MEDIUM_MAX_VALUE)
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
