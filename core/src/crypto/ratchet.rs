//! Symmetric and Diffie-Hellman ratchet steps
//!
//! A chain key only moves forward: `next()` returns the successor and the
//! caller drops the old value. Message keys are derived for the current
//! index without touching the chain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::consts::info;
use crate::crypto::curve::{KeyPair, PublicKey};
use crate::crypto::kdf::{derive_secrets, hmac_sha256};
use crate::error::Result;

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

/// Chain key for symmetric ratchet
#[derive(Clone, Serialize, Deserialize)]
pub struct ChainKey {
    #[serde(with = "crate::util::serde_hex::array")]
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Successor chain key at `index + 1`
    pub fn next(&self) -> Result<ChainKey> {
        Ok(Self {
            key: self.base_material(CHAIN_KEY_SEED)?,
            index: self.index + 1,
        })
    }

    /// Keys for the message at the current index
    pub fn message_keys(&self) -> Result<MessageKeys> {
        let mut input = self.base_material(MESSAGE_KEY_SEED)?;
        let derived: Result<[u8; 80]> = derive_secrets(&input, None, info::MESSAGE_KEYS);
        input.zeroize();
        let mut derived = derived?;

        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&derived[..32]);
        mac_key.copy_from_slice(&derived[32..64]);
        iv.copy_from_slice(&derived[64..]);
        derived.zeroize();

        Ok(MessageKeys {
            cipher_key,
            mac_key,
            iv,
            counter: self.index,
        })
    }

    fn base_material(&self, seed: u8) -> Result<[u8; 32]> {
        hmac_sha256(&self.key, &[&[seed]])
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey").field("index", &self.index).finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RootKey {
    #[serde(with = "crate::util::serde_hex::array")]
    key: [u8; 32],
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// DH ratchet step: mix a fresh agreement into the root key
    ///
    /// Returns the new root key and a chain key starting at index 0.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &KeyPair,
    ) -> Result<(RootKey, ChainKey)> {
        let mut shared_secret = our_ratchet_key.calculate_agreement(their_ratchet_key);
        let derived: Result<[u8; 64]> =
            derive_secrets(&shared_secret, Some(&self.key), info::RATCHET);
        shared_secret.zeroize();
        let mut derived = derived?;

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&derived[..32]);
        chain.copy_from_slice(&derived[32..]);
        derived.zeroize();

        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

impl Drop for RootKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootKey(..)")
    }
}

/// Per-message key material, used once
#[derive(Clone, Serialize, Deserialize)]
pub struct MessageKeys {
    #[serde(with = "crate::util::serde_hex::array")]
    cipher_key: [u8; 32],
    #[serde(with = "crate::util::serde_hex::array")]
    mac_key: [u8; 32],
    #[serde(with = "crate::util::serde_hex::array")]
    iv: [u8; 16],
    counter: u32,
}

impl MessageKeys {
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl Drop for MessageKeys {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKeys").field("counter", &self.counter).finish_non_exhaustive()
    }
}

/// Keys for messages that were skipped over, indexed by counter
///
/// Bounded: inserting past `capacity` evicts the lowest counter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkippedMessageKeys(BTreeMap<u32, MessageKeys>);

impl SkippedMessageKeys {
    pub fn insert(&mut self, keys: MessageKeys, capacity: usize) {
        self.0.insert(keys.counter, keys);
        while self.0.len() > capacity {
            if let Some((evicted, _)) = self.0.pop_first() {
                tracing::debug!("Evicting skipped message key {}", evicted);
            }
        }
    }

    pub fn contains(&self, counter: u32) -> bool {
        self.0.contains_key(&counter)
    }

    /// Remove and return the keys for `counter`
    pub fn take(&mut self, counter: u32) -> Option<MessageKeys> {
        self.0.remove(&counter)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
