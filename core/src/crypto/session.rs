//! Per-device session state
//!
//! One `SessionState` holds everything needed to encrypt to and decrypt
//! from a single remote device: identities, the root key, the active
//! sender chain and a bounded set of receiver chains.

use serde::{Deserialize, Serialize};

use crate::consts::MIN_VERSION;
use crate::crypto::curve::{KeyPair, PublicKey};
use crate::crypto::keys::IdentityKey;
use crate::crypto::ratchet::{ChainKey, MessageKeys, RootKey, SkippedMessageKeys};
use crate::error::{ProtocolError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderChain {
    ratchet_key: KeyPair,
    chain_key: ChainKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiverChain {
    ratchet_key: PublicKey,
    chain_key: ChainKey,
    #[serde(default)]
    message_keys: SkippedMessageKeys,
}

/// Our half of a key exchange that has not been answered yet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingKeyExchange {
    pub sequence: u32,
    pub base_key: KeyPair,
    pub ratchet_key: KeyPair,
}

/// Pre-key material to attach to outgoing messages until the peer replies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: Option<u32>,
    pub base_key: PublicKey,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionState {
    session_version: u8,
    local_identity_key: Option<IdentityKey>,
    remote_identity_key: Option<IdentityKey>,
    root_key: Option<RootKey>,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    /// Oldest first
    receiver_chains: Vec<ReceiverChain>,
    pending_key_exchange: Option<PendingKeyExchange>,
    pending_pre_key: Option<PendingPreKey>,
    remote_registration_id: u32,
    local_registration_id: u32,
    alice_base_key: Option<PublicKey>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negotiated version; a state that never negotiated reports the minimum
    pub fn session_version(&self) -> u8 {
        if self.session_version == 0 {
            MIN_VERSION
        } else {
            self.session_version
        }
    }

    pub fn set_session_version(&mut self, version: u8) {
        self.session_version = version;
    }

    pub fn local_identity_key(&self) -> Result<&IdentityKey> {
        self.local_identity_key
            .as_ref()
            .ok_or(ProtocolError::InvalidState("missing local identity key"))
    }

    pub fn set_local_identity_key(&mut self, identity: IdentityKey) {
        self.local_identity_key = Some(identity);
    }

    pub fn remote_identity_key(&self) -> Option<&IdentityKey> {
        self.remote_identity_key.as_ref()
    }

    pub fn set_remote_identity_key(&mut self, identity: IdentityKey) {
        self.remote_identity_key = Some(identity);
    }

    pub fn root_key(&self) -> Result<&RootKey> {
        self.root_key
            .as_ref()
            .ok_or(ProtocolError::InvalidState("missing root key"))
    }

    pub fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = Some(root_key);
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    fn sender(&self) -> Result<&SenderChain> {
        self.sender_chain
            .as_ref()
            .ok_or(ProtocolError::InvalidState("missing sender chain"))
    }

    pub fn sender_ratchet_key(&self) -> Result<PublicKey> {
        Ok(self.sender()?.ratchet_key.public_key)
    }

    pub fn sender_ratchet_key_pair(&self) -> Result<&KeyPair> {
        Ok(&self.sender()?.ratchet_key)
    }

    pub fn sender_chain_key(&self) -> Result<&ChainKey> {
        Ok(&self.sender()?.chain_key)
    }

    pub fn set_sender_chain(&mut self, ratchet_key: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key,
            chain_key,
        });
    }

    pub fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<()> {
        let sender = self
            .sender_chain
            .as_mut()
            .ok_or(ProtocolError::InvalidState("missing sender chain"))?;
        sender.chain_key = chain_key;
        Ok(())
    }

    fn receiver(&self, ratchet_key: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| &chain.ratchet_key == ratchet_key)
    }

    fn receiver_mut(&mut self, ratchet_key: &PublicKey) -> Result<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.ratchet_key == ratchet_key)
            .ok_or(ProtocolError::InvalidState("missing receiver chain"))
    }

    pub fn has_receiver_chain(&self, ratchet_key: &PublicKey) -> bool {
        self.receiver(ratchet_key).is_some()
    }

    pub fn receiver_chain_key(&self, ratchet_key: &PublicKey) -> Option<&ChainKey> {
        self.receiver(ratchet_key).map(|chain| &chain.chain_key)
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    /// Add a receiver chain, dropping the oldest beyond `max_chains`
    pub fn add_receiver_chain(
        &mut self,
        ratchet_key: PublicKey,
        chain_key: ChainKey,
        max_chains: usize,
    ) {
        self.receiver_chains.push(ReceiverChain {
            ratchet_key,
            chain_key,
            message_keys: SkippedMessageKeys::default(),
        });

        if self.receiver_chains.len() > max_chains {
            let excess = self.receiver_chains.len() - max_chains;
            for dropped in self.receiver_chains.drain(..excess) {
                tracing::debug!(
                    "Dropping receiver chain {} ({} skipped keys)",
                    dropped.ratchet_key.short_hex(),
                    dropped.message_keys.len()
                );
            }
        }
    }

    pub fn set_receiver_chain_key(
        &mut self,
        ratchet_key: &PublicKey,
        chain_key: ChainKey,
    ) -> Result<()> {
        self.receiver_mut(ratchet_key)?.chain_key = chain_key;
        Ok(())
    }

    pub fn has_message_keys(&self, ratchet_key: &PublicKey, counter: u32) -> bool {
        self.receiver(ratchet_key)
            .is_some_and(|chain| chain.message_keys.contains(counter))
    }

    /// Remove and return cached keys for a skipped message
    pub fn remove_message_keys(
        &mut self,
        ratchet_key: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.ratchet_key == ratchet_key)
            .and_then(|chain| chain.message_keys.take(counter))
    }

    pub fn set_message_keys(
        &mut self,
        ratchet_key: &PublicKey,
        keys: MessageKeys,
        max_keys: usize,
    ) -> Result<()> {
        self.receiver_mut(ratchet_key)?
            .message_keys
            .insert(keys, max_keys);
        Ok(())
    }

    pub fn set_pending_key_exchange(
        &mut self,
        sequence: u32,
        base_key: KeyPair,
        ratchet_key: KeyPair,
    ) {
        self.pending_key_exchange = Some(PendingKeyExchange {
            sequence,
            base_key,
            ratchet_key,
        });
    }

    pub fn pending_key_exchange(&self) -> Option<&PendingKeyExchange> {
        self.pending_key_exchange.as_ref()
    }

    pub fn has_pending_key_exchange(&self) -> bool {
        self.pending_key_exchange.is_some()
    }

    pub fn set_unacknowledged_pre_key_message(
        &mut self,
        pre_key_id: Option<u32>,
        signed_pre_key_id: Option<u32>,
        base_key: PublicKey,
    ) {
        self.pending_pre_key = Some(PendingPreKey {
            pre_key_id,
            signed_pre_key_id,
            base_key,
        });
    }

    pub fn unacknowledged_pre_key_message(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn has_unacknowledged_pre_key_message(&self) -> bool {
        self.pending_pre_key.is_some()
    }

    pub fn clear_unacknowledged_pre_key_message(&mut self) {
        self.pending_pre_key = None;
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub fn alice_base_key(&self) -> Option<&PublicKey> {
        self.alice_base_key.as_ref()
    }

    pub fn set_alice_base_key(&mut self, base_key: PublicKey) {
        self.alice_base_key = Some(base_key);
    }
}
