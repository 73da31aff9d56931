//! Session cipher: per-message encryption and decryption
//!
//! Every call loads the record, works on a copy of the relevant state and
//! writes back only after the whole operation succeeded.

use crate::address::ProtocolAddress;
use crate::config::ProtocolConfig;
use crate::crypto::cipher::{aes_gcm_decrypt, aes_gcm_encrypt};
use crate::crypto::curve::{KeyPair, PublicKey};
use crate::crypto::ratchet::{ChainKey, MessageKeys};
use crate::crypto::record::SessionRecord;
use crate::crypto::session::SessionState;
use crate::error::{ProtocolError, Result};
use crate::messaging::{CiphertextMessage, PreKeyWhisperMessage, WhisperMessage};
use crate::session::builder::SessionBuilder;
use crate::store::ProtocolStore;

pub struct SessionCipher<'a, S: ProtocolStore> {
    store: &'a mut S,
    remote_address: ProtocolAddress,
    config: ProtocolConfig,
}

impl<'a, S: ProtocolStore> SessionCipher<'a, S> {
    pub fn new(store: &'a mut S, remote_address: ProtocolAddress) -> Self {
        Self {
            store,
            remote_address,
            config: ProtocolConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Encrypt with the current sender chain
    ///
    /// Until the peer has answered, the result is a PreKeyWhisperMessage
    /// carrying the handshake.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage> {
        let mut record = self.store.load_session(&self.remote_address)?;
        let state = record.session_state_mut();
        if !state.has_sender_chain() {
            return Err(ProtocolError::NoSession(self.remote_address.clone()));
        }

        let chain_key = state.sender_chain_key()?.clone();
        let message_keys = chain_key.message_keys()?;
        let version = state.session_version();
        let local_identity = *state.local_identity_key()?;
        let remote_identity = *state
            .remote_identity_key()
            .ok_or(ProtocolError::InvalidState("missing remote identity key"))?;

        let ciphertext = aes_gcm_encrypt(message_keys.cipher_key(), message_keys.iv(), plaintext)?;
        let whisper = WhisperMessage::new(
            version,
            message_keys.mac_key(),
            state.sender_ratchet_key()?,
            chain_key.index(),
            state.previous_counter(),
            ciphertext,
            &local_identity,
            &remote_identity,
        )?;

        let message = match state.unacknowledged_pre_key_message() {
            Some(pending) => CiphertextMessage::PreKeyWhisper(PreKeyWhisperMessage::new(
                version,
                state.local_registration_id(),
                pending.pre_key_id,
                pending.signed_pre_key_id,
                pending.base_key,
                local_identity,
                whisper,
            )),
            None => CiphertextMessage::Whisper(whisper),
        };

        state.set_sender_chain_key(chain_key.next()?)?;
        self.store.store_session(&self.remote_address, &record)?;

        tracing::trace!(
            "Encrypted message {} for {}",
            chain_key.index(),
            self.remote_address
        );
        Ok(message)
    }

    pub fn decrypt(&mut self, message: &CiphertextMessage) -> Result<Vec<u8>> {
        self.decrypt_with_callback(message, |_| Ok(()))
    }

    /// Decrypt and hand the plaintext to `callback` before anything is stored
    ///
    /// If the callback fails the session is left exactly as it was.
    pub fn decrypt_with_callback<F>(
        &mut self,
        message: &CiphertextMessage,
        callback: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Result<()>,
    {
        match message {
            CiphertextMessage::Whisper(message) => self.decrypt_whisper(message, callback),
            CiphertextMessage::PreKeyWhisper(message) => {
                self.decrypt_pre_key_whisper(message, callback)
            }
            CiphertextMessage::KeyExchange(message) => Err(ProtocolError::InvalidMessage(format!(
                "key exchange {} carries no ciphertext; process it with SessionBuilder",
                message.sequence()
            ))),
        }
    }

    fn decrypt_pre_key_whisper<F>(
        &mut self,
        message: &PreKeyWhisperMessage,
        callback: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Result<()>,
    {
        let mut record = self.store.load_session(&self.remote_address)?;
        let consumed_pre_key = SessionBuilder::new(&mut *self.store, self.remote_address.clone())
            .with_config(self.config.clone())
            .process_pre_key_message(&mut record, message)?;

        let plaintext = self.decrypt_with_record(&mut record, message.message())?;
        self.check_session_trusted(&record)?;
        callback(&plaintext)?;

        // A pre-key that is gone can never seed a second session
        if let Some(pre_key_id) = consumed_pre_key {
            self.store.remove_pre_key(pre_key_id)?;
            tracing::info!("Consumed pre-key {} for {}", pre_key_id, self.remote_address);
        }
        self.store
            .save_identity(self.remote_address.name(), message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)?;

        Ok(plaintext)
    }

    fn decrypt_whisper<F>(&mut self, message: &WhisperMessage, callback: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Result<()>,
    {
        let mut record = self.store.load_session(&self.remote_address)?;
        let current = record.session_state();
        if !current.has_sender_chain() && record.previous_session_count() == 0 {
            return Err(ProtocolError::NoSession(self.remote_address.clone()));
        }

        let plaintext = self.decrypt_with_record(&mut record, message)?;
        self.check_session_trusted(&record)?;
        callback(&plaintext)?;
        self.store.store_session(&self.remote_address, &record)?;

        Ok(plaintext)
    }

    /// The state that decrypted must still belong to the pinned identity
    fn check_session_trusted(&self, record: &SessionRecord) -> Result<()> {
        let remote = record
            .session_state()
            .remote_identity_key()
            .ok_or(ProtocolError::InvalidState("missing remote identity key"))?;
        if self
            .store
            .is_trusted_identity(self.remote_address.name(), remote)?
        {
            return Ok(());
        }

        tracing::warn!(
            "Rejected message from {}: session identity {} is no longer trusted",
            self.remote_address,
            remote.fingerprint()
        );
        Err(ProtocolError::UntrustedIdentity {
            recipient: self.remote_address.name().to_string(),
            identity: *remote,
        })
    }

    /// Try the current state, then archived states newest first
    fn decrypt_with_record(
        &self,
        record: &mut SessionRecord,
        message: &WhisperMessage,
    ) -> Result<Vec<u8>> {
        let mut current = record.session_state().clone();
        match self.decrypt_with_state(&mut current, message) {
            Ok(plaintext) => {
                record.set_state(current);
                return Ok(plaintext);
            }
            Err(ProtocolError::InvalidMessage(reason)) => {
                tracing::debug!("Current session rejected message: {}", reason);
            }
            Err(e) => return Err(e),
        }

        let archived: Vec<SessionState> = record.previous_session_states().cloned().collect();
        for (index, mut candidate) in archived.into_iter().enumerate() {
            match self.decrypt_with_state(&mut candidate, message) {
                Ok(plaintext) => {
                    record.remove_previous_state(index);
                    record.promote_state(candidate, self.config.max_archived_states);
                    tracing::info!(
                        "Promoted archived session {} for {}",
                        index,
                        self.remote_address
                    );
                    return Ok(plaintext);
                }
                Err(ProtocolError::InvalidMessage(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(ProtocolError::InvalidMessage("no valid sessions".into()))
    }

    fn decrypt_with_state(
        &self,
        state: &mut SessionState,
        message: &WhisperMessage,
    ) -> Result<Vec<u8>> {
        if !state.has_sender_chain() {
            return Err(ProtocolError::InvalidMessage("uninitialized session".into()));
        }
        if message.message_version() != state.session_version() {
            return Err(ProtocolError::InvalidMessage(format!(
                "message version {}, session version {}",
                message.message_version(),
                state.session_version()
            )));
        }

        let their_ratchet_key = message.sender_ratchet_key();
        let chain_key = self.get_or_create_chain_key(state, their_ratchet_key)?;
        let message_keys =
            self.get_or_create_message_keys(state, their_ratchet_key, &chain_key, message.counter())?;

        let remote_identity = state
            .remote_identity_key()
            .ok_or(ProtocolError::InvalidState("missing remote identity key"))?;
        message.verify_mac(remote_identity, state.local_identity_key()?, message_keys.mac_key())?;

        let plaintext =
            aes_gcm_decrypt(message_keys.cipher_key(), message_keys.iv(), message.body())?;
        state.clear_unacknowledged_pre_key_message();

        Ok(plaintext)
    }

    /// Receiver chain for `their_ratchet_key`, stepping the DH ratchet if it is new
    fn get_or_create_chain_key(
        &self,
        state: &mut SessionState,
        their_ratchet_key: &PublicKey,
    ) -> Result<ChainKey> {
        if let Some(chain_key) = state.receiver_chain_key(their_ratchet_key) {
            return Ok(chain_key.clone());
        }

        let root_key = state.root_key()?.clone();
        let our_ratchet_key = state.sender_ratchet_key_pair()?.clone();
        let (receiver_root, receiver_chain) =
            root_key.create_chain(their_ratchet_key, &our_ratchet_key)?;

        let our_new_ratchet_key = KeyPair::generate();
        let (sender_root, sender_chain) =
            receiver_root.create_chain(their_ratchet_key, &our_new_ratchet_key)?;

        let previous_index = state.sender_chain_key()?.index();
        state.set_root_key(sender_root);
        state.add_receiver_chain(
            *their_ratchet_key,
            receiver_chain.clone(),
            self.config.max_receiver_chains,
        );
        state.set_previous_counter(previous_index.saturating_sub(1));
        state.set_sender_chain(our_new_ratchet_key, sender_chain);

        tracing::debug!(
            "DH ratchet step on {} for {}",
            their_ratchet_key.short_hex(),
            self.remote_address
        );
        Ok(receiver_chain)
    }

    fn get_or_create_message_keys(
        &self,
        state: &mut SessionState,
        their_ratchet_key: &PublicKey,
        chain_key: &ChainKey,
        counter: u32,
    ) -> Result<MessageKeys> {
        if chain_key.index() > counter {
            return state
                .remove_message_keys(their_ratchet_key, counter)
                .ok_or(ProtocolError::DuplicateMessage {
                    index: chain_key.index(),
                    counter,
                });
        }

        let jump = (counter - chain_key.index()) as usize;
        if jump > self.config.max_forward_jumps {
            return Err(ProtocolError::InvalidMessage(format!(
                "counter {} is {} messages ahead of the chain",
                counter, jump
            )));
        }

        let mut chain_key = chain_key.clone();
        while chain_key.index() < counter {
            state.set_message_keys(
                their_ratchet_key,
                chain_key.message_keys()?,
                self.config.max_message_keys,
            )?;
            chain_key = chain_key.next()?;
        }
        if jump > 0 {
            tracing::debug!("Cached {} skipped message keys", jump);
        }

        let message_keys = chain_key.message_keys()?;
        state.set_receiver_chain_key(their_ratchet_key, chain_key.next()?)?;
        Ok(message_keys)
    }

    /// Registration id the peer announced during the handshake
    pub fn remote_registration_id(&self) -> Result<u32> {
        let record = self.store.load_session(&self.remote_address)?;
        if !record.session_state().has_sender_chain() {
            return Err(ProtocolError::NoSession(self.remote_address.clone()));
        }
        Ok(record.session_state().remote_registration_id())
    }

    pub fn session_version(&self) -> Result<u8> {
        let record = self.store.load_session(&self.remote_address)?;
        if !record.session_state().has_sender_chain() {
            return Err(ProtocolError::NoSession(self.remote_address.clone()));
        }
        Ok(record.session_state().session_version())
    }

    /// Drop every session with the recipient; the next message needs a new handshake
    pub fn end_session(&mut self) -> Result<()> {
        self.store.delete_all_sessions(self.remote_address.name())?;
        tracing::info!("Ended sessions with {}", self.remote_address.name());
        Ok(())
    }
}
