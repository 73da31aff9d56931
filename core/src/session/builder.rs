//! Session builder: turns handshake material into a stored session
//!
//! Three ways in: a pre-key bundle fetched for the peer, a key exchange
//! message, or (on the receiving side, via the cipher) the handshake
//! fields of a PreKeyWhisperMessage.

use crate::address::ProtocolAddress;
use crate::config::ProtocolConfig;
use crate::consts::{CURRENT_VERSION, MEDIUM_MAX_VALUE, MIN_VERSION};
use crate::crypto::curve::KeyPair;
use crate::crypto::keys::{IdentityKey, PreKeyBundle};
use crate::crypto::record::SessionRecord;
use crate::crypto::session::SessionState;
use crate::crypto::x3dh::{
    initialize_alice_session, initialize_bob_session, initialize_symmetric_session,
    AliceParameters, BobParameters, SymmetricParameters,
};
use crate::error::{ProtocolError, Result};
use crate::messaging::{
    generate_sequence, KeyExchangeMessage, PreKeyWhisperMessage, INITIATE_FLAG, RESPONSE_FLAG,
    SIMULTANEOUS_INITIATE_FLAG,
};
use crate::store::ProtocolStore;

pub struct SessionBuilder<'a, S: ProtocolStore> {
    store: &'a mut S,
    remote_address: ProtocolAddress,
    config: ProtocolConfig,
}

impl<'a, S: ProtocolStore> SessionBuilder<'a, S> {
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

    pub fn remote_address(&self) -> &ProtocolAddress {
        &self.remote_address
    }

    fn check_trusted(&self, identity: &IdentityKey) -> Result<()> {
        let name = self.remote_address.name();
        if self.store.is_trusted_identity(name, identity)? {
            return Ok(());
        }
        tracing::warn!(
            "Rejecting untrusted identity {} for {}",
            identity.fingerprint(),
            self.remote_address
        );
        Err(ProtocolError::UntrustedIdentity {
            recipient: name.to_string(),
            identity: *identity,
        })
    }

    /// Start a session from a bundle; the first outgoing messages carry the handshake
    ///
    /// The bundle's signed pre-key must carry a valid signature. Without a
    /// signed pre-key the session falls back to version 2.
    pub fn process_pre_key_bundle(&mut self, bundle: &PreKeyBundle) -> Result<()> {
        self.check_trusted(&bundle.identity_key)?;

        let signed = bundle.signed_pre_key.as_ref();
        if signed.is_some() && !bundle.verify() {
            return Err(ProtocolError::InvalidKey(
                "signature on signed pre-key does not verify".into(),
            ));
        }

        // Legacy bundles put the one-time pre-key in the signed pre-key's place
        let (version, their_signed_pre_key, their_one_time_pre_key) =
            match (signed, bundle.pre_key) {
                (Some(signed), one_time) => (
                    CURRENT_VERSION,
                    signed.public_key,
                    one_time.map(|(_, key)| key),
                ),
                (None, Some((_, one_time))) => (MIN_VERSION, one_time, None),
                (None, None) => {
                    return Err(ProtocolError::InvalidKey(
                        "bundle has neither a signed nor a one-time pre-key".into(),
                    ))
                }
            };

        let our_identity = self.store.identity_key_pair()?;
        let base_key = KeyPair::generate();
        let mut record = self.store.load_session(&self.remote_address)?;

        let mut state = initialize_alice_session(
            version,
            AliceParameters {
                our_identity_key: &our_identity,
                our_base_key: &base_key,
                their_identity_key: bundle.identity_key,
                their_signed_pre_key,
                their_one_time_pre_key,
                their_ratchet_key: their_signed_pre_key,
            },
        )?;
        state.set_unacknowledged_pre_key_message(
            bundle.pre_key.map(|(id, _)| id),
            signed.map(|s| s.id),
            base_key.public_key,
        );
        state.set_local_registration_id(self.store.local_registration_id()?);
        state.set_remote_registration_id(bundle.registration_id);
        state.set_alice_base_key(base_key.public_key);

        record.promote_state(state, self.config.max_archived_states);
        self.store
            .save_identity(self.remote_address.name(), &bundle.identity_key)?;
        self.store.store_session(&self.remote_address, &record)?;

        tracing::info!(
            "Started v{} session with {} from bundle (base key {})",
            version,
            self.remote_address,
            base_key.public_key.short_hex()
        );
        Ok(())
    }

    /// Receiving side of a bundle handshake, applied to `record` only
    ///
    /// Returns the one-time pre-key id to delete once the embedded message
    /// has decrypted. Nothing is written to the store here.
    pub(crate) fn process_pre_key_message(
        &mut self,
        record: &mut SessionRecord,
        message: &PreKeyWhisperMessage,
    ) -> Result<Option<u32>> {
        self.check_trusted(message.identity_key())?;

        let consumed = match message.message_version() {
            CURRENT_VERSION => self.process_v3(record, message)?,
            MIN_VERSION => self.process_v2(record, message)?,
            other => return Err(ProtocolError::InvalidVersion(other)),
        };

        Ok(consumed.filter(|id| *id != MEDIUM_MAX_VALUE))
    }

    fn process_v3(
        &mut self,
        record: &mut SessionRecord,
        message: &PreKeyWhisperMessage,
    ) -> Result<Option<u32>> {
        if record.has_session_state(message.message_version(), message.base_key()) {
            tracing::debug!(
                "Base key {} already negotiated, skipping handshake",
                message.base_key().short_hex()
            );
            return Ok(None);
        }

        let signed_pre_key_id = message
            .signed_pre_key_id()
            .ok_or_else(|| ProtocolError::InvalidMessage("missing signed pre-key id".into()))?;
        let signed_pre_key = self.store.load_signed_pre_key(signed_pre_key_id)?;
        let one_time_pre_key = match message.pre_key_id() {
            Some(id) => Some(self.store.load_pre_key(id)?),
            None => None,
        };
        let our_identity = self.store.identity_key_pair()?;

        let state = initialize_bob_session(
            message.message_version(),
            BobParameters {
                our_identity_key: &our_identity,
                our_signed_pre_key: signed_pre_key.key_pair(),
                our_one_time_pre_key: one_time_pre_key.as_ref().map(|k| k.key_pair()),
                our_ratchet_key: signed_pre_key.key_pair(),
                their_identity_key: *message.identity_key(),
                their_base_key: *message.base_key(),
            },
        )?;
        self.finish_responder(record, state, message)?;

        Ok(message.pre_key_id())
    }

    fn process_v2(
        &mut self,
        record: &mut SessionRecord,
        message: &PreKeyWhisperMessage,
    ) -> Result<Option<u32>> {
        let pre_key_id = message
            .pre_key_id()
            .ok_or_else(|| ProtocolError::InvalidMessage("v2 message without pre-key id".into()))?;

        if !self.store.contains_pre_key(pre_key_id)?
            && self.store.contains_session(&self.remote_address)?
        {
            tracing::debug!("Pre-key {} already consumed, using existing session", pre_key_id);
            return Ok(None);
        }

        let pre_key = self.store.load_pre_key(pre_key_id)?;
        let our_identity = self.store.identity_key_pair()?;

        let state = initialize_bob_session(
            message.message_version(),
            BobParameters {
                our_identity_key: &our_identity,
                our_signed_pre_key: pre_key.key_pair(),
                our_one_time_pre_key: None,
                our_ratchet_key: pre_key.key_pair(),
                their_identity_key: *message.identity_key(),
                their_base_key: *message.base_key(),
            },
        )?;
        self.finish_responder(record, state, message)?;

        Ok(Some(pre_key_id))
    }

    fn finish_responder(
        &mut self,
        record: &mut SessionRecord,
        mut state: SessionState,
        message: &PreKeyWhisperMessage,
    ) -> Result<()> {
        state.set_local_registration_id(self.store.local_registration_id()?);
        state.set_remote_registration_id(message.registration_id());
        state.set_alice_base_key(*message.base_key());
        record.promote_state(state, self.config.max_archived_states);

        tracing::info!(
            "Accepted v{} session from {} (base key {})",
            message.message_version(),
            self.remote_address,
            message.base_key().short_hex()
        );
        Ok(())
    }

    /// Open an interactive handshake; send the returned message to the peer
    pub fn initiate_key_exchange(&mut self) -> Result<KeyExchangeMessage> {
        let our_identity = self.store.identity_key_pair()?;
        let sequence = generate_sequence();
        let base_key = KeyPair::generate();
        let ratchet_key = KeyPair::generate();
        let signature = our_identity.sign(&base_key.public_key.serialize());

        let message = KeyExchangeMessage::new(
            CURRENT_VERSION,
            sequence,
            INITIATE_FLAG,
            base_key.public_key,
            Some(signature),
            ratchet_key.public_key,
            *our_identity.identity_key(),
        );

        let mut record = self.store.load_session(&self.remote_address)?;
        record
            .session_state_mut()
            .set_pending_key_exchange(sequence, base_key, ratchet_key);
        self.store.store_session(&self.remote_address, &record)?;

        tracing::debug!("Initiated key exchange {} with {}", sequence, self.remote_address);
        Ok(message)
    }

    /// Handle a key exchange message from the peer
    ///
    /// An initiate yields the response to send back. A response completes
    /// our own pending handshake and yields nothing.
    pub fn process_key_exchange(
        &mut self,
        message: &KeyExchangeMessage,
    ) -> Result<Option<KeyExchangeMessage>> {
        self.check_trusted(message.identity_key())?;

        if message.is_initiate() {
            self.process_initiate(message).map(Some)
        } else if message.is_response() {
            self.process_response(message).map(|_| None)
        } else {
            Err(ProtocolError::InvalidMessage(
                "key exchange is neither initiate nor response".into(),
            ))
        }
    }

    fn process_initiate(&mut self, message: &KeyExchangeMessage) -> Result<KeyExchangeMessage> {
        if message.version() >= CURRENT_VERSION {
            verify_base_key_signature(message)?;
        }

        let our_identity = self.store.identity_key_pair()?;
        let mut record = self.store.load_session(&self.remote_address)?;
        let mut flags = RESPONSE_FLAG;

        let (base_key, ratchet_key) = match record.session_state().pending_key_exchange() {
            Some(pending) => {
                tracing::debug!(
                    "Simultaneous key exchange with {}: reusing pending keys",
                    self.remote_address
                );
                flags |= SIMULTANEOUS_INITIATE_FLAG;
                (pending.base_key.clone(), pending.ratchet_key.clone())
            }
            None => (KeyPair::generate(), KeyPair::generate()),
        };

        let version = message.version();
        let mut state = initialize_symmetric_session(
            version,
            SymmetricParameters {
                our_identity_key: &our_identity,
                our_base_key: &base_key,
                our_ratchet_key: &ratchet_key,
                their_identity_key: *message.identity_key(),
                their_base_key: *message.base_key(),
                their_ratchet_key: *message.ratchet_key(),
            },
        )?;
        state.set_local_registration_id(self.store.local_registration_id()?);

        record.promote_state(state, self.config.max_archived_states);
        self.store
            .save_identity(self.remote_address.name(), message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)?;

        let signature = (version >= CURRENT_VERSION)
            .then(|| our_identity.sign(&base_key.public_key.serialize()));
        Ok(KeyExchangeMessage::new(
            version,
            message.sequence(),
            flags,
            base_key.public_key,
            signature,
            ratchet_key.public_key,
            *our_identity.identity_key(),
        ))
    }

    fn process_response(&mut self, message: &KeyExchangeMessage) -> Result<()> {
        let mut record = self.store.load_session(&self.remote_address)?;
        let pending = match record.session_state().pending_key_exchange() {
            Some(pending) if pending.sequence == message.sequence() => pending.clone(),
            _ if message.is_response_for_simultaneous_initiate() => {
                tracing::debug!(
                    "Ignoring response {} to a simultaneous initiate",
                    message.sequence()
                );
                return Ok(());
            }
            _ => {
                tracing::warn!(
                    "Stale key exchange response {} from {}",
                    message.sequence(),
                    self.remote_address
                );
                return Err(ProtocolError::StaleKeyExchange(message.sequence()));
            }
        };

        let our_identity = self.store.identity_key_pair()?;
        let mut state = initialize_symmetric_session(
            message.version(),
            SymmetricParameters {
                our_identity_key: &our_identity,
                our_base_key: &pending.base_key,
                our_ratchet_key: &pending.ratchet_key,
                their_identity_key: *message.identity_key(),
                their_base_key: *message.base_key(),
                their_ratchet_key: *message.ratchet_key(),
            },
        )?;

        if message.version() >= CURRENT_VERSION {
            verify_base_key_signature(message)?;
        }
        state.set_local_registration_id(self.store.local_registration_id()?);

        record.promote_state(state, self.config.max_archived_states);
        self.store
            .save_identity(self.remote_address.name(), message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)?;

        tracing::info!(
            "Completed key exchange {} with {}",
            message.sequence(),
            self.remote_address
        );
        Ok(())
    }
}

fn verify_base_key_signature(message: &KeyExchangeMessage) -> Result<()> {
    let signature = message.base_key_signature().unwrap_or_default();
    if message
        .identity_key()
        .verify_signature(&message.base_key().serialize(), signature)
    {
        Ok(())
    } else {
        Err(ProtocolError::InvalidKey(
            "key exchange base key signature does not verify".into(),
        ))
    }
}
