//! Scenario tests for session builder and cipher

use crate::address::ProtocolAddress;
use crate::config::ProtocolConfig;
use crate::consts::{CURRENT_VERSION, MEDIUM_MAX_VALUE, MIN_VERSION};
use crate::crypto::curve::KeyPair;
use crate::crypto::keys::{
    generate_registration_id, IdentityKey, IdentityKeyPair, PreKeyBundle, PreKeyRecord,
    SignedPreKeyRecord,
};
use crate::crypto::record::SessionRecord;
use crate::error::{ProtocolError, Result};
use crate::messaging::{
    CiphertextMessage, CiphertextMessageType, KeyExchangeMessage, PreKeyWhisperMessage,
    WhisperMessage, INITIATE_FLAG,
};
use crate::session::{SessionBuilder, SessionCipher};
use crate::store::{
    IdentityKeyStore, InMemProtocolStore, PreKeyStore, SessionStore, SignedPreKeyStore,
};

const SIGNED_PRE_KEY_ID: u32 = 22;

fn alice_address() -> ProtocolAddress {
    ProtocolAddress::new("+14151111111", 1)
}

fn bob_address() -> ProtocolAddress {
    ProtocolAddress::new("+14152222222", 1)
}

fn new_store() -> InMemProtocolStore {
    InMemProtocolStore::new(IdentityKeyPair::generate(), generate_registration_id(false))
}

/// Publish a bundle from `store`, keeping the private halves in it
fn publish_bundle(store: &mut InMemProtocolStore, pre_key_id: u32, signed: bool) -> PreKeyBundle {
    let identity = store.identity_key_pair().unwrap();
    let registration_id = store.local_registration_id().unwrap();

    let pre_key = PreKeyRecord::generate(pre_key_id);
    store.store_pre_key(pre_key_id, &pre_key).unwrap();

    let signed_pre_key = if signed {
        let record = SignedPreKeyRecord::generate(SIGNED_PRE_KEY_ID, &identity);
        store.store_signed_pre_key(SIGNED_PRE_KEY_ID, &record).unwrap();
        Some(record)
    } else {
        None
    };

    PreKeyBundle::from_records(registration_id, 1, &identity, signed_pre_key.as_ref(), Some(&pre_key))
}

/// Serialize and parse, as a transport would
fn transmit(message: &CiphertextMessage) -> CiphertextMessage {
    CiphertextMessage::deserialize(message.message_type(), &message.serialize()).unwrap()
}

fn encrypt(store: &mut InMemProtocolStore, to: ProtocolAddress, text: &str) -> CiphertextMessage {
    let message = SessionCipher::new(store, to).encrypt(text.as_bytes()).unwrap();
    transmit(&message)
}

fn decrypt(store: &mut InMemProtocolStore, from: ProtocolAddress, message: &CiphertextMessage) -> String {
    let plaintext = SessionCipher::new(store, from).decrypt(message).unwrap();
    String::from_utf8(plaintext).unwrap()
}

/// Bundle handshake plus one message each way
fn establish(alice: &mut InMemProtocolStore, bob: &mut InMemProtocolStore) {
    let bundle = publish_bundle(bob, 31, true);
    SessionBuilder::new(alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();

    let hello = encrypt(alice, bob_address(), "hello");
    assert_eq!(decrypt(bob, alice_address(), &hello), "hello");
    let reply = encrypt(bob, alice_address(), "hi there");
    assert_eq!(decrypt(alice, bob_address(), &reply), "hi there");
}

#[test]
fn test_v3_session_from_bundle() {
    let mut alice = new_store();
    let mut bob = new_store();
    let bundle = publish_bundle(&mut bob, 31, true);

    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    assert!(alice.contains_session(&bob_address()).unwrap());

    let first = encrypt(&mut alice, bob_address(), "first");
    assert_eq!(first.message_type(), CiphertextMessageType::PreKey);
    assert_eq!(decrypt(&mut bob, alice_address(), &first), "first");

    // Pre-key consumed, identity pinned, session recorded with Alice's base key
    assert!(!bob.contains_pre_key(31).unwrap());
    assert_eq!(
        bob.identity(alice_address().name()).unwrap(),
        Some(*alice.identity_key_pair().unwrap().identity_key())
    );
    let record = bob.load_session(&alice_address()).unwrap();
    assert!(record.session_state().alice_base_key().is_some());
    assert_eq!(
        SessionCipher::new(&mut bob, alice_address()).session_version().unwrap(),
        CURRENT_VERSION
    );

    let reply = encrypt(&mut bob, alice_address(), "reply");
    assert_eq!(reply.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(decrypt(&mut alice, bob_address(), &reply), "reply");

    // Bob answered, so Alice stops attaching the handshake
    let next = encrypt(&mut alice, bob_address(), "next");
    assert_eq!(next.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(decrypt(&mut bob, alice_address(), &next), "next");
}

#[test]
fn test_v2_session_without_signed_pre_key() {
    let mut alice = new_store();
    let mut bob = new_store();
    let bundle = publish_bundle(&mut bob, 7, false);

    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    assert_eq!(
        SessionCipher::new(&mut alice, bob_address()).session_version().unwrap(),
        MIN_VERSION
    );

    let first = encrypt(&mut alice, bob_address(), "legacy hello");
    assert_eq!(decrypt(&mut bob, alice_address(), &first), "legacy hello");
    assert!(!bob.contains_pre_key(7).unwrap());

    let reply = encrypt(&mut bob, alice_address(), "legacy reply");
    assert_eq!(decrypt(&mut alice, bob_address(), &reply), "legacy reply");
}

#[test]
fn test_last_resort_pre_key_is_kept() {
    let mut alice = new_store();
    let mut bob = new_store();
    let bundle = publish_bundle(&mut bob, MEDIUM_MAX_VALUE, true);

    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    let first = encrypt(&mut alice, bob_address(), "first");
    decrypt(&mut bob, alice_address(), &first);

    assert!(bob.contains_pre_key(MEDIUM_MAX_VALUE).unwrap());
}

#[test]
fn test_bundle_without_pre_keys_rejected() {
    let mut alice = new_store();
    let bob_identity = IdentityKeyPair::generate();
    let bundle = PreKeyBundle::from_records(1, 1, &bob_identity, None, None);

    let result = SessionBuilder::new(&mut alice, bob_address()).process_pre_key_bundle(&bundle);
    assert!(matches!(result, Err(ProtocolError::InvalidKey(_))));
    assert!(!alice.contains_session(&bob_address()).unwrap());
}

#[test]
fn test_out_of_order_and_replay() {
    let mut alice = new_store();
    let mut bob = new_store();
    establish(&mut alice, &mut bob);

    let messages: Vec<CiphertextMessage> = (0..5)
        .map(|i| encrypt(&mut alice, bob_address(), &format!("message {i}")))
        .collect();

    for i in [3, 0, 4, 1, 2] {
        assert_eq!(decrypt(&mut bob, alice_address(), &messages[i]), format!("message {i}"));
    }

    let replay = SessionCipher::new(&mut bob, alice_address()).decrypt(&messages[2]);
    assert!(matches!(replay, Err(ProtocolError::DuplicateMessage { .. })));
}

#[test]
fn test_forward_jump_limit() {
    let mut alice = new_store();
    let mut bob = new_store();
    establish(&mut alice, &mut bob);

    let messages: Vec<CiphertextMessage> = (0..510)
        .map(|i| encrypt(&mut alice, bob_address(), &format!("burst {i}")))
        .collect();

    let result = SessionCipher::new(&mut bob, alice_address())
        .with_config(ProtocolConfig::compact())
        .decrypt(&messages[509]);
    assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));

    // Nothing was stored, and the default bound accepts the same jump
    assert_eq!(decrypt(&mut bob, alice_address(), &messages[509]), "burst 509");
    assert_eq!(decrypt(&mut bob, alice_address(), &messages[0]), "burst 0");
}

#[test]
fn test_archived_session_still_decrypts() {
    let mut alice = new_store();
    let mut bob = new_store();
    establish(&mut alice, &mut bob);

    // Bob sends on the old session while Alice re-keys from a new bundle
    let in_flight = encrypt(&mut bob, alice_address(), "sent before re-key");
    let bundle = publish_bundle(&mut bob, 32, true);
    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    assert_eq!(
        alice
            .load_session(&bob_address())
            .unwrap()
            .previous_session_count(),
        1
    );

    assert_eq!(decrypt(&mut alice, bob_address(), &in_flight), "sent before re-key");

    // The state that decrypted is current again
    let record = alice.load_session(&bob_address()).unwrap();
    assert!(!record.session_state().has_unacknowledged_pre_key_message());
    assert_eq!(record.previous_session_count(), 1);
}

#[test]
fn test_callback_failure_stores_nothing() {
    let mut alice = new_store();
    let mut bob = new_store();
    let bundle = publish_bundle(&mut bob, 31, true);
    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    let first = encrypt(&mut alice, bob_address(), "first");

    let result = SessionCipher::new(&mut bob, alice_address())
        .decrypt_with_callback(&first, |_| Err(ProtocolError::InvalidState("host rejected")));
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
    assert!(bob.contains_pre_key(31).unwrap());
    assert!(!bob.contains_session(&alice_address()).unwrap());
    assert!(bob.identity(alice_address().name()).unwrap().is_none());

    let mut seen = Vec::new();
    SessionCipher::new(&mut bob, alice_address())
        .decrypt_with_callback(&first, |plaintext| {
            seen.extend_from_slice(plaintext);
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, b"first");
}

#[test]
fn test_tampered_pre_key_message_consumes_nothing() {
    let mut alice = new_store();
    let mut bob = new_store();
    let bundle = publish_bundle(&mut bob, 31, true);
    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();

    let original = match encrypt(&mut alice, bob_address(), "first") {
        CiphertextMessage::PreKeyWhisper(message) => message,
        other => panic!("Expected PreKeyWhisper, got {other:?}"),
    };
    let mut inner = original.message().serialize().to_vec();
    let last = inner.len() - 1;
    inner[last] ^= 0x80;
    let tampered = PreKeyWhisperMessage::new(
        original.message_version(),
        original.registration_id(),
        original.pre_key_id(),
        original.signed_pre_key_id(),
        *original.base_key(),
        *original.identity_key(),
        WhisperMessage::deserialize(&inner).unwrap(),
    );

    let result = SessionCipher::new(&mut bob, alice_address())
        .decrypt(&CiphertextMessage::PreKeyWhisper(tampered));
    assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    assert!(bob.contains_pre_key(31).unwrap());
    assert!(!bob.contains_session(&alice_address()).unwrap());

    let genuine = CiphertextMessage::PreKeyWhisper(original);
    assert_eq!(decrypt(&mut bob, alice_address(), &genuine), "first");
}

#[test]
fn test_missing_session() {
    let mut alice = new_store();
    let mut bob = new_store();

    let result = SessionCipher::new(&mut alice, bob_address()).encrypt(b"nobody home");
    assert!(matches!(result, Err(ProtocolError::NoSession(_))));

    establish(&mut alice, &mut bob);
    let message = encrypt(&mut alice, bob_address(), "to a stranger");
    let mut carol = new_store();
    let result = SessionCipher::new(&mut carol, alice_address()).decrypt(&message);
    assert!(matches!(result, Err(ProtocolError::NoSession(_))));
}

#[test]
fn test_whisper_from_untrusted_identity() {
    let mut alice = new_store();
    let mut bob = new_store();
    establish(&mut alice, &mut bob);

    let message = encrypt(&mut alice, bob_address(), "still me");
    let impostor = *IdentityKeyPair::generate().identity_key();
    bob.save_identity(alice_address().name(), &impostor).unwrap();

    let result = SessionCipher::new(&mut bob, alice_address()).decrypt(&message);
    assert!(matches!(result, Err(ProtocolError::UntrustedIdentity { .. })));
}

#[test]
fn test_registration_id_and_end_session() {
    let mut alice = new_store();
    let mut bob = new_store();
    establish(&mut alice, &mut bob);

    let bob_registration = bob.local_registration_id().unwrap();
    let alice_registration = alice.local_registration_id().unwrap();
    assert_eq!(
        SessionCipher::new(&mut alice, bob_address()).remote_registration_id().unwrap(),
        bob_registration
    );
    assert_eq!(
        SessionCipher::new(&mut bob, alice_address()).remote_registration_id().unwrap(),
        alice_registration
    );

    SessionCipher::new(&mut alice, bob_address()).end_session().unwrap();
    assert!(!alice.contains_session(&bob_address()).unwrap());
    let result = SessionCipher::new(&mut alice, bob_address()).encrypt(b"after end");
    assert!(matches!(result, Err(ProtocolError::NoSession(_))));
}

#[test]
fn test_key_exchange_handshake() {
    let mut alice = new_store();
    let mut bob = new_store();

    let initiate = SessionBuilder::new(&mut alice, bob_address())
        .initiate_key_exchange()
        .unwrap();
    assert!(initiate.is_initiate());
    assert!(!alice.contains_session(&bob_address()).unwrap());

    let response = SessionBuilder::new(&mut bob, alice_address())
        .process_key_exchange(&KeyExchangeMessage::deserialize(&initiate.serialize()).unwrap())
        .unwrap()
        .unwrap();
    assert!(response.is_response());
    assert!(!response.is_response_for_simultaneous_initiate());

    let done = SessionBuilder::new(&mut alice, bob_address())
        .process_key_exchange(&KeyExchangeMessage::deserialize(&response.serialize()).unwrap())
        .unwrap();
    assert!(done.is_none());

    let message = encrypt(&mut alice, bob_address(), "over the handshake");
    assert_eq!(message.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(decrypt(&mut bob, alice_address(), &message), "over the handshake");
    let reply = encrypt(&mut bob, alice_address(), "agreed");
    assert_eq!(decrypt(&mut alice, bob_address(), &reply), "agreed");

    // The same response again no longer matches anything pending
    let stale = SessionBuilder::new(&mut alice, bob_address()).process_key_exchange(&response);
    assert!(matches!(stale, Err(ProtocolError::StaleKeyExchange(_))));
}

#[test]
fn test_simultaneous_key_exchange() {
    let mut alice = new_store();
    let mut bob = new_store();

    let from_alice = SessionBuilder::new(&mut alice, bob_address())
        .initiate_key_exchange()
        .unwrap();
    let from_bob = SessionBuilder::new(&mut bob, alice_address())
        .initiate_key_exchange()
        .unwrap();

    let bob_response = SessionBuilder::new(&mut bob, alice_address())
        .process_key_exchange(&from_alice)
        .unwrap()
        .unwrap();
    let alice_response = SessionBuilder::new(&mut alice, bob_address())
        .process_key_exchange(&from_bob)
        .unwrap()
        .unwrap();
    assert!(bob_response.is_response_for_simultaneous_initiate());
    assert!(alice_response.is_response_for_simultaneous_initiate());

    // Acknowledgements need no further messages
    assert!(SessionBuilder::new(&mut alice, bob_address())
        .process_key_exchange(&bob_response)
        .unwrap()
        .is_none());
    assert!(SessionBuilder::new(&mut bob, alice_address())
        .process_key_exchange(&alice_response)
        .unwrap()
        .is_none());

    let message = encrypt(&mut alice, bob_address(), "we agree");
    assert_eq!(decrypt(&mut bob, alice_address(), &message), "we agree");
    let reply = encrypt(&mut bob, alice_address(), "we do");
    assert_eq!(decrypt(&mut alice, bob_address(), &reply), "we do");
}

#[test]
fn test_key_exchange_with_bad_signature() {
    let mut bob = new_store();
    let alice_identity = IdentityKeyPair::generate();
    let base_key = KeyPair::generate();
    let other_key = KeyPair::generate();

    let forged = KeyExchangeMessage::new(
        CURRENT_VERSION,
        1234,
        INITIATE_FLAG,
        base_key.public_key,
        Some(alice_identity.sign(&other_key.public_key.serialize())),
        KeyPair::generate().public_key,
        *alice_identity.identity_key(),
    );

    let result = SessionBuilder::new(&mut bob, alice_address()).process_key_exchange(&forged);
    assert!(matches!(result, Err(ProtocolError::InvalidKey(_))));
    assert!(!bob.contains_session(&alice_address()).unwrap());
}

#[test]
fn test_stale_response_without_pending_exchange() {
    let mut alice = new_store();
    let mut bob = new_store();
    let initiate = SessionBuilder::new(&mut alice, bob_address())
        .initiate_key_exchange()
        .unwrap();
    let response = SessionBuilder::new(&mut bob, alice_address())
        .process_key_exchange(&initiate)
        .unwrap()
        .unwrap();

    // Carol never started a handshake with Bob
    let mut carol = new_store();
    let result = SessionBuilder::new(&mut carol, bob_address()).process_key_exchange(&response);
    assert!(matches!(result, Err(ProtocolError::StaleKeyExchange(_))));
    assert!(!carol.contains_session(&bob_address()).unwrap());
}

#[test]
fn test_archived_session_of_replaced_identity_rejected() {
    let mut alice = new_store();
    let mut old_bob = new_store();
    establish(&mut alice, &mut old_bob);

    // Still in flight on the old session when Bob reinstalls
    let in_flight = encrypt(&mut old_bob, alice_address(), "from old identity");

    let mut new_bob = new_store();
    let bundle = publish_bundle(&mut new_bob, 40, true);
    alice
        .save_identity(bob_address().name(), &bundle.identity_key)
        .unwrap();
    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    let before = alice.load_session(&bob_address()).unwrap().serialize().unwrap();

    let result = SessionCipher::new(&mut alice, bob_address()).decrypt(&in_flight);
    match result {
        Err(ProtocolError::UntrustedIdentity { identity, .. }) => assert_eq!(
            identity,
            *old_bob.identity_key_pair().unwrap().identity_key()
        ),
        other => panic!("Expected UntrustedIdentity, got {other:?}"),
    }

    // The new session stays current and nothing was promoted
    let after = alice.load_session(&bob_address()).unwrap();
    assert_eq!(after.serialize().unwrap(), before);
    assert!(after.session_state().has_unacknowledged_pre_key_message());

    let hello = encrypt(&mut alice, bob_address(), "hello again");
    assert_eq!(decrypt(&mut new_bob, alice_address(), &hello), "hello again");
}

/// Store whose pre-key removal always fails
struct StickyPreKeys(InMemProtocolStore);

impl IdentityKeyStore for StickyPreKeys {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.0.identity_key_pair()
    }

    fn local_registration_id(&self) -> Result<u32> {
        self.0.local_registration_id()
    }

    fn save_identity(
        &mut self,
        name: &str,
        identity: &IdentityKey,
    ) -> Result<bool> {
        self.0.save_identity(name, identity)
    }

    fn is_trusted_identity(
        &self,
        name: &str,
        identity: &IdentityKey,
    ) -> Result<bool> {
        self.0.is_trusted_identity(name, identity)
    }

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>> {
        self.0.identity(name)
    }
}

impl PreKeyStore for StickyPreKeys {
    fn load_pre_key(&self, id: u32) -> Result<PreKeyRecord> {
        self.0.load_pre_key(id)
    }

    fn store_pre_key(&mut self, id: u32, record: &PreKeyRecord) -> Result<()> {
        self.0.store_pre_key(id, record)
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        self.0.contains_pre_key(id)
    }

    fn remove_pre_key(&mut self, _id: u32) -> Result<()> {
        Err(ProtocolError::InvalidState("pre-key store is read-only"))
    }
}

impl SignedPreKeyStore for StickyPreKeys {
    fn load_signed_pre_key(&self, id: u32) -> Result<SignedPreKeyRecord> {
        self.0.load_signed_pre_key(id)
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        self.0.load_signed_pre_keys()
    }

    fn store_signed_pre_key(
        &mut self,
        id: u32,
        record: &SignedPreKeyRecord,
    ) -> Result<()> {
        self.0.store_signed_pre_key(id, record)
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        self.0.contains_signed_pre_key(id)
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        self.0.remove_signed_pre_key(id)
    }
}

impl SessionStore for StickyPreKeys {
    fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> Result<SessionRecord> {
        self.0.load_session(address)
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        self.0.sub_device_sessions(name)
    }

    fn store_session(
        &mut self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<()> {
        self.0.store_session(address, record)
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        self.0.contains_session(address)
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.0.delete_session(address)
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        self.0.delete_all_sessions(name)
    }
}

#[test]
fn test_failed_pre_key_removal_stores_no_session() {
    let mut alice = new_store();
    let mut bob = StickyPreKeys(new_store());
    let bundle = publish_bundle(&mut bob.0, 31, true);
    SessionBuilder::new(&mut alice, bob_address())
        .process_pre_key_bundle(&bundle)
        .unwrap();
    let first = encrypt(&mut alice, bob_address(), "first");

    let result = SessionCipher::new(&mut bob, alice_address()).decrypt(&first);
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
    assert!(bob.contains_pre_key(31).unwrap());
    assert!(!bob.contains_session(&alice_address()).unwrap());
    assert!(bob.identity(alice_address().name()).unwrap().is_none());
}

#[test]
fn test_cipher_refuses_key_exchange() {
    let mut alice = new_store();
    let mut bob = new_store();
    establish(&mut alice, &mut bob);

    let initiate = SessionBuilder::new(&mut alice, bob_address())
        .initiate_key_exchange()
        .unwrap();
    let before = bob.load_session(&alice_address()).unwrap().serialize().unwrap();

    let result = SessionCipher::new(&mut bob, alice_address())
        .decrypt(&transmit(&CiphertextMessage::KeyExchange(initiate)));
    assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    let after = bob.load_session(&alice_address()).unwrap().serialize().unwrap();
    assert_eq!(before, after);
}
