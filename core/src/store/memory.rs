//! In-memory stores
//!
//! Records are kept serialized so a load always hands out an independent
//! copy; nothing changes until the caller stores it back.

use std::collections::{BTreeMap, HashMap};

use crate::address::ProtocolAddress;
use crate::crypto::keys::{IdentityKey, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};
use crate::crypto::record::SessionRecord;
use crate::error::{ProtocolError, Result};
use crate::store::{IdentityKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore};

/// Trust on first use: an identity is trusted until a different one is pinned
pub struct InMemIdentityKeyStore {
    key_pair: IdentityKeyPair,
    registration_id: u32,
    known: HashMap<String, IdentityKey>,
}

impl InMemIdentityKeyStore {
    pub fn new(key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            key_pair,
            registration_id,
            known: HashMap::new(),
        }
    }
}

impl IdentityKeyStore for InMemIdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.key_pair.clone())
    }

    fn local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn save_identity(&mut self, name: &str, identity: &IdentityKey) -> Result<bool> {
        match self.known.insert(name.to_string(), *identity) {
            Some(previous) if previous != *identity => {
                tracing::info!(
                    "Identity for {} changed: {} -> {}",
                    name,
                    previous.fingerprint(),
                    identity.fingerprint()
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_trusted_identity(&self, name: &str, identity: &IdentityKey) -> Result<bool> {
        Ok(self
            .known
            .get(name)
            .map_or(true, |pinned| pinned == identity))
    }

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>> {
        Ok(self.known.get(name).copied())
    }
}

#[derive(Default)]
pub struct InMemPreKeyStore {
    pre_keys: HashMap<u32, Vec<u8>>,
}

impl InMemPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreKeyStore for InMemPreKeyStore {
    fn load_pre_key(&self, id: u32) -> Result<PreKeyRecord> {
        let bytes = self.pre_keys.get(&id).ok_or(ProtocolError::InvalidKeyId(id))?;
        PreKeyRecord::deserialize(bytes)
    }

    fn store_pre_key(&mut self, id: u32, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.insert(id, record.serialize()?);
        Ok(())
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        Ok(self.pre_keys.contains_key(&id))
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        self.pre_keys.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemSignedPreKeyStore {
    signed_pre_keys: BTreeMap<u32, Vec<u8>>,
}

impl InMemSignedPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignedPreKeyStore for InMemSignedPreKeyStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<SignedPreKeyRecord> {
        let bytes = self
            .signed_pre_keys
            .get(&id)
            .ok_or(ProtocolError::InvalidKeyId(id))?;
        SignedPreKeyRecord::deserialize(bytes)
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        self.signed_pre_keys
            .values()
            .map(|bytes| SignedPreKeyRecord::deserialize(bytes))
            .collect()
    }

    fn store_signed_pre_key(&mut self, id: u32, record: &SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_keys.insert(id, record.serialize()?);
        Ok(())
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        Ok(self.signed_pre_keys.contains_key(&id))
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        self.signed_pre_keys.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemSessionStore {
    sessions: HashMap<ProtocolAddress, Vec<u8>>,
}

impl InMemSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemSessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord> {
        match self.sessions.get(address) {
            Some(bytes) => SessionRecord::deserialize(bytes),
            None => Ok(SessionRecord::new()),
        }
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        let mut devices: Vec<u32> = self
            .sessions
            .keys()
            .filter(|address| address.name() == name)
            .map(|address| address.device_id())
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.insert(address.clone(), record.serialize()?);
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        match self.sessions.get(address) {
            Some(bytes) => Ok(SessionRecord::deserialize(bytes)?
                .session_state()
                .has_sender_chain()),
            None => Ok(false),
        }
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.sessions.remove(address);
        Ok(())
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        self.sessions.retain(|address, _| address.name() != name);
        Ok(())
    }
}

/// All four stores behind one handle
pub struct InMemProtocolStore {
    pub identity_store: InMemIdentityKeyStore,
    pub pre_key_store: InMemPreKeyStore,
    pub signed_pre_key_store: InMemSignedPreKeyStore,
    pub session_store: InMemSessionStore,
}

impl InMemProtocolStore {
    pub fn new(key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_store: InMemIdentityKeyStore::new(key_pair, registration_id),
            pre_key_store: InMemPreKeyStore::new(),
            signed_pre_key_store: InMemSignedPreKeyStore::new(),
            session_store: InMemSessionStore::new(),
        }
    }
}

impl IdentityKeyStore for InMemProtocolStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.identity_store.identity_key_pair()
    }

    fn local_registration_id(&self) -> Result<u32> {
        self.identity_store.local_registration_id()
    }

    fn save_identity(&mut self, name: &str, identity: &IdentityKey) -> Result<bool> {
        self.identity_store.save_identity(name, identity)
    }

    fn is_trusted_identity(&self, name: &str, identity: &IdentityKey) -> Result<bool> {
        self.identity_store.is_trusted_identity(name, identity)
    }

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>> {
        self.identity_store.identity(name)
    }
}

impl PreKeyStore for InMemProtocolStore {
    fn load_pre_key(&self, id: u32) -> Result<PreKeyRecord> {
        self.pre_key_store.load_pre_key(id)
    }

    fn store_pre_key(&mut self, id: u32, record: &PreKeyRecord) -> Result<()> {
        self.pre_key_store.store_pre_key(id, record)
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        self.pre_key_store.contains_pre_key(id)
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        self.pre_key_store.remove_pre_key(id)
    }
}

impl SignedPreKeyStore for InMemProtocolStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<SignedPreKeyRecord> {
        self.signed_pre_key_store.load_signed_pre_key(id)
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        self.signed_pre_key_store.load_signed_pre_keys()
    }

    fn store_signed_pre_key(&mut self, id: u32, record: &SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_key_store.store_signed_pre_key(id, record)
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        self.signed_pre_key_store.contains_signed_pre_key(id)
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        self.signed_pre_key_store.remove_signed_pre_key(id)
    }
}

impl SessionStore for InMemProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord> {
        self.session_store.load_session(address)
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        self.session_store.sub_device_sessions(name)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.session_store.store_session(address, record)
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        self.session_store.contains_session(address)
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.session_store.delete_session(address)
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        self.session_store.delete_all_sessions(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curve::KeyPair;
    use crate::crypto::ratchet::ChainKey;

    #[test]
    fn test_trust_on_first_use() {
        let mut store = InMemIdentityKeyStore::new(IdentityKeyPair::generate(), 1);
        let first = *IdentityKeyPair::generate().identity_key();
        let second = *IdentityKeyPair::generate().identity_key();

        assert!(store.is_trusted_identity("bob", &first).unwrap());
        assert!(!store.save_identity("bob", &first).unwrap());
        assert!(store.is_trusted_identity("bob", &first).unwrap());
        assert!(!store.is_trusted_identity("bob", &second).unwrap());

        assert!(store.save_identity("bob", &second).unwrap());
        assert!(store.is_trusted_identity("bob", &second).unwrap());
        assert_eq!(store.identity("bob").unwrap(), Some(second));
    }

    #[test]
    fn test_missing_pre_keys() {
        let mut store = InMemPreKeyStore::new();
        assert!(matches!(store.load_pre_key(3), Err(ProtocolError::InvalidKeyId(3))));

        let record = PreKeyRecord::generate(3);
        store.store_pre_key(3, &record).unwrap();
        assert!(store.contains_pre_key(3).unwrap());
        store.remove_pre_key(3).unwrap();
        assert!(!store.contains_pre_key(3).unwrap());

        let signed = InMemSignedPreKeyStore::new();
        assert!(matches!(signed.load_signed_pre_key(1), Err(ProtocolError::InvalidKeyId(1))));
    }

    #[test]
    fn test_signed_pre_keys_listed_in_id_order() {
        let identity = IdentityKeyPair::generate();
        let mut store = InMemSignedPreKeyStore::new();
        for id in [5, 2, 9] {
            store
                .store_signed_pre_key(id, &SignedPreKeyRecord::generate(id, &identity))
                .unwrap();
        }
        let ids: Vec<u32> = store.load_signed_pre_keys().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        store.remove_signed_pre_key(5).unwrap();
        assert!(!store.contains_signed_pre_key(5).unwrap());
    }

    #[test]
    fn test_sessions_are_copies() {
        let mut store = InMemSessionStore::new();
        let address = ProtocolAddress::new("bob", 1);
        assert!(store.load_session(&address).unwrap().is_fresh());
        assert!(!store.contains_session(&address).unwrap());

        let mut record = SessionRecord::new();
        record
            .session_state_mut()
            .set_sender_chain(KeyPair::generate(), ChainKey::new([1u8; 32], 0));
        store.store_session(&address, &record).unwrap();
        assert!(store.contains_session(&address).unwrap());

        // Mutating a loaded record leaves the stored one alone
        let mut loaded = store.load_session(&address).unwrap();
        loaded.set_state(Default::default());
        assert!(store.contains_session(&address).unwrap());
    }

    #[test]
    fn test_device_listing_and_deletion() {
        let mut store = InMemSessionStore::new();
        for device in [3, 1, 2] {
            store
                .store_session(&ProtocolAddress::new("bob", device), &SessionRecord::new())
                .unwrap();
        }
        store
            .store_session(&ProtocolAddress::new("carol", 1), &SessionRecord::new())
            .unwrap();

        assert_eq!(store.sub_device_sessions("bob").unwrap(), vec![1, 2, 3]);
        store.delete_session(&ProtocolAddress::new("bob", 2)).unwrap();
        assert_eq!(store.sub_device_sessions("bob").unwrap(), vec![1, 3]);
        store.delete_all_sessions("bob").unwrap();
        assert!(store.sub_device_sessions("bob").unwrap().is_empty());
        assert_eq!(store.sub_device_sessions("carol").unwrap(), vec![1]);
    }
}
