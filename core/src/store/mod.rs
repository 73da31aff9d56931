//! Storage contracts the protocol engine reads and writes
//!
//! Every protocol operation loads what it needs at the start and writes
//! back once at the end. Implementations must serialize access per
//! session address.

mod memory;

pub use memory::{
    InMemIdentityKeyStore, InMemPreKeyStore, InMemProtocolStore, InMemSessionStore,
    InMemSignedPreKeyStore,
};

use crate::address::ProtocolAddress;
use crate::crypto::keys::{IdentityKey, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};
use crate::crypto::record::SessionRecord;
use crate::error::Result;

pub trait IdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair>;

    fn local_registration_id(&self) -> Result<u32>;

    /// Pin `identity` for `name`; returns true if a different identity was replaced
    fn save_identity(&mut self, name: &str, identity: &IdentityKey) -> Result<bool>;

    fn is_trusted_identity(&self, name: &str, identity: &IdentityKey) -> Result<bool>;

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>>;
}

pub trait PreKeyStore {
    /// Fails with `InvalidKeyId` when absent
    fn load_pre_key(&self, id: u32) -> Result<PreKeyRecord>;

    fn store_pre_key(&mut self, id: u32, record: &PreKeyRecord) -> Result<()>;

    fn contains_pre_key(&self, id: u32) -> Result<bool>;

    fn remove_pre_key(&mut self, id: u32) -> Result<()>;
}

pub trait SignedPreKeyStore {
    /// Fails with `InvalidKeyId` when absent
    fn load_signed_pre_key(&self, id: u32) -> Result<SignedPreKeyRecord>;

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>>;

    fn store_signed_pre_key(&mut self, id: u32, record: &SignedPreKeyRecord) -> Result<()>;

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool>;

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()>;
}

pub trait SessionStore {
    /// Returns a fresh record when nothing is stored for `address`
    fn load_session(&self, address: &ProtocolAddress) -> Result<SessionRecord>;

    /// Device ids with a stored session for `name`
    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>>;

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;

    /// True when a session that can encrypt is stored
    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool>;

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()>;

    fn delete_all_sessions(&mut self, name: &str) -> Result<()>;
}

/// Everything a session builder or cipher needs
pub trait ProtocolStore: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore {}

impl<T> ProtocolStore for T where T: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore {}
