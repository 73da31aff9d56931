//! Cryptographic core of the session engine
//!
//! Provides:
//! - Curve25519 and Ed25519 key types
//! - Pre-key bundle and key exchange negotiation
//! - Chain and root key ratchets
//! - Session state and its archived history

pub mod cipher;
pub mod curve;
pub mod kdf;
pub mod keys;
pub mod ratchet;
pub mod record;
pub mod session;
pub mod x3dh;

pub use curve::{KeyPair, PrivateKey, PublicKey};
pub use keys::{
    generate_last_resort_pre_key, generate_pre_keys, generate_registration_id, IdentityKey,
    IdentityKeyPair, PreKeyBundle, PreKeyRecord, SignedPreKeyPublic, SignedPreKeyRecord,
};
pub use ratchet::{ChainKey, MessageKeys, RootKey};
pub use record::SessionRecord;
pub use session::SessionState;
