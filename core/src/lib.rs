//! Axolotl Core Library
//!
//! Double ratchet session engine for end-to-end encrypted messaging:
//! pre-key bundle negotiation, the symmetric key exchange handshake,
//! per-message ratcheting with out-of-order delivery, and the wire
//! codecs for every message kind.
//!
//! Persistence is delegated to the host through the traits in [`store`];
//! in-memory implementations are provided for tests and simple embedders.
//!
//! ```ignore
//! let mut builder = SessionBuilder::new(&mut alice_store, bob_address.clone());
//! builder.process_pre_key_bundle(&bob_bundle)?;
//!
//! let message = SessionCipher::new(&mut alice_store, bob_address).encrypt(b"hello")?;
//! send(message.message_type() as u8, &message.serialize());
//! ```

pub mod address;
pub mod config;
pub mod consts;
pub mod crypto;
pub mod error;
pub mod logger;
pub mod messaging;
pub mod session;
pub mod store;
mod util;

pub use address::ProtocolAddress;
pub use config::ProtocolConfig;
pub use error::{ProtocolError, Result};
pub use logger::{init_logger, HostLogger};

pub use crypto::{
    generate_last_resort_pre_key, generate_pre_keys, generate_registration_id, IdentityKey,
    IdentityKeyPair, KeyPair, PreKeyBundle, PreKeyRecord, PublicKey, SessionRecord,
    SignedPreKeyRecord,
};

pub use messaging::{
    CiphertextMessage, CiphertextMessageType, KeyExchangeMessage, PreKeyWhisperMessage,
    WhisperMessage,
};

pub use session::{SessionBuilder, SessionCipher};

pub use store::{
    IdentityKeyStore, InMemProtocolStore, PreKeyStore, ProtocolStore, SessionStore,
    SignedPreKeyStore,
};
