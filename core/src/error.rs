//! Error kinds surfaced by the protocol engine
//!
//! Every failure is fail-closed: the session store is only written after
//! an operation has fully succeeded.

use crate::address::ProtocolAddress;
use crate::crypto::keys::IdentityKey;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed key material or a signature that does not verify
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Reference to an unknown or already consumed pre-key
    #[error("No such pre-key id: {0}")]
    InvalidKeyId(u32),

    /// Offered identity differs from the one pinned for the recipient
    #[error("Untrusted identity for {recipient}: {}", identity.fingerprint())]
    UntrustedIdentity {
        recipient: String,
        identity: IdentityKey,
    },

    #[error("No session for {0}")]
    NoSession(ProtocolAddress),

    /// Message index already consumed
    #[error("Duplicate message: chain index {index}, counter {counter}")]
    DuplicateMessage { index: u32, counter: u32 },

    /// MAC failure, malformed ciphertext or out-of-bounds counter jump
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Legacy message version {0}")]
    LegacyMessage(u8),

    #[error("Unsupported message version {0}")]
    InvalidVersion(u8),

    /// Key exchange response with no matching pending handshake
    #[error("Stale key exchange, sequence {0}")]
    StaleKeyExchange(u32),

    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(err: prost::DecodeError) -> Self {
        ProtocolError::InvalidMessage(format!("malformed protobuf: {err}"))
    }
}
