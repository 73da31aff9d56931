//! Wire codecs for the three message kinds
//!
//! Each message starts with one version byte: the high nibble is the
//! message version, the low nibble the highest version the sender speaks.

mod key_exchange;
mod prekey;
mod proto;
mod whisper;

pub use key_exchange::{
    generate_sequence, KeyExchangeMessage, INITIATE_FLAG, RESPONSE_FLAG,
    SIMULTANEOUS_INITIATE_FLAG,
};
pub use prekey::PreKeyWhisperMessage;
pub use whisper::WhisperMessage;

use crate::consts::{CURRENT_VERSION, MIN_VERSION};
use crate::crypto::curve::PublicKey;
use crate::crypto::keys::IdentityKey;
use crate::error::{ProtocolError, Result};

/// Numeric type tags a transport uses to tell messages apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CiphertextMessageType {
    Whisper = 2,
    PreKey = 3,
    KeyExchange = 4,
}

/// Every message kind that crosses the transport
///
/// `SessionCipher` produces and consumes the two ciphertext kinds; key
/// exchanges belong to `SessionBuilder::process_key_exchange`.
#[derive(Debug, Clone)]
pub enum CiphertextMessage {
    Whisper(WhisperMessage),
    PreKeyWhisper(PreKeyWhisperMessage),
    KeyExchange(KeyExchangeMessage),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            CiphertextMessage::Whisper(_) => CiphertextMessageType::Whisper,
            CiphertextMessage::PreKeyWhisper(_) => CiphertextMessageType::PreKey,
            CiphertextMessage::KeyExchange(_) => CiphertextMessageType::KeyExchange,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            CiphertextMessage::Whisper(message) => message.serialize().to_vec(),
            CiphertextMessage::PreKeyWhisper(message) => message.serialize(),
            CiphertextMessage::KeyExchange(message) => message.serialize(),
        }
    }

    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self> {
        match message_type {
            CiphertextMessageType::Whisper => {
                WhisperMessage::deserialize(bytes).map(CiphertextMessage::Whisper)
            }
            CiphertextMessageType::PreKey => {
                PreKeyWhisperMessage::deserialize(bytes).map(CiphertextMessage::PreKeyWhisper)
            }
            CiphertextMessageType::KeyExchange => {
                KeyExchangeMessage::deserialize(bytes).map(CiphertextMessage::KeyExchange)
            }
        }
    }
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(CiphertextMessageType::Whisper),
            3 => Ok(CiphertextMessageType::PreKey),
            4 => Ok(CiphertextMessageType::KeyExchange),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

pub(crate) fn version_byte(message_version: u8) -> u8 {
    (message_version << 4) | CURRENT_VERSION
}

/// Split off and check the version byte
pub(crate) fn parse_version_byte(bytes: &[u8]) -> Result<(u8, &[u8])> {
    let (&first, body) = bytes
        .split_first()
        .ok_or_else(|| ProtocolError::InvalidMessage("empty message".into()))?;
    let version = first >> 4;
    if version < MIN_VERSION {
        return Err(ProtocolError::LegacyMessage(version));
    }
    if version > CURRENT_VERSION {
        return Err(ProtocolError::InvalidVersion(version));
    }
    Ok((version, body))
}

pub(crate) fn decode_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::deserialize(bytes)
        .map_err(|e| ProtocolError::InvalidMessage(format!("bad key in message: {e}")))
}

pub(crate) fn decode_identity(bytes: &[u8]) -> Result<IdentityKey> {
    IdentityKey::decode(bytes)
        .map_err(|e| ProtocolError::InvalidMessage(format!("bad identity in message: {e}")))
}
