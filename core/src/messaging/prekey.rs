//! PreKeyWhisperMessage: a WhisperMessage plus the material the receiver
//! needs to complete the bundle handshake on first receipt

use prost::Message;

use crate::consts::CURRENT_VERSION;
use crate::crypto::curve::PublicKey;
use crate::crypto::keys::IdentityKey;
use crate::error::{ProtocolError, Result};
use crate::messaging::proto::PreKeyWhisperMessageProto;
use crate::messaging::whisper::WhisperMessage;
use crate::messaging::{decode_identity, decode_key, parse_version_byte, version_byte};

#[derive(Clone, Debug)]
pub struct PreKeyWhisperMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: Option<u32>,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: WhisperMessage,
}

impl PreKeyWhisperMessage {
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: Option<u32>,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: WhisperMessage,
    ) -> Self {
        Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (message_version, body) = parse_version_byte(bytes)?;
        let proto = PreKeyWhisperMessageProto::decode(body)?;

        let missing_pre_key = if message_version < CURRENT_VERSION {
            proto.pre_key_id.is_none()
        } else {
            proto.signed_pre_key_id.is_none()
        };
        let (base_key, identity_key, message) =
            match (proto.base_key, proto.identity_key, proto.message) {
                (Some(base), Some(identity), Some(message)) if !missing_pre_key => {
                    (base, identity, message)
                }
                _ => return Err(ProtocolError::InvalidMessage("incomplete message".into())),
            };

        Ok(Self {
            message_version,
            registration_id: proto.registration_id.unwrap_or(0),
            pre_key_id: proto.pre_key_id,
            signed_pre_key_id: proto.signed_pre_key_id,
            base_key: decode_key(&base_key)?,
            identity_key: decode_identity(&identity_key)?,
            message: WhisperMessage::deserialize(&message)?,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let body = PreKeyWhisperMessageProto {
            pre_key_id: self.pre_key_id,
            base_key: Some(self.base_key.serialize()),
            identity_key: Some(self.identity_key.serialize()),
            message: Some(self.message.serialize().to_vec()),
            registration_id: Some(self.registration_id),
            signed_pre_key_id: self.signed_pre_key_id,
        }
        .encode_to_vec();

        let mut out = Vec::with_capacity(1 + body.len());
        out.push(version_byte(self.message_version));
        out.extend_from_slice(&body);
        out
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> Option<u32> {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &WhisperMessage {
        &self.message
    }
}
