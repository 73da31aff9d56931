//! WhisperMessage: one ratcheted, authenticated ciphertext
//!
//! Layout: `version || protobuf || mac[8]`. The MAC is HMAC-SHA256 keyed
//! by the message's MAC key over both identity keys, the version byte and
//! the protobuf body.

use hmac::Mac;
use prost::Message;

use crate::consts::MAC_LENGTH;
use crate::crypto::curve::PublicKey;
use crate::crypto::kdf::new_mac;
use crate::crypto::keys::IdentityKey;
use crate::error::{ProtocolError, Result};
use crate::messaging::proto::WhisperMessageProto;
use crate::messaging::{decode_key, parse_version_byte, version_byte};

#[derive(Clone, Debug)]
pub struct WhisperMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl WhisperMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        mac_key: &[u8; 32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
    ) -> Result<Self> {
        let body = WhisperMessageProto {
            ratchet_key: Some(sender_ratchet_key.serialize()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.clone()),
        }
        .encode_to_vec();

        let mut serialized = Vec::with_capacity(1 + body.len() + MAC_LENGTH);
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&body);
        let mac = compute_mac(sender_identity, receiver_identity, mac_key, &serialized)?;
        serialized.extend_from_slice(&mac[..MAC_LENGTH]);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        })
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= MAC_LENGTH {
            return Err(ProtocolError::InvalidMessage("message too short".into()));
        }
        let (message_version, body) = parse_version_byte(&bytes[..bytes.len() - MAC_LENGTH])?;
        let proto = WhisperMessageProto::decode(body)?;

        let (ratchet_key, counter, ciphertext) =
            match (proto.ratchet_key, proto.counter, proto.ciphertext) {
                (Some(key), Some(counter), Some(ciphertext)) => (key, counter, ciphertext),
                _ => return Err(ProtocolError::InvalidMessage("incomplete message".into())),
            };

        Ok(Self {
            message_version,
            sender_ratchet_key: decode_key(&ratchet_key)?,
            counter,
            previous_counter: proto.previous_counter.unwrap_or(0),
            ciphertext,
            serialized: bytes.to_vec(),
        })
    }

    /// Check the trailing MAC in constant time
    pub fn verify_mac(
        &self,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> Result<()> {
        let (content, their_mac) = self.serialized.split_at(self.serialized.len() - MAC_LENGTH);
        let mut mac = new_mac(mac_key)?;
        mac.update(&sender_identity.serialize());
        mac.update(&receiver_identity.serialize());
        mac.update(content);
        mac.verify_truncated_left(their_mac)
            .map_err(|_| ProtocolError::InvalidMessage("bad MAC".into()))
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialize(&self) -> &[u8] {
        &self.serialized
    }
}

fn compute_mac(
    sender_identity: &IdentityKey,
    receiver_identity: &IdentityKey,
    mac_key: &[u8; 32],
    content: &[u8],
) -> Result<[u8; 32]> {
    crate::crypto::kdf::hmac_sha256(
        mac_key,
        &[
            &sender_identity.serialize(),
            &receiver_identity.serialize(),
            content,
        ],
    )
}
