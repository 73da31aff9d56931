//! KeyExchangeMessage: one leg of the interactive handshake

use prost::Message;
use rand::rngs::OsRng;
use rand::Rng;

use crate::consts::CURRENT_VERSION;
use crate::crypto::curve::PublicKey;
use crate::crypto::keys::IdentityKey;
use crate::error::{ProtocolError, Result};
use crate::messaging::proto::KeyExchangeMessageProto;
use crate::messaging::{decode_identity, decode_key, parse_version_byte, version_byte};

pub const INITIATE_FLAG: u32 = 0x01;
pub const RESPONSE_FLAG: u32 = 0x02;
pub const SIMULTANEOUS_INITIATE_FLAG: u32 = 0x04;

const FLAG_BITS: u32 = 5;

/// Random handshake sequence number
pub fn generate_sequence() -> u32 {
    OsRng.gen_range(1..65535)
}

#[derive(Clone, Debug)]
pub struct KeyExchangeMessage {
    version: u8,
    sequence: u32,
    flags: u32,
    base_key: PublicKey,
    base_key_signature: Option<Vec<u8>>,
    ratchet_key: PublicKey,
    identity_key: IdentityKey,
    identity_update: Option<Vec<u8>>,
}

impl KeyExchangeMessage {
    pub fn new(
        version: u8,
        sequence: u32,
        flags: u32,
        base_key: PublicKey,
        base_key_signature: Option<Vec<u8>>,
        ratchet_key: PublicKey,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            version,
            sequence,
            flags,
            base_key,
            base_key_signature,
            ratchet_key,
            identity_key,
            identity_update: None,
        }
    }

    /// Attach an opaque payload carried to the peer untouched
    pub fn with_identity_update(mut self, payload: Vec<u8>) -> Self {
        self.identity_update = Some(payload);
        self
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (version, body) = parse_version_byte(bytes)?;
        let proto = KeyExchangeMessageProto::decode(body)?;

        let missing_signature = version >= CURRENT_VERSION && proto.base_key_signature.is_none();
        let (id, base_key, ratchet_key, identity_key) =
            match (proto.id, proto.base_key, proto.ratchet_key, proto.identity_key) {
                (Some(id), Some(base), Some(ratchet), Some(identity)) if !missing_signature => {
                    (id, base, ratchet, identity)
                }
                _ => {
                    return Err(ProtocolError::InvalidMessage(
                        "key exchange is missing required fields".into(),
                    ))
                }
            };

        Ok(Self {
            version,
            sequence: id >> FLAG_BITS,
            flags: id & ((1 << FLAG_BITS) - 1),
            base_key: decode_key(&base_key)?,
            base_key_signature: proto.base_key_signature,
            ratchet_key: decode_key(&ratchet_key)?,
            identity_key: decode_identity(&identity_key)?,
            identity_update: proto.identity_update,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let body = KeyExchangeMessageProto {
            id: Some((self.sequence << FLAG_BITS) | self.flags),
            base_key: Some(self.base_key.serialize()),
            ratchet_key: Some(self.ratchet_key.serialize()),
            identity_key: Some(self.identity_key.serialize()),
            base_key_signature: self.base_key_signature.clone(),
            identity_update: self.identity_update.clone(),
        }
        .encode_to_vec();

        let mut out = Vec::with_capacity(1 + body.len());
        out.push(version_byte(self.version));
        out.extend_from_slice(&body);
        out
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn base_key_signature(&self) -> Option<&[u8]> {
        self.base_key_signature.as_deref()
    }

    pub fn ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn identity_update(&self) -> Option<&[u8]> {
        self.identity_update.as_deref()
    }

    pub fn is_initiate(&self) -> bool {
        self.flags & INITIATE_FLAG != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & RESPONSE_FLAG != 0
    }

    pub fn is_response_for_simultaneous_initiate(&self) -> bool {
        self.flags & SIMULTANEOUS_INITIATE_FLAG != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::MIN_VERSION;
    use crate::crypto::curve::KeyPair;
    use crate::crypto::keys::IdentityKeyPair;

    #[test]
    fn test_sequence_and_flags_share_id() {
        let identity = IdentityKeyPair::generate();
        let base = KeyPair::generate();
        let signature = identity.sign(&base.public_key.serialize());
        let message = KeyExchangeMessage::new(
            CURRENT_VERSION,
            40_000,
            RESPONSE_FLAG | SIMULTANEOUS_INITIATE_FLAG,
            base.public_key,
            Some(signature),
            KeyPair::generate().public_key,
            *identity.identity_key(),
        )
        .with_identity_update(b"update".to_vec());

        let parsed = KeyExchangeMessage::deserialize(&message.serialize()).unwrap();
        assert_eq!(parsed.sequence(), 40_000);
        assert!(parsed.is_response());
        assert!(parsed.is_response_for_simultaneous_initiate());
        assert!(!parsed.is_initiate());
        assert_eq!(parsed.identity_update(), Some(&b"update"[..]));
        assert!(parsed
            .identity_key()
            .verify_signature(&parsed.base_key().serialize(), parsed.base_key_signature().unwrap()));
    }

    #[test]
    fn test_version_3_requires_signature() {
        let identity = IdentityKeyPair::generate();
        let unsigned = KeyExchangeMessage::new(
            CURRENT_VERSION,
            1,
            INITIATE_FLAG,
            KeyPair::generate().public_key,
            None,
            KeyPair::generate().public_key,
            *identity.identity_key(),
        );
        assert!(matches!(
            KeyExchangeMessage::deserialize(&unsigned.serialize()),
            Err(ProtocolError::InvalidMessage(_))
        ));

        let legacy = KeyExchangeMessage::new(
            MIN_VERSION,
            1,
            INITIATE_FLAG,
            KeyPair::generate().public_key,
            None,
            KeyPair::generate().public_key,
            *identity.identity_key(),
        );
        let parsed = KeyExchangeMessage::deserialize(&legacy.serialize()).unwrap();
        assert_eq!(parsed.version(), MIN_VERSION);
        assert!(parsed.base_key_signature().is_none());
    }

    #[test]
    fn test_sequence_range() {
        for _ in 0..100 {
            let sequence = generate_sequence();
            assert!((1..65535).contains(&sequence));
        }
    }
}
