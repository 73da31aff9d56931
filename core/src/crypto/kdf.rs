//! HKDF-SHA256 and HMAC-SHA256 helpers shared by the ratchets and the codec

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ProtocolError, Result};

pub type HmacSha256 = Hmac<Sha256>;

/// Expand `N` bytes of output keyed by `salt` (zeroes when absent)
pub fn derive_secrets<const N: usize>(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<[u8; N]> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = [0u8; N];
    hk.expand(info, &mut output)
        .map_err(|_| ProtocolError::InvalidState("hkdf output length"))?;
    Ok(output)
}

pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = new_mac(key)?;
    for part in parts {
        mac.update(part);
    }
    let mut output = [0u8; 32];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

pub fn new_mac(key: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| ProtocolError::InvalidKey("hmac key".into()))
}
