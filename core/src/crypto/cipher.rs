//! Message body encryption with AES-256-GCM
//!
//! Every message key is used exactly once, so the nonce is taken from the
//! derived IV instead of being generated and shipped with the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::error::{ProtocolError, Result};

const NONCE_LENGTH: usize = 12;

pub fn aes_gcm_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| ProtocolError::InvalidKey("cipher key".into()))?;
    let nonce = Nonce::from_slice(&iv[..NONCE_LENGTH]);
    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| ProtocolError::InvalidState("encryption failed"))
}

pub fn aes_gcm_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| ProtocolError::InvalidKey("cipher key".into()))?;
    let nonce = Nonce::from_slice(&iv[..NONCE_LENGTH]);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| ProtocolError::InvalidMessage("ciphertext failed authentication".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_encrypt_decrypt() {
        let key = [1u8; 32];
        let iv = [2u8; 16];
        let plaintext = b"Hello, World!";

        let ciphertext = aes_gcm_encrypt(&key, &iv, plaintext).unwrap();
        let decrypted = aes_gcm_decrypt(&key, &iv, &ciphertext).unwrap();

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = aes_gcm_encrypt(&[1u8; 32], &[2u8; 16], b"secret").unwrap();
        let result = aes_gcm_decrypt(&[3u8; 32], &[2u8; 16], &ciphertext);
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }
}
