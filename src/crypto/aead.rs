use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};

use super::CryptoError;

fn cipher(key: &[u8]) -> Result<Aes128Gcm, CryptoError> {
    Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 16,
        got: key.len(),
    })
}

/// AES-128-GCM with empty AAD. Output is `ciphertext ‖ tag(16)`.
pub fn aes128_gcm_encrypt(
    key: &[u8],
    iv: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    cipher(key)?
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::Aead)
}

pub fn aes128_gcm_decrypt(
    key: &[u8],
    iv: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < 16 {
        return Err(CryptoError::Aead);
    }
    cipher(key)?
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Aead)
}
