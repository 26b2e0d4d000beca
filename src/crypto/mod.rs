pub mod aead;
pub mod ec;
pub mod hash;
pub mod kdf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use aead::{aes128_gcm_decrypt, aes128_gcm_encrypt};
pub use ec::{
    KeyPair, ecdh_shared_secret, ecdsa_sign_det, ecdsa_verify, generate_ephemeral_keypair,
    issuer_verify,
};
pub use hash::{endpoint_id_of, hash_identifier, issuer_id_of, sha1, sha256};
pub use kdf::{hkdf_sha256, hkdf_sha256_fixed, x963_kdf_sha256};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("key derivation failed: {0}")]
    KeyDerivation(&'static str),
    #[error("AEAD operation failed")]
    Aead,
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn base64_decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(text.trim())?)
}

/// X coordinate of an uncompressed SEC1 point (`04 ‖ X ‖ Y`).
pub fn point_x(public_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut x = [0u8; 32];
    x.copy_from_slice(&public_key[1..33]);
    Ok(x)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
