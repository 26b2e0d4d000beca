use sha1::Sha1;
use sha2::{Digest, Sha256};

const KEY_IDENTIFIER_PREFIX: &[u8] = b"key-identifier";

pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// First 8 bytes of `SHA-256("key-identifier" ‖ key)` or of `SHA-1(key)`.
pub fn hash_identifier(key: &[u8], use_sha256: bool) -> [u8; 8] {
    let mut out = [0u8; 8];
    if use_sha256 {
        let mut hasher = Sha256::new();
        hasher.update(KEY_IDENTIFIER_PREFIX);
        hasher.update(key);
        out.copy_from_slice(&hasher.finalize()[..8]);
    } else {
        out.copy_from_slice(&sha1(key)[..8]);
    }
    out
}

pub fn issuer_id_of(public_key: &[u8]) -> [u8; 8] {
    hash_identifier(public_key, true)
}

pub fn endpoint_id_of(public_key: &[u8]) -> [u8; 6] {
    let mut out = [0u8; 6];
    out.copy_from_slice(&hash_identifier(public_key, false)[..6]);
    out
}
