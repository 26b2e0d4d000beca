use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use super::CryptoError;

/// HKDF-SHA256. `None` and an empty salt are equivalent (zero-filled salt).
pub fn hkdf_sha256(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut okm = vec![0u8; length];
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF output too long"))?;
    Ok(okm)
}

pub fn hkdf_sha256_fixed<const N: usize>(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<[u8; N], CryptoError> {
    let mut okm = [0u8; N];
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF output too long"))?;
    Ok(okm)
}

/// ANSI X9.63 KDF: `SHA-256(Z ‖ counter_be32 ‖ shared_info)` for counter = 1, 2, …
pub fn x963_kdf_sha256(
    shared: &[u8],
    shared_info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let blocks = length.div_ceil(32);
    let counter_max = u32::try_from(blocks)
        .map_err(|_| CryptoError::KeyDerivation("X9.63 output too long"))?;
    let mut out = Vec::with_capacity(blocks * 32);
    for counter in 1..=counter_max {
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        out.extend_from_slice(&hasher.finalize());
    }
    out.truncate(length);
    Ok(out)
}
