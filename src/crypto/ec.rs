use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::CryptoError;

/// secp256r1 key pair with the public half in uncompressed SEC1 form.
#[derive(Clone)]
pub struct KeyPair {
    pub private: Zeroizing<[u8; 32]>,
    pub public: [u8; 65],
}

impl KeyPair {
    pub fn from_private(private: &[u8]) -> Result<Self, CryptoError> {
        let secret = secret_key(private)?;
        Ok(Self::from_secret(&secret))
    }

    fn from_secret(secret: &SecretKey) -> Self {
        let mut private = Zeroizing::new([0u8; 32]);
        private.copy_from_slice(&secret.to_bytes());
        let point = secret.public_key().to_encoded_point(false);
        let mut public = [0u8; 65];
        public.copy_from_slice(point.as_bytes());
        Self { private, public }
    }

    /// Affine X coordinate of the public key.
    pub fn x(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.public[1..33]);
        x
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &super::hex(&self.public))
            .finish_non_exhaustive()
    }
}

pub fn generate_ephemeral_keypair() -> KeyPair {
    KeyPair::from_secret(&SecretKey::random(&mut OsRng))
}

fn secret_key(private: &[u8]) -> Result<SecretKey, CryptoError> {
    if private.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            got: private.len(),
        });
    }
    SecretKey::from_slice(private).map_err(|_| CryptoError::InvalidPrivateKey)
}

/// Raw X coordinate of `private · peer_public`.
pub fn ecdh_shared_secret(
    private: &[u8],
    peer_public: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let secret = secret_key(private)?;
    let peer = PublicKey::from_sec1_bytes(peer_public).map_err(|_| CryptoError::InvalidPublicKey)?;
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    Ok(out)
}

/// ECDSA-SHA256 over `msg` with RFC 6979 nonces. Returns `r ‖ s`.
pub fn ecdsa_sign_det(private: &[u8], msg: &[u8]) -> Result<[u8; 64], CryptoError> {
    let signing_key = SigningKey::from(&secret_key(private)?);
    let signature: Signature = signing_key.sign(msg);
    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

pub fn ecdsa_verify(public: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public) else {
        tracing::debug!(len = public.len(), "ECDSA verify: unusable public key");
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        tracing::debug!(len = signature.len(), "ECDSA verify: malformed signature");
        return false;
    };
    key.verify(msg, &signature).is_ok()
}

/// Verify a signature made by an issuer key. 32-byte keys are Ed25519,
/// SEC1 points (33 or 65 bytes) are P-256 ECDSA-SHA256.
pub fn issuer_verify(issuer_public: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    match issuer_public.len() {
        32 => {
            let mut key_bytes = [0u8; 32];
            key_bytes.copy_from_slice(issuer_public);
            let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
                return false;
            };
            let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                return false;
            };
            key.verify_strict(msg, &signature).is_ok()
        }
        33 | 65 => ecdsa_verify(issuer_public, msg, signature),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_public_matches_private() {
        let pair = generate_ephemeral_keypair();
        assert_eq!(pair.public[0], 0x04);
        let again = KeyPair::from_private(pair.private.as_slice()).unwrap();
        assert_eq!(again.public, pair.public);
        assert_eq!(pair.x(), pair.public[1..33]);
    }

    #[test]
    fn test_ecdh_is_symmetric() {
        let a = generate_ephemeral_keypair();
        let b = generate_ephemeral_keypair();
        let ab = ecdh_shared_secret(a.private.as_slice(), &b.public).unwrap();
        let ba = ecdh_shared_secret(b.private.as_slice(), &a.public).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_ecdh_rejects_bad_point() {
        let a = generate_ephemeral_keypair();
        let mut bogus = [0u8; 65];
        bogus[0] = 0x04;
        assert!(matches!(
            ecdh_shared_secret(a.private.as_slice(), &bogus),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_sign_is_deterministic_and_verifies() {
        let pair = generate_ephemeral_keypair();
        let sig1 = ecdsa_sign_det(pair.private.as_slice(), b"transcript").unwrap();
        let sig2 = ecdsa_sign_det(pair.private.as_slice(), b"transcript").unwrap();
        assert_eq!(sig1, sig2);
        assert!(ecdsa_verify(&pair.public, b"transcript", &sig1));
        assert!(!ecdsa_verify(&pair.public, b"transcripT", &sig1));

        let mut tampered = sig1;
        tampered[10] ^= 0x01;
        assert!(!ecdsa_verify(&pair.public, b"transcript", &tampered));
    }

    #[test]
    fn test_sign_rejects_short_private_key() {
        assert!(matches!(
            ecdsa_sign_det(&[1u8; 16], b"x"),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_issuer_verify_ed25519() {
        use ed25519_dalek::Signer as _;
        let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let public = signing.verifying_key().to_bytes();
        let sig = signing.sign(b"attest").to_bytes();
        assert!(issuer_verify(&public, b"attest", &sig));
        assert!(!issuer_verify(&public, b"other", &sig));
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn public_key_is_scalar_times_generator(bytes in proptest::prelude::any::<[u8; 32]>()) {
            use p256::elliptic_curve::group::Curve as _;
            let Ok(secret) = SecretKey::from_slice(&bytes) else {
                return Ok(());
            };
            let pair = KeyPair::from_private(&bytes).unwrap();
            let point = (p256::ProjectivePoint::GENERATOR * *secret.to_nonzero_scalar()).to_affine();
            let encoded = point.to_encoded_point(false);
            proptest::prop_assert_eq!(encoded.as_bytes(), &pair.public[..]);
            proptest::prop_assert_eq!(&pair.x()[..], &pair.public[1..33]);
        }
    }

    #[test]
    fn test_issuer_verify_p256() {
        let pair = generate_ephemeral_keypair();
        let sig = ecdsa_sign_det(pair.private.as_slice(), b"attest").unwrap();
        assert!(issuer_verify(&pair.public, b"attest", &sig));
        assert!(!issuer_verify(&pair.public[..40], b"attest", &sig));
    }
}
