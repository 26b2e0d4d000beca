//! ISO 18013-5 style session encryption between reader and endpoint.

use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError};

const READER_INFO: &[u8] = b"SKReader";
const DEVICE_INFO: &[u8] = b"SKDevice";
const READER_IV_PREFIX: [u8; 8] = [0; 8];
const DEVICE_IV_PREFIX: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

#[derive(Debug, thiserror::Error)]
pub enum SecureChannelError {
    #[error("unsupported session key length {0}")]
    KeyLength(usize),
    #[error("message counter exhausted")]
    CounterExhausted,
    #[error("session closed after a failed decryption")]
    Closed,
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Monotonic per-direction counter. Each value is handed out exactly once.
#[derive(Debug)]
pub struct MessageCounter {
    next: Option<u32>,
}

impl MessageCounter {
    fn new() -> Self {
        Self { next: Some(1) }
    }

    fn take(&mut self) -> Result<u32, SecureChannelError> {
        let current = self.next.ok_or(SecureChannelError::CounterExhausted)?;
        self.next = current.checked_add(1);
        Ok(current)
    }

    /// Value the next message in this direction will use.
    pub fn peek(&self) -> Option<u32> {
        self.next
    }
}

struct Direction {
    key: Zeroizing<Vec<u8>>,
    iv_prefix: [u8; 8],
    counter: MessageCounter,
}

impl Direction {
    fn next_iv(&mut self) -> Result<[u8; 12], SecureChannelError> {
        let counter = self.counter.take()?;
        let mut iv = [0u8; 12];
        iv[..8].copy_from_slice(&self.iv_prefix);
        iv[8..].copy_from_slice(&counter.to_be_bytes());
        Ok(iv)
    }
}

pub struct SecureContext {
    reader: Direction,
    endpoint: Direction,
    closed: bool,
}

impl SecureContext {
    /// Derive both session keys from `shared` with HKDF-SHA256 over `salt`.
    pub fn new(shared: &[u8], salt: &[u8], key_len: usize) -> Result<Self, SecureChannelError> {
        if key_len != 16 {
            return Err(SecureChannelError::KeyLength(key_len));
        }
        let reader_key = crypto::hkdf_sha256(Some(salt), shared, READER_INFO, key_len)?;
        let endpoint_key = crypto::hkdf_sha256(Some(salt), shared, DEVICE_INFO, key_len)?;
        Ok(Self {
            reader: Direction {
                key: Zeroizing::new(reader_key),
                iv_prefix: READER_IV_PREFIX,
                counter: MessageCounter::new(),
            },
            endpoint: Direction {
                key: Zeroizing::new(endpoint_key),
                iv_prefix: DEVICE_IV_PREFIX,
                counter: MessageCounter::new(),
            },
            closed: false,
        })
    }

    fn seal(&mut self, reader_originated: bool, plaintext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        if self.closed {
            return Err(SecureChannelError::Closed);
        }
        let dir = if reader_originated { &mut self.reader } else { &mut self.endpoint };
        let iv = dir.next_iv()?;
        Ok(crypto::aes128_gcm_encrypt(&dir.key, &iv, plaintext)?)
    }

    fn open(&mut self, reader_originated: bool, ciphertext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        if self.closed {
            return Err(SecureChannelError::Closed);
        }
        let dir = if reader_originated { &mut self.reader } else { &mut self.endpoint };
        let iv = dir.next_iv()?;
        match crypto::aes128_gcm_decrypt(&dir.key, &iv, ciphertext) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                self.closed = true;
                Err(e.into())
            }
        }
    }

    pub fn encrypt_to_endpoint(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        self.seal(true, plaintext)
    }

    /// A failure here closes the context for the rest of the session.
    pub fn decrypt_from_endpoint(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        self.open(false, ciphertext)
    }

    /// Endpoint side of [`Self::encrypt_to_endpoint`].
    pub fn encrypt_to_reader(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        self.seal(false, plaintext)
    }

    pub fn decrypt_from_reader(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        self.open(true, ciphertext)
    }

    pub fn reader_counter(&self) -> &MessageCounter {
        &self.reader.counter
    }

    pub fn endpoint_counter(&self) -> &MessageCounter {
        &self.endpoint.counter
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for SecureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureContext")
            .field("reader_counter", &self.reader.counter.peek())
            .field("endpoint_counter", &self.endpoint.counter.peek())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair(shared: &[u8], salt: &[u8]) -> (SecureContext, SecureContext) {
        (
            SecureContext::new(shared, salt, 16).unwrap(),
            SecureContext::new(shared, salt, 16).unwrap(),
        )
    }

    #[test]
    fn test_first_reader_message_uses_counter_one() {
        let shared = [3u8; 32];
        let salt = [9u8; 16];
        let mut ctx = SecureContext::new(&shared, &salt, 16).unwrap();
        let ct = ctx.encrypt_to_endpoint(b"hello").unwrap();

        let key = crypto::hkdf_sha256(Some(&salt), &shared, b"SKReader", 16).unwrap();
        let mut iv = [0u8; 12];
        iv[11] = 1;
        assert_eq!(ct, crypto::aes128_gcm_encrypt(&key, &iv, b"hello").unwrap());
        assert_eq!(ctx.reader_counter().peek(), Some(2));
        assert_eq!(ctx.endpoint_counter().peek(), Some(1));
    }

    #[test]
    fn test_endpoint_iv_carries_identifier_byte() {
        let shared = [5u8; 32];
        let salt = [6u8; 16];
        let mut endpoint = SecureContext::new(&shared, &salt, 16).unwrap();
        let ct = endpoint.encrypt_to_reader(b"resp").unwrap();

        let key = crypto::hkdf_sha256(Some(&salt), &shared, b"SKDevice", 16).unwrap();
        let iv = [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1];
        assert_eq!(crypto::aes128_gcm_decrypt(&key, &iv, &ct).unwrap(), b"resp");
    }

    #[test]
    fn test_failed_decrypt_closes_context() {
        let (mut reader, mut endpoint) = pair(&[1u8; 32], &[2u8; 16]);
        let mut ct = endpoint.encrypt_to_reader(b"data").unwrap();
        ct[0] ^= 1;
        assert!(reader.decrypt_from_endpoint(&ct).is_err());
        assert!(reader.is_closed());
        assert!(matches!(
            reader.encrypt_to_endpoint(b"more"),
            Err(SecureChannelError::Closed)
        ));
    }

    #[test]
    fn test_rejects_other_key_lengths() {
        assert!(matches!(
            SecureContext::new(&[0u8; 32], &[0u8; 16], 32),
            Err(SecureChannelError::KeyLength(32))
        ));
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut counter = MessageCounter { next: Some(u32::MAX) };
        assert_eq!(counter.take().unwrap(), u32::MAX);
        assert!(matches!(counter.take(), Err(SecureChannelError::CounterExhausted)));
    }

    proptest! {
        #[test]
        fn aligned_counters_roundtrip(
            shared in proptest::collection::vec(any::<u8>(), 32),
            salt in proptest::collection::vec(any::<u8>(), 16),
            pt in proptest::collection::vec(any::<u8>(), 0..200),
        ) {
            let (mut reader, mut endpoint) = pair(&shared, &salt);
            let ct = reader.encrypt_to_endpoint(&pt).unwrap();
            prop_assert_eq!(endpoint.decrypt_from_reader(&ct).unwrap(), pt.clone());
            let reply = endpoint.encrypt_to_reader(&pt).unwrap();
            prop_assert_eq!(reader.decrypt_from_endpoint(&reply).unwrap(), pt);
        }

        #[test]
        fn misaligned_counters_fail(
            shared in proptest::collection::vec(any::<u8>(), 32),
            salt in proptest::collection::vec(any::<u8>(), 16),
            pt in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let (mut reader, mut endpoint) = pair(&shared, &salt);
            let _skipped = endpoint.encrypt_to_reader(&pt).unwrap();
            let second = endpoint.encrypt_to_reader(&pt).unwrap();
            prop_assert!(reader.decrypt_from_endpoint(&second).is_err());
        }
    }
}
