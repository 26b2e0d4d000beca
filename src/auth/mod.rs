pub mod apdu;
pub mod attestation;
pub mod context;
pub mod controller;
pub mod fast;
pub mod standard;
pub mod transport;

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoError;
use crate::secure::SecureChannelError;
use crate::store::StoreError;
use crate::tlv::ParseError;

pub use attestation::{AttestationError, VerifiedAttestation, verify_attestation};
pub use context::{AuthContext, Transcript};
pub use controller::{AuthOptions, authenticate};
pub use transport::{NfcTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyFlow {
    Fast,
    Standard,
    Attestation,
}

impl KeyFlow {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyFlow::Fast => "fast",
            KeyFlow::Standard => "standard",
            KeyFlow::Attestation => "attestation",
        }
    }
}

impl std::fmt::Display for KeyFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure classes reported in logs. Callers outside the reader
/// only ever see success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Parse,
    Crypto,
    Protocol,
    Store,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("secure channel: {0}")]
    SecureChannel(#[from] SecureChannelError),
    #[error("attestation: {0}")]
    Attestation(#[from] AttestationError),
    #[error("{command} returned status {sw:04X}")]
    Status { command: &'static str, sw: u16 },
    #[error("target refused the HomeKey applet ({0:04X})")]
    AppletNotSelected(u16),
    #[error("protocol: {0}")]
    Protocol(&'static str),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("issuer has no room for another endpoint")]
    OutOfResources,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Transport(_) => ErrorKind::Transport,
            AuthError::Parse(_) => ErrorKind::Parse,
            AuthError::Crypto(_) => ErrorKind::Crypto,
            AuthError::SecureChannel(SecureChannelError::Crypto(_)) => ErrorKind::Crypto,
            AuthError::SecureChannel(_) => ErrorKind::Protocol,
            AuthError::Attestation(e) => e.kind(),
            AuthError::Status { .. } | AuthError::AppletNotSelected(_) | AuthError::Protocol(_) => {
                ErrorKind::Protocol
            }
            AuthError::Store(_) | AuthError::OutOfResources => ErrorKind::Store,
            AuthError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// Outcome of a successful tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub flow: KeyFlow,
    pub issuer_id: [u8; 8],
    pub endpoint_id: [u8; 6],
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
