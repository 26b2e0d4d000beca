#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Auth: {0}")]
    Auth(#[from] crate::auth::AuthError),
    #[error("Crypto: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("Parse: {0}")]
    Parse(#[from] crate::tlv::ParseError),
    #[error("Secure channel: {0}")]
    SecureChannel(#[from] crate::secure::SecureChannelError),
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("Notify: {0}")]
    Notify(#[from] crate::notify::NotifyError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
