use std::time::{Duration, Instant};

use super::AuthError;
use super::apdu::{CommandApdu, ResponseApdu};
use crate::crypto::hex;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("NFC field lost")]
    FieldLost,
    #[error("APDU deadline exceeded")]
    Timeout,
    #[error("session time budget exhausted")]
    SessionExpired,
    #[error("driver: {0}")]
    Driver(String),
}

/// Blocking APDU exchange with the selected ISO-14443A target. The response
/// keeps its trailing `SW1 SW2`.
pub trait NfcTransport: Send {
    fn transceive(&mut self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Install the Enhanced Contactless Polling frame broadcast while idle.
    fn update_polling_frame(&mut self, _frame: &[u8]) {}
}

/// One tap's view of the transport: enforces the per-APDU deadline and the
/// session budget, logs raw buffers.
pub(crate) struct Link<'a> {
    transport: &'a mut dyn NfcTransport,
    deadline: Instant,
    apdu_timeout: Duration,
}

impl<'a> Link<'a> {
    pub fn new(transport: &'a mut dyn NfcTransport, session_budget: Duration, apdu_timeout: Duration) -> Self {
        Self {
            transport,
            deadline: Instant::now() + session_budget,
            apdu_timeout,
        }
    }

    pub fn exchange(&mut self, name: &'static str, apdu: &CommandApdu) -> Result<ResponseApdu, AuthError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::SessionExpired.into());
        }
        let bytes = apdu.to_bytes()?;
        tracing::debug!(cmd = name, apdu = %hex(&bytes), "APDU >>");
        let raw = self
            .transport
            .transceive(&bytes, self.apdu_timeout.min(remaining))?;
        tracing::debug!(cmd = name, resp = %hex(&raw), "APDU <<");
        if Instant::now() > self.deadline {
            return Err(TransportError::SessionExpired.into());
        }
        Ok(ResponseApdu::parse(&raw)?)
    }

    /// Exchange and require `90 00`. Returns the body.
    pub fn exchange_ok(&mut self, name: &'static str, apdu: &CommandApdu) -> Result<Vec<u8>, AuthError> {
        let resp = self.exchange(name, apdu)?;
        if !resp.is_success() {
            return Err(AuthError::Status { command: name, sw: resp.sw });
        }
        Ok(resp.data)
    }
}
