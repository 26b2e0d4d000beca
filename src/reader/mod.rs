pub mod dispatch;
pub mod ecp;

use std::time::Duration;

use tokio::sync::oneshot;

use crate::auth::{NfcTransport, TransportError};

pub use dispatch::run_reader_loop;

/// ISO 14443A anticollision result of the selected target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub uid: Vec<u8>,
    pub atqa: [u8; 2],
    pub sak: u8,
}

/// NFC driver → reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcEvent {
    FieldUp,
    TagSelected(TagInfo),
    FieldDown,
}

/// HomeKit characteristic handlers → reader. Each carries its reply channel.
#[derive(Debug)]
pub enum MgmtEvent {
    ControlPoint {
        request: Vec<u8>,
        reply: oneshot::Sender<Vec<u8>>,
    },
    SupportedConfiguration {
        reply: oneshot::Sender<Vec<u8>>,
    },
}

/// Stand-in used when no NFC driver is attached: every exchange fails.
#[derive(Debug, Default)]
pub struct UnavailableTransport;

impl NfcTransport for UnavailableTransport {
    fn transceive(&mut self, _apdu: &[u8], _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Driver("no NFC driver attached".into()))
    }
}
