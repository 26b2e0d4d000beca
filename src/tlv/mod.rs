pub mod ber;
pub mod ndef;
pub mod simple;
pub mod tlv8;

pub use ber::BerTlv;
pub use ndef::NdefRecord;
pub use tlv8::{Tlv8, Tlv8Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("truncated input")]
    Truncated,
    #[error("bad length")]
    BadLength,
    #[error("unknown length or record form")]
    UnknownForm,
}
