use rand::RngCore;

use super::AuthError;
use super::apdu::CommandApdu;
use crate::crypto::{self, KeyPair};
use crate::store::ReaderIdentity;
use crate::tlv::{ParseError, ber, simple};

pub const PROTOCOL_VERSION: [u8; 2] = [0x02, 0x00];
pub const READER_CONTEXT: [u8; 4] = [0x41, 0x5D, 0x95, 0x69];
pub const DEVICE_CONTEXT: [u8; 4] = [0x4E, 0x88, 0x7B, 0x4C];
pub const INTERFACE_NFC: u8 = 0x5E;
pub const FLAGS: [u8; 2] = [0x01, 0x01];
/// `5C 04 02 00 01 00`: protocol versions the endpoint may pick from.
pub const SUPPORTED_VERSIONS_TLV: [u8; 6] = [0x5C, 0x04, 0x02, 0x00, 0x01, 0x00];
/// `5C 02 02 00`: the version this reader speaks.
pub const SELECTED_VERSION_TLV: [u8; 4] = [0x5C, 0x02, 0x02, 0x00];

const TAG_ENDPOINT_EPH: u32 = 0x86;
const TAG_CRYPTOGRAM: u32 = 0x9D;

/// Per-tap reader material, before the endpoint has answered Auth0.
pub struct AuthContext {
    reader_eph: KeyPair,
    transaction_id: [u8; 16],
    reader_identifier: [u8; 16],
}

impl AuthContext {
    pub fn new(identity: &ReaderIdentity) -> Self {
        let mut transaction_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        Self::with_parts(identity, crypto::generate_ephemeral_keypair(), transaction_id)
    }

    pub fn with_parts(identity: &ReaderIdentity, reader_eph: KeyPair, transaction_id: [u8; 16]) -> Self {
        Self {
            reader_eph,
            transaction_id,
            reader_identifier: identity.reader_identifier(),
        }
    }

    pub fn auth0_payload(&self) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(110);
        simple::push(&mut out, 0x5C, &PROTOCOL_VERSION)?;
        simple::push(&mut out, 0x87, &self.reader_eph.public)?;
        simple::push(&mut out, 0x4C, &self.transaction_id)?;
        simple::push(&mut out, 0x4D, &self.reader_identifier)?;
        Ok(out)
    }

    pub fn auth0_command(&self) -> Result<CommandApdu, ParseError> {
        Ok(CommandApdu::auth0(self.auth0_payload()?))
    }

    /// Consume the Auth0 response body (`86 41 <eph pub> 9D 10 <cryptogram>`).
    pub fn accept_auth0(self, body: &[u8]) -> Result<Transcript, AuthError> {
        let records = ber::unpack_array(body)?;
        let eph = ber::find_tag(TAG_ENDPOINT_EPH, &records)
            .ok_or(AuthError::Protocol("Auth0 response without endpoint key"))?;
        let cryptogram = ber::find_tag(TAG_CRYPTOGRAM, &records)
            .ok_or(AuthError::Protocol("Auth0 response without cryptogram"))?;

        let endpoint_eph_x = crypto::point_x(&eph.value)?;
        let mut endpoint_eph_pub = [0u8; 65];
        endpoint_eph_pub.copy_from_slice(&eph.value);
        let cryptogram: [u8; 16] = cryptogram
            .value
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::Parse(ParseError::BadLength))?;

        Ok(Transcript {
            reader_eph_x: self.reader_eph.x(),
            reader_eph: self.reader_eph,
            transaction_id: self.transaction_id,
            reader_identifier: self.reader_identifier,
            endpoint_eph_pub,
            endpoint_eph_x,
            cryptogram,
        })
    }
}

/// Everything both sides know once Auth0 has completed.
pub struct Transcript {
    pub reader_eph: KeyPair,
    pub reader_eph_x: [u8; 32],
    pub transaction_id: [u8; 16],
    pub reader_identifier: [u8; 16],
    pub endpoint_eph_pub: [u8; 65],
    pub endpoint_eph_x: [u8; 32],
    pub cryptogram: [u8; 16],
}

impl Transcript {
    fn shared_info(&self, context: &[u8; 4]) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(112);
        simple::push(&mut out, 0x4D, &self.reader_identifier)?;
        simple::push(&mut out, 0x86, &self.endpoint_eph_x)?;
        simple::push(&mut out, 0x87, &self.reader_eph_x)?;
        simple::push(&mut out, 0x4C, &self.transaction_id)?;
        simple::push(&mut out, 0x93, context)?;
        Ok(out)
    }

    /// Blob the reader signs in Auth1.
    pub fn reader_shared_info(&self) -> Result<Vec<u8>, ParseError> {
        self.shared_info(&READER_CONTEXT)
    }

    /// Blob the endpoint signs in its Auth1 response.
    pub fn device_shared_info(&self) -> Result<Vec<u8>, ParseError> {
        self.shared_info(&DEVICE_CONTEXT)
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("transaction_id", &crypto::hex(&self.transaction_id))
            .field("reader_identifier", &crypto::hex(&self.reader_identifier))
            .field("endpoint_eph_x", &crypto::hex(&self.endpoint_eph_x))
            .finish_non_exhaustive()
    }
}
