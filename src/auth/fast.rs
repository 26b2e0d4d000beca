use p256::elliptic_curve::subtle::ConstantTimeEq;

use super::context::{FLAGS, INTERFACE_NFC, SELECTED_VERSION_TLV, SUPPORTED_VERSIONS_TLV, Transcript};
use crate::crypto::{self, CryptoError};
use crate::store::{EndpointRef, ReaderData};

pub const FAST_CONTEXT: &[u8] = b"VolatileFast";
/// Length of the HKDF output; only the first 16 bytes are compared.
pub const FAST_OKM_LEN: usize = 58;

/// HKDF info for one endpoint.
pub fn fast_info(transcript: &Transcript, endpoint_key_x: &[u8; 32]) -> Vec<u8> {
    let mut info = Vec::with_capacity(160);
    info.extend_from_slice(FAST_CONTEXT);
    info.extend_from_slice(&transcript.reader_identifier);
    info.extend_from_slice(endpoint_key_x);
    info.push(INTERFACE_NFC);
    info.extend_from_slice(&SUPPORTED_VERSIONS_TLV);
    info.extend_from_slice(&SELECTED_VERSION_TLV);
    info.extend_from_slice(&transcript.reader_eph_x);
    info.extend_from_slice(&transcript.transaction_id);
    info.extend_from_slice(&FLAGS);
    info.extend_from_slice(&transcript.endpoint_eph_x);
    info
}

pub fn candidate_cryptogram(
    persistent_key: &[u8; 32],
    reader_key_x: &[u8; 32],
    info: &[u8],
) -> Result<[u8; 16], CryptoError> {
    let okm = crypto::hkdf_sha256_fixed::<FAST_OKM_LEN>(Some(persistent_key), reader_key_x, info)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&okm[..16]);
    Ok(out)
}

/// Linear scan over every provisioned endpoint for the one whose persistent
/// key reproduces the Auth0 cryptogram. Read-only.
pub fn find_endpoint_by_cryptogram(
    data: &ReaderData,
    transcript: &Transcript,
) -> Result<Option<EndpointRef>, CryptoError> {
    let reader_key_x = data.identity.key_x;
    for (r, _, endpoint) in data.endpoints().filter(|(_, _, e)| e.is_provisioned()) {
        let info = fast_info(transcript, &endpoint.key_x);
        let candidate = candidate_cryptogram(&endpoint.persistent_key, &reader_key_x, &info)?;
        if bool::from(candidate.ct_eq(&transcript.cryptogram)) {
            return Ok(Some(r));
        }
    }
    Ok(None)
}
