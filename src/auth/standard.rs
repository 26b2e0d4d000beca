use zeroize::Zeroizing;

use super::AuthError;
use super::apdu::CommandApdu;
use super::context::{FLAGS, INTERFACE_NFC, SELECTED_VERSION_TLV, SUPPORTED_VERSIONS_TLV, Transcript};
use super::transport::Link;
use crate::crypto::{self, CryptoError};
use crate::secure::SecureContext;
use crate::store::{EndpointRef, ReaderData};
use crate::tlv::{ber, simple};

pub const PERSISTENT_CONTEXT: &[u8] = b"Persistent";
pub const VOLATILE_CONTEXT: &[u8] = b"Volatile";

const TAG_DEVICE_IDENTIFIER: u32 = 0x4E;
const TAG_SIGNATURE: u32 = 0x9E;

/// Keys established by the Auth1 exchange.
pub struct SessionKeys {
    pub persistent_key: Zeroizing<[u8; 32]>,
    pub volatile_key: Zeroizing<[u8; 48]>,
}

/// What the endpoint sent back inside the Auth1 envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    pub device_identifier: [u8; 6],
    pub signature: Vec<u8>,
}

pub enum StandardOutcome {
    Success {
        endpoint: EndpointRef,
        keys: SessionKeys,
        secure: SecureContext,
        device: DeviceResponse,
    },
    /// Endpoint unknown or its signature did not verify. The secure context
    /// stays open for the attestation exchange.
    Upgrade {
        keys: SessionKeys,
        secure: SecureContext,
        device: DeviceResponse,
        issuer_hint: Option<usize>,
    },
}

pub fn key_info(transcript: &Transcript, context: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(128);
    info.extend_from_slice(&transcript.reader_eph_x);
    info.extend_from_slice(&transcript.endpoint_eph_x);
    info.extend_from_slice(&transcript.transaction_id);
    info.push(INTERFACE_NFC);
    info.extend_from_slice(&FLAGS);
    info.extend_from_slice(context);
    info.extend_from_slice(&SELECTED_VERSION_TLV);
    info.extend_from_slice(&SUPPORTED_VERSIONS_TLV);
    info
}

pub fn derive_session_keys(transcript: &Transcript) -> Result<SessionKeys, CryptoError> {
    let shared = crypto::ecdh_shared_secret(
        transcript.reader_eph.private.as_slice(),
        &transcript.endpoint_eph_pub,
    )?;
    let derived = Zeroizing::new(crypto::x963_kdf_sha256(
        shared.as_slice(),
        &transcript.transaction_id,
        32,
    )?);
    let persistent_key = crypto::hkdf_sha256_fixed::<32>(
        None,
        &derived,
        &key_info(transcript, PERSISTENT_CONTEXT),
    )?;
    let volatile_key = crypto::hkdf_sha256_fixed::<48>(
        None,
        &derived,
        &key_info(transcript, VOLATILE_CONTEXT),
    )?;
    Ok(SessionKeys {
        persistent_key: Zeroizing::new(persistent_key),
        volatile_key: Zeroizing::new(volatile_key),
    })
}

pub fn parse_device_response(plaintext: &[u8]) -> Result<DeviceResponse, AuthError> {
    let records = ber::unpack_array(plaintext)?;
    let id = ber::find_tag(TAG_DEVICE_IDENTIFIER, &records)
        .ok_or(AuthError::Protocol("Auth1 response without device identifier"))?;
    let signature = ber::find_tag(TAG_SIGNATURE, &records)
        .ok_or(AuthError::Protocol("Auth1 response without signature"))?;
    let device_identifier: [u8; 6] = id
        .value
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::Protocol("device identifier is not 6 bytes"))?;
    Ok(DeviceResponse {
        device_identifier,
        signature: signature.value.clone(),
    })
}

pub(crate) fn run(
    data: &ReaderData,
    transcript: &Transcript,
    link: &mut Link<'_>,
) -> Result<StandardOutcome, AuthError> {
    let reader_info = transcript.reader_shared_info()?;
    let signature = crypto::ecdsa_sign_det(&data.identity.private_key, &reader_info)?;
    let payload = simple::encode(0x9E, &signature)?;
    let body = link.exchange_ok("AUTH1", &CommandApdu::auth1(payload))?;

    let keys = derive_session_keys(transcript)?;
    let mut secure = SecureContext::new(keys.volatile_key.as_slice(), &transcript.transaction_id, 16)?;
    let plaintext = secure.decrypt_from_endpoint(&body)?;
    let device = parse_device_response(&plaintext)?;

    let device_info = transcript.device_shared_info()?;
    let Some(r) = data.find_endpoint(&device.device_identifier) else {
        tracing::debug!(
            device = %crypto::hex(&device.device_identifier),
            "Endpoint unknown, upgrading to attestation"
        );
        return Ok(StandardOutcome::Upgrade { keys, secure, device, issuer_hint: None });
    };

    let verified = data
        .endpoint(r)
        .is_some_and(|(_, ep)| crypto::ecdsa_verify(&ep.public_key, &device_info, &device.signature));
    if verified {
        Ok(StandardOutcome::Success { endpoint: r, keys, secure, device })
    } else {
        tracing::warn!(
            device = %crypto::hex(&device.device_identifier),
            "Device signature does not verify under the stored key"
        );
        Ok(StandardOutcome::Upgrade {
            keys,
            secure,
            device,
            issuer_hint: Some(r.issuer),
        })
    }
}
