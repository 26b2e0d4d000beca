//! ATTESTATION flow: onboarding an endpoint the store has never seen, by
//! checking an issuer-signed binding of its long-term key.

use ciborium::value::Value;
use rand::RngCore;
use zeroize::Zeroizing;

use super::apdu::CommandApdu;
use super::context::Transcript;
use super::standard::DeviceResponse;
use super::transport::Link;
use super::{AuthError, ErrorKind};
use crate::crypto;
use crate::secure::SecureContext;
use crate::store::{Issuer, ReaderData};
use crate::tlv::{NdefRecord, ParseError, ber, ndef, simple};

pub const ATTESTATION_DIGEST_LABEL: &str = "HomeKeyAttestation";
const CBOR_TAG_ENCODED: u64 = 24;
const TAG_ENVELOPE: u32 = 0x53;

// Handover request, carrier and reader engagement payloads.
const HANDOVER_REQUEST: [u8; 30] = [
    0x15, 0x91, 0x02, 0x02, 0x63, 0x72, 0x01, 0x02, 0x51, 0x02, 0x11, 0x61, 0x63, 0x01, 0x03,
    0x6E, 0x66, 0x63, 0x01, 0x0A, 0x6D, 0x64, 0x6F, 0x63, 0x72, 0x65, 0x61, 0x64, 0x65, 0x72,
];
const NFC_CARRIER: [u8; 1] = [0x01];
const READER_ENGAGEMENT: [u8; 9] = [0xA2, 0x00, 0x63, 0x31, 0x2E, 0x30, 0x20, 0x81, 0x29];

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("CBOR: {0}")]
    Cbor(String),
    #[error("missing or mistyped field {0}")]
    MissingField(&'static str),
    #[error("issuer not known to this reader")]
    UnknownIssuer,
    #[error("issuer signature does not verify")]
    BadSignature,
    #[error("device key is not an uncompressed P-256 point")]
    BadDeviceKey,
    #[error("attested key does not match the key used in this tap")]
    DeviceBinding,
}

impl AttestationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttestationError::Cbor(_) | AttestationError::MissingField(_) => ErrorKind::Parse,
            AttestationError::UnknownIssuer => ErrorKind::NotFound,
            AttestationError::BadSignature
            | AttestationError::BadDeviceKey
            | AttestationError::DeviceBinding => ErrorKind::Crypto,
        }
    }
}

/// Decoded step-2 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationPackage {
    pub device_public_key: Vec<u8>,
    pub issuer_id: [u8; 8],
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAttestation {
    pub issuer: usize,
    pub issuer_id: [u8; 8],
    pub device_public_key: Vec<u8>,
    pub endpoint_id: [u8; 6],
    pub document_hash: [u8; 32],
}

fn to_cbor(value: &Value) -> Result<Vec<u8>, AttestationError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| AttestationError::Cbor(e.to_string()))?;
    Ok(buf)
}

fn from_cbor(bytes: &[u8]) -> Result<Value, AttestationError> {
    ciborium::from_reader(bytes).map_err(|e| AttestationError::Cbor(e.to_string()))
}

/// Unwrap `Tag24(bstr)` and return the embedded bytes.
pub fn decode_tag24(bytes: &[u8]) -> Result<Vec<u8>, AttestationError> {
    match from_cbor(bytes)? {
        Value::Tag(CBOR_TAG_ENCODED, inner) => match *inner {
            Value::Bytes(b) => Ok(b),
            _ => Err(AttestationError::MissingField("tag 24 payload")),
        },
        _ => Err(AttestationError::MissingField("tag 24")),
    }
}

pub fn encode_tag24(payload: &[u8]) -> Result<Vec<u8>, AttestationError> {
    to_cbor(&Value::Tag(CBOR_TAG_ENCODED, Box::new(Value::Bytes(payload.to_vec()))))
}

/// SHA-256 over `["HomeKeyAttestation", document, device_pub, issuer_id]`.
pub fn attestation_digest(
    document: &[u8],
    device_public_key: &[u8],
    issuer_id: &[u8],
) -> Result<[u8; 32], AttestationError> {
    let array = Value::Array(vec![
        Value::Text(ATTESTATION_DIGEST_LABEL.to_string()),
        Value::Bytes(document.to_vec()),
        Value::Bytes(device_public_key.to_vec()),
        Value::Bytes(issuer_id.to_vec()),
    ]);
    Ok(crypto::sha256(&to_cbor(&array)?))
}

fn map_get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
        .map(|(_, v)| v)
}

pub fn parse_package(bytes: &[u8]) -> Result<AttestationPackage, AttestationError> {
    let Value::Map(entries) = from_cbor(bytes)? else {
        return Err(AttestationError::MissingField("package map"));
    };

    // deviceEngagement: Tag24(bstr map{1: device_pub})
    let engagement = match map_get(&entries, "deviceEngagement") {
        Some(Value::Tag(CBOR_TAG_ENCODED, inner)) => match inner.as_ref() {
            Value::Bytes(b) => from_cbor(b)?,
            _ => return Err(AttestationError::MissingField("deviceEngagement")),
        },
        _ => return Err(AttestationError::MissingField("deviceEngagement")),
    };
    let Value::Map(engagement) = engagement else {
        return Err(AttestationError::MissingField("deviceEngagement"));
    };
    let device_public_key = engagement
        .iter()
        .find_map(|(k, v)| match (k, v) {
            (Value::Integer(i), Value::Bytes(b)) if i128::from(*i) == 1 => Some(b.clone()),
            _ => None,
        })
        .ok_or(AttestationError::MissingField("device key"))?;

    let issuer_id: [u8; 8] = match map_get(&entries, "issuerId") {
        Some(Value::Bytes(b)) => b
            .as_slice()
            .try_into()
            .map_err(|_| AttestationError::MissingField("issuerId"))?,
        _ => return Err(AttestationError::MissingField("issuerId")),
    };
    let signature = match map_get(&entries, "signature") {
        Some(Value::Bytes(b)) => b.clone(),
        _ => return Err(AttestationError::MissingField("signature")),
    };

    Ok(AttestationPackage {
        device_public_key,
        issuer_id,
        signature,
    })
}

/// Check a step-2 package against the known issuers. Pure: no I/O, no
/// store mutation.
pub fn verify_attestation(
    issuers: &[Issuer],
    document: &[u8],
    package: &[u8],
) -> Result<VerifiedAttestation, AttestationError> {
    let package = parse_package(package)?;
    let issuer = issuers
        .iter()
        .position(|i| i.issuer_id == package.issuer_id)
        .ok_or(AttestationError::UnknownIssuer)?;
    crypto::point_x(&package.device_public_key).map_err(|_| AttestationError::BadDeviceKey)?;

    let digest = attestation_digest(document, &package.device_public_key, &package.issuer_id)?;
    if !crypto::issuer_verify(&issuers[issuer].public_key, &digest, &package.signature) {
        return Err(AttestationError::BadSignature);
    }

    Ok(VerifiedAttestation {
        issuer,
        issuer_id: package.issuer_id,
        endpoint_id: crypto::endpoint_id_of(&package.device_public_key),
        device_public_key: package.device_public_key,
        document_hash: crypto::sha256(document),
    })
}

/// NDEF message announcing the reader as an mdoc reader over NFC.
pub fn reader_engagement() -> Result<Vec<u8>, ParseError> {
    ndef::pack(&[
        NdefRecord::new(ndef::TNF_WELL_KNOWN, b"Hr", b"", &HANDOVER_REQUEST),
        NdefRecord::new(ndef::TNF_EXTERNAL, b"iso.org:18013:nfc", b"nfc", &NFC_CARRIER),
        NdefRecord::new(
            ndef::TNF_EXTERNAL,
            b"iso.org:18013:readerengagement",
            b"mdocreader",
            &READER_ENGAGEMENT,
        ),
    ])
}

/// Salt of the ISO 18013 session: SHA-256 over the reader engagement and
/// the tagged document exactly as the endpoint sent it.
pub fn session_salt(engagement: &[u8], tagged_document: &[u8]) -> [u8; 32] {
    let mut material = Vec::with_capacity(engagement.len() + tagged_document.len());
    material.extend_from_slice(engagement);
    material.extend_from_slice(tagged_document);
    crypto::sha256(&material)
}

fn envelope_value(body: &[u8]) -> Result<Vec<u8>, AuthError> {
    let records = ber::unpack_array(body)?;
    ber::find_tag(TAG_ENVELOPE, &records)
        .map(|r| r.value.clone())
        .ok_or(AuthError::Protocol("attestation response without envelope"))
}

/// Run both attestation exchanges over the STANDARD secure context and
/// verify the result against the tap's Auth1 response.
pub(crate) fn run(
    data: &ReaderData,
    transcript: &Transcript,
    secure: &mut SecureContext,
    device: &DeviceResponse,
    link: &mut Link<'_>,
) -> Result<VerifiedAttestation, AuthError> {
    let mut secret = Zeroizing::new([0u8; 32]);
    rand::thread_rng().fill_bytes(secret.as_mut_slice());
    let engagement = reader_engagement()?;

    // Exchange 1: hand over the attestation secret, receive the document.
    let mut request = Vec::with_capacity(64 + engagement.len());
    simple::push(&mut request, 0x4D, &transcript.reader_identifier)?;
    simple::push(&mut request, 0xC0, secret.as_slice())?;
    simple::push(&mut request, 0x53, &engagement)?;
    let ciphertext = secure.encrypt_to_endpoint(&request)?;
    let body = link.exchange_ok("ATTEST-1", &CommandApdu::exchange(ciphertext))?;
    let plaintext = secure.decrypt_from_endpoint(&body)?;
    let tagged_document = envelope_value(&plaintext)?;
    let document = decode_tag24(&tagged_document)?;

    // Exchange 2: empty envelope under the ISO session, receive the package.
    let salt = session_salt(&engagement, &tagged_document);
    let mut iso = SecureContext::new(secret.as_slice(), &salt, 16)?;
    let envelope = simple::encode(0x53, &iso.encrypt_to_endpoint(&[])?)?;
    let body = link.exchange_ok("ATTEST-2", &CommandApdu::envelope(envelope))?;
    let package = iso.decrypt_from_endpoint(&envelope_value(&body)?)?;

    let verified = verify_attestation(&data.issuers, &document, &package)?;

    let device_info = transcript.device_shared_info()?;
    if verified.endpoint_id != device.device_identifier
        || !crypto::ecdsa_verify(&verified.device_public_key, &device_info, &device.signature)
    {
        return Err(AttestationError::DeviceBinding.into());
    }
    tracing::debug!(
        issuer = %crypto::hex(&verified.issuer_id),
        endpoint = %crypto::hex(&verified.endpoint_id),
        "Attestation verified"
    );
    Ok(verified)
}
