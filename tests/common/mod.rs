#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ciborium::value::Value;
use ed25519_dalek::Signer;

use homekey_reader::auth::attestation::attestation_digest;
use homekey_reader::auth::{NfcTransport, TransportError};
use homekey_reader::crypto::{self, KeyPair};
use homekey_reader::hap::types::{DeviceCredentialRequest, ReaderKeyRequest};
use homekey_reader::hap::{ControlPointRequest, ControlPointResponse, Opcode, Status};
use homekey_reader::secure::SecureContext;
use homekey_reader::store::{MemoryStorage, ReaderStore};
use homekey_reader::tlv::{BerTlv, ber, simple};

pub const SW_OK: [u8; 2] = [0x90, 0x00];
pub const SW_FILE_NOT_FOUND: [u8; 2] = [0x6A, 0x82];
pub const DOCUMENT: &[u8] = b"mdoc device-signed HomeKey document";

/// What the reader sent the phone, shared with the test.
#[derive(Debug, Default)]
pub struct Journal {
    pub instructions: Vec<u8>,
    pub controls: Vec<(u8, u8)>,
    pub polling_frames: Vec<Vec<u8>>,
    pub reader_signature_ok: Option<bool>,
    /// Persistent key the phone derived during Auth1.
    pub persistent_key: Option<[u8; 32]>,
}

pub type SharedJournal = Arc<Mutex<Journal>>;

#[derive(Default)]
struct Session {
    reader_eph_pub: Vec<u8>,
    reader_eph_x: [u8; 32],
    transaction_id: [u8; 16],
    reader_identifier: [u8; 16],
    endpoint_eph: Option<KeyPair>,
    secure: Option<SecureContext>,
    iso: Option<SecureContext>,
}

/// Scripted HomeKey endpoint answering the reader's APDUs.
pub struct Phone {
    pub long_term: KeyPair,
    /// Persistent key the phone uses for FAST; `None` sends a random cryptogram.
    pub persistent_key: Option<[u8; 32]>,
    pub reader_public_key: Vec<u8>,
    pub issuer: Option<ed25519_dalek::SigningKey>,
    pub is_homekey: bool,
    /// Lose the field once this many APDUs have been answered.
    pub field_lost_after: Option<usize>,
    /// Flip one byte of the Auth1 signature.
    pub tamper_device_signature: bool,
    pub journal: SharedJournal,
    session: Session,
}

impl Phone {
    pub fn new(reader_public_key: &[u8]) -> Self {
        Self {
            long_term: crypto::generate_ephemeral_keypair(),
            persistent_key: None,
            reader_public_key: reader_public_key.to_vec(),
            issuer: None,
            is_homekey: true,
            field_lost_after: None,
            tamper_device_signature: false,
            journal: SharedJournal::default(),
            session: Session::default(),
        }
    }

    pub fn with_issuer(mut self, issuer: ed25519_dalek::SigningKey) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn endpoint_id(&self) -> [u8; 6] {
        crypto::endpoint_id_of(&self.long_term.public)
    }

    fn reader_key_x(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.reader_public_key[1..33]);
        x
    }

    fn shared_info(&self, endpoint_eph_x: &[u8; 32], context: [u8; 4]) -> Vec<u8> {
        let s = &self.session;
        let mut out = Vec::new();
        for (tag, value) in [
            (0x4D, &s.reader_identifier[..]),
            (0x86, &endpoint_eph_x[..]),
            (0x87, &s.reader_eph_x[..]),
            (0x4C, &s.transaction_id[..]),
            (0x93, &context[..]),
        ] {
            out.push(tag);
            out.push(value.len() as u8);
            out.extend_from_slice(value);
        }
        out
    }

    fn fast_cryptogram(&self, endpoint_eph_x: &[u8; 32]) -> [u8; 16] {
        let Some(pk) = self.persistent_key else {
            return rand::random();
        };
        let s = &self.session;
        let mut info = b"VolatileFast".to_vec();
        info.extend_from_slice(&s.reader_identifier);
        info.extend_from_slice(&self.long_term.x());
        info.push(0x5E);
        info.extend_from_slice(&[0x5C, 0x04, 0x02, 0x00, 0x01, 0x00]);
        info.extend_from_slice(&[0x5C, 0x02, 0x02, 0x00]);
        info.extend_from_slice(&s.reader_eph_x);
        info.extend_from_slice(&s.transaction_id);
        info.extend_from_slice(&[0x01, 0x01]);
        info.extend_from_slice(endpoint_eph_x);
        let okm = crypto::hkdf_sha256(Some(&pk[..]), &self.reader_key_x(), &info, 58).unwrap();
        okm[..16].try_into().unwrap()
    }

    fn key_info(&self, endpoint_eph_x: &[u8; 32], context: &[u8]) -> Vec<u8> {
        let s = &self.session;
        let mut info = s.reader_eph_x.to_vec();
        info.extend_from_slice(endpoint_eph_x);
        info.extend_from_slice(&s.transaction_id);
        info.extend_from_slice(&[0x5E, 0x01, 0x01]);
        info.extend_from_slice(context);
        info.extend_from_slice(&[0x5C, 0x02, 0x02, 0x00, 0x5C, 0x04, 0x02, 0x00, 0x01, 0x00]);
        info
    }

    fn auth0(&mut self, data: &[u8]) -> Vec<u8> {
        for (tag, value) in simple::parse(data).unwrap() {
            match tag {
                0x87 => {
                    self.session.reader_eph_pub = value.to_vec();
                    self.session.reader_eph_x.copy_from_slice(&value[1..33]);
                }
                0x4C => self.session.transaction_id.copy_from_slice(value),
                0x4D => self.session.reader_identifier.copy_from_slice(value),
                _ => {}
            }
        }
        let eph = crypto::generate_ephemeral_keypair();
        let cryptogram = self.fast_cryptogram(&eph.x());
        let mut out = vec![0x86, 0x41];
        out.extend_from_slice(&eph.public);
        out.extend_from_slice(&[0x9D, 0x10]);
        out.extend_from_slice(&cryptogram);
        self.session.endpoint_eph = Some(eph);
        out.extend_from_slice(&SW_OK);
        out
    }

    fn auth1(&mut self, data: &[u8]) -> Vec<u8> {
        let eph = self.session.endpoint_eph.clone().unwrap();
        let eph_x = eph.x();

        let reader_sig = simple::find(data, 0x9E).unwrap().unwrap();
        let reader_info = self.shared_info(&eph_x, [0x41, 0x5D, 0x95, 0x69]);
        let ok = crypto::ecdsa_verify(&self.reader_public_key, &reader_info, reader_sig);
        self.journal.lock().unwrap().reader_signature_ok = Some(ok);

        let shared = crypto::ecdh_shared_secret(eph.private.as_slice(), &self.session.reader_eph_pub).unwrap();
        let derived = crypto::x963_kdf_sha256(shared.as_slice(), &self.session.transaction_id, 32).unwrap();
        let persistent = crypto::hkdf_sha256(None, &derived, &self.key_info(&eph_x, b"Persistent"), 32).unwrap();
        let volatile = crypto::hkdf_sha256(None, &derived, &self.key_info(&eph_x, b"Volatile"), 48).unwrap();
        self.journal.lock().unwrap().persistent_key = Some(persistent.as_slice().try_into().unwrap());

        let device_info = self.shared_info(&eph_x, [0x4E, 0x88, 0x7B, 0x4C]);
        let mut signature = crypto::ecdsa_sign_det(self.long_term.private.as_slice(), &device_info).unwrap();
        if self.tamper_device_signature {
            signature[10] ^= 0x01;
        }
        let mut plaintext = BerTlv::new(0x4E, self.endpoint_id().to_vec()).pack();
        plaintext.extend(BerTlv::new(0x9E, signature.to_vec()).pack());

        let mut secure = SecureContext::new(&volatile, &self.session.transaction_id, 16).unwrap();
        let mut out = secure.encrypt_to_reader(&plaintext).unwrap();
        self.session.secure = Some(secure);
        out.extend_from_slice(&SW_OK);
        out
    }

    fn attestation_exchange(&mut self, data: &[u8]) -> Vec<u8> {
        let secure = self.session.secure.as_mut().unwrap();
        let plaintext = secure.decrypt_from_reader(data).unwrap();
        let secret = simple::find(&plaintext, 0xC0).unwrap().unwrap().to_vec();
        let engagement = simple::find(&plaintext, 0x53).unwrap().unwrap().to_vec();

        let tagged = cbor(&Value::Tag(24, Box::new(Value::Bytes(DOCUMENT.to_vec()))));
        let mut material = engagement;
        material.extend_from_slice(&tagged);
        self.session.iso = Some(SecureContext::new(&secret, &crypto::sha256(&material), 16).unwrap());

        let secure = self.session.secure.as_mut().unwrap();
        let mut out = secure.encrypt_to_reader(&BerTlv::new(0x53, tagged).pack()).unwrap();
        out.extend_from_slice(&SW_OK);
        out
    }

    fn attestation_envelope(&mut self, data: &[u8]) -> Vec<u8> {
        let (record, _) = ber::unpack(data).unwrap();
        let iso = self.session.iso.as_mut().unwrap();
        assert!(iso.decrypt_from_reader(&record.value).unwrap().is_empty());

        let issuer = self.issuer.as_ref().unwrap();
        let issuer_id = crypto::issuer_id_of(issuer.verifying_key().as_bytes());
        let digest = attestation_digest(DOCUMENT, &self.long_term.public, &issuer_id).unwrap();
        let signature = issuer.sign(&digest).to_bytes();
        let engagement = cbor(&Value::Map(vec![(
            Value::Integer(1.into()),
            Value::Bytes(self.long_term.public.to_vec()),
        )]));
        let package = cbor(&Value::Map(vec![
            (Value::Text("deviceEngagement".into()), Value::Tag(24, Box::new(Value::Bytes(engagement)))),
            (Value::Text("issuerId".into()), Value::Bytes(issuer_id.to_vec())),
            (Value::Text("signature".into()), Value::Bytes(signature.to_vec())),
        ]));

        let iso = self.session.iso.as_mut().unwrap();
        let mut out = BerTlv::new(0x53, iso.encrypt_to_reader(&package).unwrap()).pack();
        out.extend_from_slice(&SW_OK);
        out
    }
}

fn cbor(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).unwrap();
    out
}

impl NfcTransport for Phone {
    fn transceive(&mut self, apdu: &[u8], _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let ins = apdu[1];
        let answered = {
            let mut journal = self.journal.lock().unwrap();
            journal.instructions.push(ins);
            journal.instructions.len()
        };
        if self.field_lost_after.is_some_and(|n| answered > n) {
            return Err(TransportError::FieldLost);
        }
        let data = if apdu.len() > 5 { &apdu[5..5 + apdu[4] as usize] } else { &[][..] };

        Ok(match ins {
            0xA4 if self.is_homekey => {
                self.session = Session::default();
                SW_OK.to_vec()
            }
            0xA4 => SW_FILE_NOT_FOUND.to_vec(),
            0x80 => self.auth0(data),
            0x81 => self.auth1(data),
            0x3C => {
                self.journal.lock().unwrap().controls.push((apdu[2], apdu[3]));
                SW_OK.to_vec()
            }
            0xC9 | 0xC3 if self.issuer.is_none() => vec![0x6D, 0x00],
            0xC9 => self.attestation_exchange(data),
            0xC3 => self.attestation_envelope(data),
            _ => vec![0x6D, 0x00],
        })
    }

    fn update_polling_frame(&mut self, frame: &[u8]) {
        self.journal.lock().unwrap().polling_frames.push(frame.to_vec());
    }
}

pub fn memory_store() -> (MemoryStorage, ReaderStore) {
    let storage = MemoryStorage::new();
    let store = ReaderStore::load(Box::new(storage.clone())).unwrap();
    (storage, store)
}

pub fn issuer_key(seed: u8) -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&[seed; 32])
}

pub fn control_point(store: &mut ReaderStore, request: ControlPointRequest) -> ControlPointResponse {
    let raw = homekey_reader::hap::handle_control_point(store, &request.encode());
    ControlPointResponse::parse(&raw).unwrap()
}

pub fn add_issuer(store: &mut ReaderStore, issuer: &ed25519_dalek::SigningKey) -> ControlPointResponse {
    control_point(
        store,
        ControlPointRequest {
            opcode: Opcode::AddDeviceCredential as u8,
            device_requests: vec![DeviceCredentialRequest {
                public_key: Some(issuer.verifying_key().as_bytes().to_vec()),
                ..Default::default()
            }],
            reader_request: None,
        },
    )
}

pub fn add_endpoint(
    store: &mut ReaderStore,
    issuer: &ed25519_dalek::SigningKey,
    endpoint_public_key: &[u8],
) -> ControlPointResponse {
    control_point(
        store,
        ControlPointRequest {
            opcode: Opcode::AddDeviceCredential as u8,
            device_requests: vec![DeviceCredentialRequest {
                key_type: Some(0x02),
                public_key: Some(endpoint_public_key.to_vec()),
                issuer_key_identifier: Some(crypto::issuer_id_of(issuer.verifying_key().as_bytes())),
                ..Default::default()
            }],
            reader_request: None,
        },
    )
}

pub fn set_reader_key(store: &mut ReaderStore, private_key: &[u8], unique_identifier: [u8; 8]) -> ControlPointResponse {
    control_point(
        store,
        ControlPointRequest {
            opcode: Opcode::SetReaderKey as u8,
            device_requests: Vec::new(),
            reader_request: Some(ReaderKeyRequest {
                key_type: Some(0x02),
                private_key: Some(private_key.to_vec()),
                unique_identifier: Some(unique_identifier),
                group_identifier: None,
            }),
        },
    )
}

pub fn assert_success(response: &ControlPointResponse) {
    assert_eq!(response.status, Status::Success, "{response:?}");
}
