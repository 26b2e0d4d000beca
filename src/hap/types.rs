//! TLV8 messages of the HomeKey control-point characteristic.

use crate::tlv::{ParseError, Tlv8, Tlv8Encoder};

/// Top-level control-point tags.
pub mod tag {
    pub const OPERATION: u8 = 0x01;
    pub const STATUS: u8 = 0x02;
    pub const DEVICE_CREDENTIAL_REQUEST: u8 = 0x04;
    pub const DEVICE_CREDENTIAL_RESPONSE: u8 = 0x05;
    pub const READER_KEY_REQUEST: u8 = 0x06;
    pub const READER_KEY_RESPONSE: u8 = 0x07;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    GetReaderKey = 0x01,
    SetReaderKey = 0x02,
    RemoveReaderKey = 0x03,
    AddDeviceCredential = 0x04,
    DeviceCredentialResponse = 0x05,
    ListDevices = 0x06,
    RemoveDevice = 0x07,
}

impl Opcode {
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::GetReaderKey),
            0x02 => Some(Self::SetReaderKey),
            0x03 => Some(Self::RemoveReaderKey),
            0x04 => Some(Self::AddDeviceCredential),
            0x05 => Some(Self::DeviceCredentialResponse),
            0x06 => Some(Self::ListDevices),
            0x07 => Some(Self::RemoveDevice),
            _ => None,
        }
    }
}

/// Single-byte status reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    OutOfResources = 0x01,
    Duplicate = 0x02,
    DoesNotExist = 0x03,
    NotSupported = 0x04,
}

impl Status {
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::OutOfResources),
            0x02 => Some(Self::Duplicate),
            0x03 => Some(Self::DoesNotExist),
            0x04 => Some(Self::NotSupported),
            _ => None,
        }
    }
}

fn fixed<const N: usize>(value: Option<&[u8]>) -> Result<Option<[u8; N]>, ParseError> {
    value
        .map(|v| v.try_into().map_err(|_| ParseError::BadLength))
        .transpose()
}

/// Sub-TLV of [`tag::READER_KEY_REQUEST`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderKeyRequest {
    pub key_type: Option<u8>,
    pub private_key: Option<Vec<u8>>,
    pub unique_identifier: Option<[u8; 8]>,
    pub group_identifier: Option<[u8; 8]>,
}

impl ReaderKeyRequest {
    const KEY_TYPE: u8 = 0x01;
    const PRIVATE_KEY: u8 = 0x02;
    const UNIQUE_IDENTIFIER: u8 = 0x03;
    const GROUP_IDENTIFIER: u8 = 0x04;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_type: tlv.get_u8(Self::KEY_TYPE),
            private_key: tlv.get(Self::PRIVATE_KEY).map(<[u8]>::to_vec),
            unique_identifier: fixed(tlv.get(Self::UNIQUE_IDENTIFIER))?,
            group_identifier: fixed(tlv.get(Self::GROUP_IDENTIFIER))?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Tlv8Encoder::new();
        if let Some(t) = self.key_type {
            enc = enc.add_u8(Self::KEY_TYPE, t);
        }
        if let Some(k) = &self.private_key {
            enc = enc.add(Self::PRIVATE_KEY, k);
        }
        if let Some(id) = &self.unique_identifier {
            enc = enc.add(Self::UNIQUE_IDENTIFIER, id);
        }
        if let Some(id) = &self.group_identifier {
            enc = enc.add(Self::GROUP_IDENTIFIER, id);
        }
        enc.build()
    }
}

/// Sub-TLV of [`tag::READER_KEY_RESPONSE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderKeyResponse {
    pub key_identifier: Option<[u8; 8]>,
    pub status: Option<Status>,
    pub public_key: Option<Vec<u8>>,
}

impl ReaderKeyResponse {
    const KEY_IDENTIFIER: u8 = 0x01;
    const STATUS: u8 = 0x02;
    const PUBLIC_KEY: u8 = 0x03;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_identifier: fixed(tlv.get(Self::KEY_IDENTIFIER))?,
            status: tlv.get_u8(Self::STATUS).and_then(Status::from_byte),
            public_key: tlv.get(Self::PUBLIC_KEY).map(<[u8]>::to_vec),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Tlv8Encoder::new();
        if let Some(id) = &self.key_identifier {
            enc = enc.add(Self::KEY_IDENTIFIER, id);
        }
        if let Some(s) = self.status {
            enc = enc.add_u8(Self::STATUS, s as u8);
        }
        if let Some(k) = &self.public_key {
            enc = enc.add(Self::PUBLIC_KEY, k);
        }
        enc.build()
    }
}

/// Sub-TLV of [`tag::DEVICE_CREDENTIAL_REQUEST`]. Without an issuer key
/// identifier the public key is an issuer key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCredentialRequest {
    pub key_type: Option<u8>,
    pub public_key: Option<Vec<u8>>,
    pub issuer_key_identifier: Option<[u8; 8]>,
    pub key_state: Option<u8>,
    pub key_identifier: Option<Vec<u8>>,
}

impl DeviceCredentialRequest {
    const KEY_TYPE: u8 = 0x01;
    const PUBLIC_KEY: u8 = 0x02;
    const ISSUER_KEY_IDENTIFIER: u8 = 0x03;
    const KEY_STATE: u8 = 0x04;
    const KEY_IDENTIFIER: u8 = 0x05;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_type: tlv.get_u8(Self::KEY_TYPE),
            public_key: tlv.get(Self::PUBLIC_KEY).map(<[u8]>::to_vec),
            issuer_key_identifier: fixed(tlv.get(Self::ISSUER_KEY_IDENTIFIER))?,
            key_state: tlv.get_u8(Self::KEY_STATE),
            key_identifier: tlv.get(Self::KEY_IDENTIFIER).map(<[u8]>::to_vec),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Tlv8Encoder::new();
        if let Some(t) = self.key_type {
            enc = enc.add_u8(Self::KEY_TYPE, t);
        }
        if let Some(k) = &self.public_key {
            enc = enc.add(Self::PUBLIC_KEY, k);
        }
        if let Some(id) = &self.issuer_key_identifier {
            enc = enc.add(Self::ISSUER_KEY_IDENTIFIER, id);
        }
        if let Some(s) = self.key_state {
            enc = enc.add_u8(Self::KEY_STATE, s);
        }
        if let Some(id) = &self.key_identifier {
            enc = enc.add(Self::KEY_IDENTIFIER, id);
        }
        enc.build()
    }
}

/// Sub-TLV of [`tag::DEVICE_CREDENTIAL_RESPONSE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentialResponse {
    pub key_identifier: Option<Vec<u8>>,
    pub issuer_key_identifier: Option<[u8; 8]>,
    pub status: Status,
}

impl DeviceCredentialResponse {
    const KEY_IDENTIFIER: u8 = 0x01;
    const ISSUER_KEY_IDENTIFIER: u8 = 0x02;
    const STATUS: u8 = 0x03;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_identifier: tlv.get(Self::KEY_IDENTIFIER).map(<[u8]>::to_vec),
            issuer_key_identifier: fixed(tlv.get(Self::ISSUER_KEY_IDENTIFIER))?,
            status: tlv
                .get_u8(Self::STATUS)
                .and_then(Status::from_byte)
                .ok_or(ParseError::UnknownForm)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Tlv8Encoder::new();
        if let Some(id) = &self.key_identifier {
            enc = enc.add(Self::KEY_IDENTIFIER, id);
        }
        if let Some(id) = &self.issuer_key_identifier {
            enc = enc.add(Self::ISSUER_KEY_IDENTIFIER, id);
        }
        enc.add_u8(Self::STATUS, self.status as u8).build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPointRequest {
    pub opcode: u8,
    pub device_requests: Vec<DeviceCredentialRequest>,
    pub reader_request: Option<ReaderKeyRequest>,
}

impl ControlPointRequest {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tlv = Tlv8::parse(data)?;
        let opcode = tlv.get_u8(tag::OPERATION).ok_or(ParseError::Truncated)?;
        let device_requests = tlv
            .get_all(tag::DEVICE_CREDENTIAL_REQUEST)
            .map(DeviceCredentialRequest::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let reader_request = tlv
            .get(tag::READER_KEY_REQUEST)
            .map(ReaderKeyRequest::parse)
            .transpose()?;
        Ok(Self {
            opcode,
            device_requests,
            reader_request,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Tlv8Encoder::new().add_u8(tag::OPERATION, self.opcode);
        for (i, req) in self.device_requests.iter().enumerate() {
            if i > 0 {
                enc = enc.separator();
            }
            enc = enc.add(tag::DEVICE_CREDENTIAL_REQUEST, &req.encode());
        }
        if let Some(req) = &self.reader_request {
            enc = enc.add(tag::READER_KEY_REQUEST, &req.encode());
        }
        enc.build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPointResponse {
    pub opcode: u8,
    pub status: Status,
    pub device_responses: Vec<DeviceCredentialResponse>,
    pub reader_response: Option<ReaderKeyResponse>,
}

impl ControlPointResponse {
    pub fn status_only(opcode: u8, status: Status) -> Self {
        Self {
            opcode,
            status,
            device_responses: Vec::new(),
            reader_response: None,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            opcode: tlv.get_u8(tag::OPERATION).ok_or(ParseError::Truncated)?,
            status: tlv
                .get_u8(tag::STATUS)
                .and_then(Status::from_byte)
                .ok_or(ParseError::UnknownForm)?,
            device_responses: tlv
                .get_all(tag::DEVICE_CREDENTIAL_RESPONSE)
                .map(DeviceCredentialResponse::parse)
                .collect::<Result<Vec<_>, _>>()?,
            reader_response: tlv
                .get(tag::READER_KEY_RESPONSE)
                .map(ReaderKeyResponse::parse)
                .transpose()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Tlv8Encoder::new()
            .add_u8(tag::OPERATION, self.opcode)
            .add_u8(tag::STATUS, self.status as u8);
        for (i, resp) in self.device_responses.iter().enumerate() {
            if i > 0 {
                enc = enc.separator();
            }
            enc = enc.add(tag::DEVICE_CREDENTIAL_RESPONSE, &resp.encode());
        }
        if let Some(resp) = &self.reader_response {
            enc = enc.add(tag::READER_KEY_RESPONSE, &resp.encode());
        }
        enc.build()
    }
}
