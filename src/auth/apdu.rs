use crate::tlv::ParseError;

pub const HOMEKEY_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x08, 0x58, 0x01, 0x01];

pub const SW_SUCCESS: u16 = 0x9000;

pub const INS_SELECT: u8 = 0xA4;
pub const INS_AUTH0: u8 = 0x80;
pub const INS_AUTH1: u8 = 0x81;
pub const INS_CONTROL_FLOW: u8 = 0x3C;
pub const INS_EXCHANGE: u8 = 0xC9;
pub const INS_ENVELOPE: u8 = 0xC3;

/// P1/P2 of the control flow command.
pub const CONTROL_SUCCESS: (u8, u8) = (0x01, 0x00);
pub const CONTROL_FAILURE: (u8, u8) = (0x00, 0x00);
pub const CONTROL_ATTESTATION_CLOSE: (u8, u8) = (0xA0, 0x00);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    pub le: Option<u8>,
}

impl CommandApdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn select(aid: &[u8]) -> Self {
        Self::new(0x00, INS_SELECT, 0x04, 0x00)
            .with_data(aid.to_vec())
            .with_le(0)
    }

    pub fn auth0(payload: Vec<u8>) -> Self {
        Self::new(0x80, INS_AUTH0, 0x01, 0x01).with_data(payload).with_le(0)
    }

    pub fn auth1(payload: Vec<u8>) -> Self {
        Self::new(0x80, INS_AUTH1, 0x00, 0x00).with_data(payload).with_le(0)
    }

    pub fn control_flow((p1, p2): (u8, u8)) -> Self {
        Self::new(0x80, INS_CONTROL_FLOW, p1, p2)
    }

    /// Secure-messaging exchange over the STANDARD session.
    pub fn exchange(payload: Vec<u8>) -> Self {
        Self::new(0x84, INS_EXCHANGE, 0x00, 0x00).with_data(payload).with_le(0)
    }

    pub fn envelope(payload: Vec<u8>) -> Self {
        Self::new(0x00, INS_ENVELOPE, 0x00, 0x00).with_data(payload).with_le(0)
    }

    /// Short-form encoding; data longer than 255 bytes is rejected.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len()).map_err(|_| ParseError::BadLength)?;
            out.push(lc);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(le);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw: u16,
}

impl ResponseApdu {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < 2 {
            return Err(ParseError::Truncated);
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            sw: u16::from_be_bytes([sw[0], sw[1]]),
        })
    }

    pub fn is_success(&self) -> bool {
        self.sw == SW_SUCCESS
    }
}
