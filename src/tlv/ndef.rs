//! NFC Forum NDEF 1.0 record packing. Chunked records are not supported.

use super::ParseError;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

pub const TNF_EMPTY: u8 = 0x00;
pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const TNF_MEDIA: u8 = 0x02;
pub const TNF_EXTERNAL: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn new(tnf: u8, record_type: &[u8], id: &[u8], payload: &[u8]) -> Self {
        Self {
            tnf: tnf & TNF_MASK,
            record_type: record_type.to_vec(),
            id: id.to_vec(),
            payload: payload.to_vec(),
        }
    }
}

/// Pack a message. Short-record form is used whenever the payload fits in
/// one length byte.
pub fn pack(records: &[NdefRecord]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    let last = records.len().saturating_sub(1);
    for (i, record) in records.iter().enumerate() {
        let type_len = u8::try_from(record.record_type.len()).map_err(|_| ParseError::BadLength)?;
        let id_len = u8::try_from(record.id.len()).map_err(|_| ParseError::BadLength)?;
        let short = record.payload.len() <= 0xFF;

        let mut header = record.tnf & TNF_MASK;
        if i == 0 {
            header |= FLAG_MB;
        }
        if i == last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if id_len > 0 {
            header |= FLAG_IL;
        }

        out.push(header);
        out.push(type_len);
        if short {
            out.push(record.payload.len() as u8);
        } else {
            let len = u32::try_from(record.payload.len()).map_err(|_| ParseError::BadLength)?;
            out.extend_from_slice(&len.to_be_bytes());
        }
        if id_len > 0 {
            out.push(id_len);
        }
        out.extend_from_slice(&record.record_type);
        out.extend_from_slice(&record.id);
        out.extend_from_slice(&record.payload);
    }
    Ok(out)
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], ParseError> {
    let end = pos.checked_add(n).ok_or(ParseError::BadLength)?;
    let slice = buf.get(*pos..end).ok_or(ParseError::Truncated)?;
    *pos = end;
    Ok(slice)
}

pub fn unpack(buf: &[u8]) -> Result<Vec<NdefRecord>, ParseError> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let header = take(buf, &mut pos, 1)?[0];
        if header & FLAG_CF != 0 {
            return Err(ParseError::UnknownForm);
        }
        if records.is_empty() != (header & FLAG_MB != 0) {
            return Err(ParseError::UnknownForm);
        }
        let type_len = take(buf, &mut pos, 1)?[0] as usize;
        let payload_len = if header & FLAG_SR != 0 {
            take(buf, &mut pos, 1)?[0] as usize
        } else {
            let b = take(buf, &mut pos, 4)?;
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            take(buf, &mut pos, 1)?[0] as usize
        } else {
            0
        };
        let record_type = take(buf, &mut pos, type_len)?.to_vec();
        let id = take(buf, &mut pos, id_len)?.to_vec();
        let payload = take(buf, &mut pos, payload_len)?.to_vec();
        records.push(NdefRecord {
            tnf: header & TNF_MASK,
            record_type,
            id,
            payload,
        });

        if header & FLAG_ME != 0 {
            if pos != buf.len() {
                return Err(ParseError::BadLength);
            }
            return Ok(records);
        }
    }
    if records.is_empty() {
        Ok(records)
    } else {
        Err(ParseError::Truncated)
    }
}

pub fn find_type<'a>(records: &'a [NdefRecord], record_type: &[u8]) -> Option<&'a NdefRecord> {
    records.iter().find(|r| r.record_type == record_type)
}
