//! Simple-TLV as carried in HomeKey APDU bodies: one tag byte, a one-byte
//! length below 128 or `0x81 n` for 128..=255.

use super::ParseError;

/// Append one record to `out`.
pub fn push(out: &mut Vec<u8>, tag: u8, value: &[u8]) -> Result<(), ParseError> {
    out.push(tag);
    match value.len() {
        len @ 0..=0x7F => out.push(len as u8),
        len @ 0x80..=0xFF => {
            out.push(0x81);
            out.push(len as u8);
        }
        _ => return Err(ParseError::BadLength),
    }
    out.extend_from_slice(value);
    Ok(())
}

pub fn encode(tag: u8, value: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(value.len() + 3);
    push(&mut out, tag, value)?;
    Ok(out)
}

/// Split `buf` into `(tag, value)` records.
pub fn parse(buf: &[u8]) -> Result<Vec<(u8, &[u8])>, ParseError> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let tag = buf[pos];
        let first = *buf.get(pos + 1).ok_or(ParseError::Truncated)?;
        let (len, header) = match first {
            0x00..=0x7F => (first as usize, 2),
            0x81 => {
                let len = *buf.get(pos + 2).ok_or(ParseError::Truncated)? as usize;
                if len < 0x80 {
                    return Err(ParseError::BadLength);
                }
                (len, 3)
            }
            _ => return Err(ParseError::UnknownForm),
        };
        let start = pos + header;
        let end = start.checked_add(len).ok_or(ParseError::BadLength)?;
        if end > buf.len() {
            return Err(ParseError::Truncated);
        }
        records.push((tag, &buf[start..end]));
        pos = end;
    }
    Ok(records)
}

pub fn find(buf: &[u8], tag: u8) -> Result<Option<&[u8]>, ParseError> {
    Ok(parse(buf)?.into_iter().find(|(t, _)| *t == tag).map(|(_, v)| v))
}
