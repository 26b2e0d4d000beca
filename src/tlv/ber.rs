//! ISO 7816 BER-TLV: multi-byte tags, short/long definite and indefinite lengths.

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BerTlv {
    /// Raw tag bytes as they appear on the wire.
    pub tag: Vec<u8>,
    pub value: Vec<u8>,
}

impl BerTlv {
    pub fn new(tag: u32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag_bytes(tag),
            value: value.into(),
        }
    }

    /// Constructed record whose value is the packed `children`.
    pub fn constructed(tag: u32, children: &[BerTlv]) -> Self {
        let mut value = Vec::new();
        for child in children {
            child.pack_into(&mut value);
        }
        Self::new(tag, value)
    }

    pub fn tag_number(&self) -> u32 {
        self.tag.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }

    pub fn is_constructed(&self) -> bool {
        self.tag.first().is_some_and(|b| b & 0x20 != 0)
    }

    pub fn children(&self) -> Result<Vec<BerTlv>, ParseError> {
        unpack_array(&self.value)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tag.len() + 5 + self.value.len());
        self.pack_into(&mut out);
        out
    }

    fn pack_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag);
        let len = self.value.len();
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = (len as u32).to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            out.push(0x80 | (4 - skip) as u8);
            out.extend_from_slice(&bytes[skip..]);
        }
        out.extend_from_slice(&self.value);
    }
}

fn tag_bytes(tag: u32) -> Vec<u8> {
    let bytes = tag.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(3);
    bytes[skip..].to_vec()
}

fn read_tag(buf: &[u8]) -> Result<usize, ParseError> {
    let first = *buf.first().ok_or(ParseError::Truncated)?;
    if first & 0x1F != 0x1F {
        return Ok(1);
    }
    let mut pos = 1;
    loop {
        let b = *buf.get(pos).ok_or(ParseError::Truncated)?;
        pos += 1;
        if b & 0x80 == 0 {
            return Ok(pos);
        }
        if pos > 4 {
            return Err(ParseError::UnknownForm);
        }
    }
}

enum Length {
    Definite(usize),
    Indefinite,
}

fn read_length(buf: &[u8]) -> Result<(Length, usize), ParseError> {
    let first = *buf.first().ok_or(ParseError::Truncated)?;
    match first {
        0x00..=0x7F => Ok((Length::Definite(first as usize), 1)),
        0x80 => Ok((Length::Indefinite, 1)),
        0x81..=0x84 => {
            let n = (first & 0x7F) as usize;
            let bytes = buf.get(1..1 + n).ok_or(ParseError::Truncated)?;
            let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
            Ok((Length::Definite(len), 1 + n))
        }
        _ => Err(ParseError::UnknownForm),
    }
}

/// Parse one record from the front of `buf`. Returns the record and the
/// number of bytes consumed.
pub fn unpack(buf: &[u8]) -> Result<(BerTlv, usize), ParseError> {
    let tag_len = read_tag(buf)?;
    let (length, len_len) = read_length(&buf[tag_len..])?;
    let start = tag_len + len_len;
    match length {
        Length::Definite(len) => {
            let end = start.checked_add(len).ok_or(ParseError::BadLength)?;
            let value = buf.get(start..end).ok_or(ParseError::Truncated)?;
            Ok((
                BerTlv {
                    tag: buf[..tag_len].to_vec(),
                    value: value.to_vec(),
                },
                end,
            ))
        }
        Length::Indefinite => {
            // Content is a series of nested records closed by `00 00`.
            let mut pos = start;
            loop {
                let rest = &buf[pos..];
                if rest.len() < 2 {
                    return Err(ParseError::Truncated);
                }
                if rest[0] == 0x00 && rest[1] == 0x00 {
                    let value = buf[start..pos].to_vec();
                    return Ok((
                        BerTlv {
                            tag: buf[..tag_len].to_vec(),
                            value,
                        },
                        pos + 2,
                    ));
                }
                let (_, used) = unpack(rest)?;
                pos += used;
            }
        }
    }
}

/// Flat sequence of the top-level records in `buf`.
pub fn unpack_array(buf: &[u8]) -> Result<Vec<BerTlv>, ParseError> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (record, used) = unpack(&buf[pos..])?;
        records.push(record);
        pos += used;
    }
    Ok(records)
}

pub fn find_tag(tag: u32, records: &[BerTlv]) -> Option<&BerTlv> {
    records.iter().find(|r| r.tag_number() == tag)
}
