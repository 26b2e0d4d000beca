//! HAP TLV8: one-byte type and length, values over 255 bytes split into
//! consecutive fragments, list items separated by an empty `0xFF` record.

use super::ParseError;

pub const SEPARATOR: u8 = 0xFF;

#[derive(Debug, Default)]
pub struct Tlv8Encoder {
    buffer: Vec<u8>,
}

impl Tlv8Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add(mut self, tag: u8, value: &[u8]) -> Self {
        if value.is_empty() {
            self.buffer.extend_from_slice(&[tag, 0]);
            return self;
        }
        for chunk in value.chunks(255) {
            self.buffer.push(tag);
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }
        self
    }

    #[must_use]
    pub fn add_u8(self, tag: u8, value: u8) -> Self {
        self.add(tag, &[value])
    }

    #[must_use]
    pub fn separator(self) -> Self {
        self.add(SEPARATOR, &[])
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Decoded TLV8 items in wire order, fragments reassembled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut continues = false;
        let mut pos = 0;
        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(ParseError::Truncated);
            }
            let tag = data[pos];
            let len = data[pos + 1] as usize;
            let value = data.get(pos + 2..pos + 2 + len).ok_or(ParseError::Truncated)?;
            pos += 2 + len;

            match items.last_mut() {
                Some((last_tag, last_value)) if continues && *last_tag == tag => {
                    last_value.extend_from_slice(value);
                }
                _ => items.push((tag, value.to_vec())),
            }
            continues = len == 255;
        }
        Ok(Self { items })
    }

    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_u8(&self, tag: u8) -> Option<u8> {
        match self.get(tag) {
            Some([b]) => Some(*b),
            _ => None,
        }
    }

    /// Every value carried under `tag`, in order.
    pub fn get_all(&self, tag: u8) -> impl Iterator<Item = &[u8]> + '_ {
        self.items
            .iter()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, v)| v.as_slice())
    }

    pub fn items(&self) -> &[(u8, Vec<u8>)] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragmentation_roundtrip() {
        let big = vec![0x42u8; 600];
        let encoded = Tlv8Encoder::new().add(0x02, &big).add_u8(0x01, 7).build();
        // 255 + 255 + 90 byte fragments
        assert_eq!(encoded.len(), 3 * 2 + 600 + 3);
        let tlv = Tlv8::parse(&encoded).unwrap();
        assert_eq!(tlv.get(0x02).unwrap(), big.as_slice());
        assert_eq!(tlv.get_u8(0x01), Some(7));
    }

    #[test]
    fn test_separated_list_items_stay_distinct() {
        let encoded = Tlv8Encoder::new()
            .add(0x05, &[1, 2])
            .separator()
            .add(0x05, &[3, 4])
            .build();
        let tlv = Tlv8::parse(&encoded).unwrap();
        let values: Vec<&[u8]> = tlv.get_all(0x05).collect();
        assert_eq!(values, vec![&[1u8, 2][..], &[3u8, 4][..]]);
    }

    #[test]
    fn test_short_values_with_same_tag_do_not_merge() {
        let encoded = [0x05, 0x01, 0xAA, 0x05, 0x01, 0xBB];
        let tlv = Tlv8::parse(&encoded).unwrap();
        assert_eq!(tlv.get_all(0x05).count(), 2);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(Tlv8::parse(&[0x01]), Err(ParseError::Truncated));
        assert_eq!(Tlv8::parse(&[0x01, 0x03, 0x00]), Err(ParseError::Truncated));
        assert_eq!(Tlv8::parse(&[]).unwrap().items().len(), 0);
    }
}
