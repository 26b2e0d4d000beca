//! Enhanced Contactless Polling frame announcing the reader group, so
//! phones present the matching HomeKey without user interaction.

const ECP_HEADER: [u8; 8] = [0x6A, 0x02, 0xCB, 0x02, 0x06, 0x02, 0x11, 0x00];

/// ISO 14443-3 Type A CRC (initial value 0x6363, reflected).
pub fn crc16_a(data: &[u8]) -> u16 {
    data.iter().fold(0x6363u16, |crc, &b| {
        let mut x = b ^ (crc & 0x00FF) as u8;
        x ^= x << 4;
        let x = u16::from(x);
        (crc >> 8) ^ (x << 8) ^ (x << 3) ^ (x >> 4)
    })
}

pub fn ecp_frame(group_identifier: &[u8; 8]) -> [u8; 18] {
    let mut frame = [0u8; 18];
    frame[..8].copy_from_slice(&ECP_HEADER);
    frame[8..16].copy_from_slice(group_identifier);
    let crc = crc16_a(&frame[..16]);
    frame[16..].copy_from_slice(&crc.to_le_bytes());
    frame
}
