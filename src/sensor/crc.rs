/// CRC16 used by every memory section check and by the streaming unlock payload
use crc::{Algorithm, Crc};
use std::ops::Range;

/// Reflected-input CRC16 with an unreflected register read-out.
/// Polynomial: 0x1021 (0x8408 reflected)
/// Initial Value: 0xFFFF
/// Input Reflected: true
/// Output Reflected: false
/// Final XOR: 0x0000
/// Check Value: 0x89F6 (for "123456789"), the bit reversal of CRC-16/MCRF4XX
pub const LIBRE_CRC: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: true,
    refout: false,
    xorout: 0x0000,
    check: 0x89F6,
    residue: 0x0000,
};

const CRC_COMPUTER: Crc<u16> = Crc::<u16>::new(&LIBRE_CRC);

/// Compute the sensor CRC16 over `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_COMPUTER.checksum(data)
}

/// Little-endian CRC stored at `offset`
pub fn stored_crc(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Stored and computed CRC for a section whose checksum sits at `crc_offset`
/// and covers `range`.
pub fn section_crc(data: &[u8], crc_offset: usize, range: Range<usize>) -> (u16, u16) {
    (stored_crc(data, crc_offset), crc16(&data[range]))
}

/// Recompute the CRC of `range` and store it little-endian at `crc_offset`
pub fn write_crc(data: &mut [u8], crc_offset: usize, range: Range<usize>) {
    let crc = crc16(&data[range]);
    data[crc_offset..crc_offset + 2].copy_from_slice(&crc.to_le_bytes());
}
