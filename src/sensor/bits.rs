/// Packed bit-field access over sensor memory images

/// Read `bit_count` bits starting `bit_offset` bits after `byte_offset`.
///
/// Bits are numbered LSB-first within each byte and the field may span
/// byte boundaries; the first bit read becomes bit 0 of the result.
///
/// # Panics
/// The buffer must cover every addressed bit. Out-of-range access is a
/// programming error in the layout tables, not a runtime condition.
pub fn read_bits(buffer: &[u8], byte_offset: usize, bit_offset: usize, bit_count: usize) -> i32 {
    let mut res = 0i32;
    for i in 0..bit_count {
        let total = byte_offset * 8 + bit_offset + i;
        if (buffer[total / 8] >> (total % 8)) & 1 == 1 {
            res |= 1 << i;
        }
    }
    res
}

/// Inverse of [`read_bits`]: store the low `bit_count` bits of `value`.
///
/// # Panics
/// Same precondition as [`read_bits`].
pub fn write_bits(
    buffer: &mut [u8],
    byte_offset: usize,
    bit_offset: usize,
    bit_count: usize,
    value: i32,
) {
    for i in 0..bit_count {
        let total = byte_offset * 8 + bit_offset + i;
        let bit = total % 8;
        let bit_value = ((value >> i) & 1) as u8;
        buffer[total / 8] = (buffer[total / 8] & !(1 << bit)) | (bit_value << bit);
    }
}
