//! Unsigned LEB128 integers used for every count and size in a module payload.

use anyhow::{Result, bail};

/// Maximum encoded width of a `u32`.
pub const MAX_VARINT_LEN: usize = 5;

/// Append `value` as a little-endian base-128 sequence.
pub fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes `write_varint` emits for `value`.
pub fn varint_len(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a varint starting at `*cursor`, advancing the cursor past it.
pub fn read_varint(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = bytes.get(*cursor) else {
            bail!("unexpected end of input while reading varint");
        };
        *cursor += 1;
        let chunk = u32::from(byte & 0x7F);
        let shift = 7 * i as u32;
        if i == MAX_VARINT_LEN - 1 && chunk > 0x0F {
            bail!("varint does not fit in 32 bits");
        }
        value |= chunk << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    bail!("varint longer than {} bytes", MAX_VARINT_LEN)
}
