//! Fixed 12-byte module header and the payload checksum.
//!
//! The header is read and written field by field; nothing here depends on the
//! in-memory layout of [`Header`].

use anyhow::{Result, ensure};

pub const BYTECODE_VERSION: u8 = 0x02;
pub const HEADER_SIZE: usize = 12;

pub const DEFAULT_TYPE_SIZE: u8 = 8;
pub const DEFAULT_NUMBER_SIZE: u8 = 8;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over `payload`.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, &byte| (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub typesize: u8,
    pub numbersize: u8,
    /// Payload length in bytes, header excluded.
    pub size: u32,
    /// [`checksum`] of the payload.
    pub hash: u32,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: BYTECODE_VERSION,
            flags: 0,
            typesize: DEFAULT_TYPE_SIZE,
            numbersize: DEFAULT_NUMBER_SIZE,
            size: 0,
            hash: 0,
        }
    }
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1] = self.flags;
        out[2] = self.typesize;
        out[3] = self.numbersize;
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.hash.to_le_bytes());
        out
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }

    /// Parse the first [`HEADER_SIZE`] bytes of `bytes`. No field is checked.
    pub fn read_from(bytes: &[u8]) -> Result<Header> {
        ensure!(
            bytes.len() >= HEADER_SIZE,
            "buffer of {} bytes is shorter than the {}-byte header",
            bytes.len(),
            HEADER_SIZE
        );
        Ok(Header {
            version: bytes[0],
            flags: bytes[1],
            typesize: bytes[2],
            numbersize: bytes[3],
            size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            hash: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }

    /// Overwrite the header at the start of `buffer` with `size`/`hash`
    /// computed from everything after it.
    pub fn seal(mut self, buffer: &mut [u8]) -> Header {
        debug_assert!(buffer.len() >= HEADER_SIZE);
        let payload = &buffer[HEADER_SIZE..];
        self.size = payload.len() as u32;
        self.hash = checksum(payload);
        buffer[..HEADER_SIZE].copy_from_slice(&self.to_bytes());
        self
    }
}
