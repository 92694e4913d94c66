//! Integrity checks and removal of the optional signing wrapper.

use std::fmt;

use tracing::debug;

use super::header::{BYTECODE_VERSION, HEADER_SIZE, Header, checksum};

pub const SIGNATURE_MAGIC: [u8; 4] = *b"RBX2";
/// Magic plus four `u32` signature words.
pub const SIGNATURE_SIZE: usize = 20;
/// Buffers shorter than this are never treated as signed.
pub const SIGNATURE_MIN_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    TooShort { len: usize },
    Version { found: u8 },
    SizeMismatch { declared: u32, actual: usize },
    HashMismatch { declared: u32, computed: u32 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooShort { len } => {
                write!(f, "buffer of {len} bytes is shorter than the {HEADER_SIZE}-byte header")
            }
            ValidationError::Version { found } => {
                write!(f, "unsupported bytecode version {found} (expected {BYTECODE_VERSION})")
            }
            ValidationError::SizeMismatch { declared, actual } => {
                write!(f, "header declares {declared} payload bytes but {actual} follow")
            }
            ValidationError::HashMismatch { declared, computed } => {
                write!(f, "payload hash {computed:#010x} does not match header hash {declared:#010x}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check length, version, declared size and checksum, in that order.
pub fn verify_bytecode(bytes: &[u8]) -> Result<Header, ValidationError> {
    let header = Header::read_from(bytes).map_err(|_| ValidationError::TooShort { len: bytes.len() })?;
    if header.version != BYTECODE_VERSION {
        return Err(ValidationError::Version { found: header.version });
    }
    let payload = &bytes[HEADER_SIZE..];
    if header.size as usize != payload.len() {
        return Err(ValidationError::SizeMismatch {
            declared: header.size,
            actual: payload.len(),
        });
    }
    let computed = checksum(payload);
    if computed != header.hash {
        return Err(ValidationError::HashMismatch {
            declared: header.hash,
            computed,
        });
    }
    Ok(header)
}

/// `true` when `bytes` passes every check of [`verify_bytecode`].
pub fn validate_bytecode(bytes: &[u8]) -> bool {
    match verify_bytecode(bytes) {
        Ok(_) => true,
        Err(err) => {
            debug!(%err, len = bytes.len(), "bytecode rejected");
            false
        }
    }
}

/// Signing wrapper an external signer may prepend to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedWrapper {
    pub signature: [u32; 4],
}

impl SignedWrapper {
    pub fn is_signed(bytes: &[u8]) -> bool {
        bytes.len() >= SIGNATURE_MIN_LEN && bytes[..4] == SIGNATURE_MAGIC
    }

    /// Parse a complete 20-byte wrapper, if present.
    pub fn parse(bytes: &[u8]) -> Option<SignedWrapper> {
        if !Self::is_signed(bytes) || bytes.len() < SIGNATURE_SIZE {
            return None;
        }
        let mut signature = [0u32; 4];
        for (idx, word) in signature.iter_mut().enumerate() {
            let at = 4 + idx * 4;
            *word = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        }
        Some(SignedWrapper { signature })
    }
}

/// Drop the signing wrapper when present; otherwise return `bytes` unchanged.
///
/// A 16 to 19 byte buffer that starts with the magic has no room for a
/// module after the wrapper and yields an empty slice.
pub fn decompress(bytes: &[u8]) -> &[u8] {
    if SignedWrapper::is_signed(bytes) {
        &bytes[SIGNATURE_SIZE.min(bytes.len())..]
    } else {
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(payload: &[u8]) -> Vec<u8> {
        let mut bytes = Header::default().to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        Header::default().seal(&mut bytes);
        bytes
    }

    #[test]
    fn accepts_sealed_buffer() {
        let bytes = sealed(&[0, 1, 1, 0, 0, 0, 1, 227, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(verify_bytecode(&bytes).map(|h| h.size), Ok(15));
        assert!(validate_bytecode(&bytes));
    }

    #[test]
    fn rejects_short_buffer() {
        assert_eq!(verify_bytecode(b"random"), Err(ValidationError::TooShort { len: 6 }));
        assert!(!validate_bytecode(&[]));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = sealed(&[1, 2, 3]);
        bytes[0] = 3;
        assert_eq!(verify_bytecode(&bytes), Err(ValidationError::Version { found: 3 }));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut bytes = sealed(&[1, 2, 3]);
        bytes.push(4);
        assert_eq!(
            verify_bytecode(&bytes),
            Err(ValidationError::SizeMismatch { declared: 3, actual: 4 })
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let mut bytes = sealed(&[1, 2, 3]);
        bytes[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            verify_bytecode(&bytes),
            Err(ValidationError::HashMismatch { .. })
        ));
        assert!(!validate_bytecode(&bytes));
    }

    #[test]
    fn decompress_is_identity_without_magic() {
        let bytes = sealed(&[9, 9, 9, 9, 9, 9, 9, 9]);
        assert_eq!(decompress(&bytes), bytes.as_slice());
        let short = b"RBX2short";
        assert_eq!(decompress(short), short.as_slice());
    }

    #[test]
    fn decompress_strips_exactly_twenty_bytes() {
        let inner = sealed(&[7, 7, 7]);
        let mut signed = SIGNATURE_MAGIC.to_vec();
        for word in [1u32, 2, 3, 4] {
            signed.extend_from_slice(&word.to_le_bytes());
        }
        signed.extend_from_slice(&inner);

        assert_eq!(decompress(&signed), inner.as_slice());
        assert_eq!(
            SignedWrapper::parse(&signed),
            Some(SignedWrapper { signature: [1, 2, 3, 4] })
        );
        assert!(validate_bytecode(decompress(&signed)));
    }

    #[test]
    fn truncated_wrapper_yields_empty_slice() {
        let mut bytes = SIGNATURE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 13]);
        assert_eq!(bytes.len(), 17);
        assert!(decompress(&bytes).is_empty());
        assert_eq!(SignedWrapper::parse(&bytes), None);
    }
}
