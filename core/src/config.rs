//! Header options shared by every module a builder emits.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bytecode::{DEFAULT_NUMBER_SIZE, DEFAULT_TYPE_SIZE, Header};

/// Informational header fields. The format version is fixed and not
/// configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderOptions {
    pub flags: u8,
    pub typesize: u8,
    pub numbersize: u8,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            flags: 0,
            typesize: DEFAULT_TYPE_SIZE,
            numbersize: DEFAULT_NUMBER_SIZE,
        }
    }
}

impl EncoderOptions {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid encoder options")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read encoder options from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Placeholder header carrying these options; size and hash are patched
    /// once the payload is known.
    pub fn header(&self) -> Header {
        Header {
            flags: self.flags,
            typesize: self.typesize,
            numbersize: self.numbersize,
            ..Header::default()
        }
    }
}
