//! Module assembly and structural decoding.
//!
//! Layout: a [`Header`] followed by the payload
//! `constantCount, constant[], functionCount, proto[]`, where each proto ends
//! with its debug stub. `size` and `hash` are patched into the header after the
//! payload is written.

use anyhow::{Context, Result, ensure};
use tracing::trace;

use crate::config::EncoderOptions;

use super::constant::ConstantPool;
use super::header::{HEADER_SIZE, Header};
use super::proto::FunctionProto;
use super::varint::{read_varint, write_varint};

/// A decoded module. Produced by [`decode_module`]; the builders go straight
/// to bytes through [`assemble_module`].
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub header: Header,
    pub constants: ConstantPool,
    pub protos: Vec<FunctionProto>,
}

impl Module {
    /// The prototype the loader runs first.
    pub fn entry(&self) -> Option<&FunctionProto> {
        self.protos.first()
    }

    pub fn encode(&self) -> Vec<u8> {
        write_module(self.header, &self.constants, &self.protos)
    }
}

/// Write a single-proto module with the header fields from `options`.
pub fn assemble_module(options: &EncoderOptions, constants: &ConstantPool, proto: &FunctionProto) -> Vec<u8> {
    write_module(options.header(), constants, std::slice::from_ref(proto))
}

fn write_module(header: Header, constants: &ConstantPool, protos: &[FunctionProto]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + 32);
    header.write_to(&mut out);
    constants.encode(&mut out);
    write_varint(&mut out, protos.len() as u32);
    for proto in protos {
        proto.encode(&mut out);
    }
    let sealed = header.seal(&mut out);
    trace!(
        size = sealed.size,
        hash = sealed.hash,
        constants = constants.len(),
        "assembled bytecode module"
    );
    out
}

/// Parse a module buffer. The header's `size` must match the payload length,
/// but the checksum is not enforced here; see `verify_bytecode` for that.
pub fn decode_module(bytes: &[u8]) -> Result<Module> {
    let header = Header::read_from(bytes)?;
    let payload = &bytes[HEADER_SIZE..];
    ensure!(
        header.size as usize == payload.len(),
        "header declares {} payload bytes but {} follow",
        header.size,
        payload.len()
    );

    let mut cursor = 0usize;
    let constants = ConstantPool::decode(payload, &mut cursor).context("constant pool")?;
    let count = read_varint(payload, &mut cursor).context("function count")? as usize;
    let mut protos = Vec::with_capacity(count.min(payload.len()));
    for idx in 0..count {
        protos.push(FunctionProto::decode(payload, &mut cursor).with_context(|| format!("function {idx}"))?);
    }
    ensure!(
        cursor == payload.len(),
        "{} trailing bytes after last function",
        payload.len() - cursor
    );

    Ok(Module {
        header,
        constants,
        protos,
    })
}
