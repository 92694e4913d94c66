//! Human and machine readable views of a module buffer.

use std::fmt::{self, Write as _};

use anyhow::Result;
use serde::Serialize;

use super::constant::Constant;
use super::header::Header;
use super::module::decode_module;
use super::validate::{SignedWrapper, decompress, verify_bytecode};

pub const DEFAULT_HEX_DUMP_BYTES: usize = 64;
const HEX_ROW: usize = 16;

/// Lowercase hex, a space after every byte, a newline after every 16 bytes
/// and after a final partial row. Only the first `max_bytes` bytes are shown.
pub fn hex_dump(data: &[u8], max_bytes: usize) -> String {
    let shown = &data[..data.len().min(max_bytes)];
    let mut out = String::with_capacity(shown.len() * 3 + shown.len() / HEX_ROW + 1);
    for (idx, byte) in shown.iter().enumerate() {
        let _ = write!(out, "{:02x} ", byte);
        if (idx + 1) % HEX_ROW == 0 {
            out.push('\n');
        }
    }
    if shown.len() % HEX_ROW != 0 {
        out.push('\n');
    }
    out
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => f.write_str("nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Number(n) => f.write_str(ryu::Buffer::new().format(*n)),
            Constant::String(bytes) => write!(f, "\"{}\"", bytes.escape_ascii()),
            Constant::Import(id) => write!(f, "import {id:#010x}"),
            Constant::Table(keys) => {
                f.write_str("{")?;
                for (idx, key) in keys.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "K{key}")?;
                }
                f.write_str("}")
            }
            Constant::Closure(proto) => write!(f, "closure P{proto}"),
        }
    }
}

/// Summary of a buffer: header fields, integrity verdict, and, when the
/// payload decodes, its shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BytecodeInfo {
    /// Length of the buffer as given, wrapper included.
    pub length: usize,
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<[u32; 4]>,
    pub version: u8,
    pub flags: u8,
    pub typesize: u8,
    pub numbersize: u8,
    pub size: u32,
    pub hash: u32,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    pub constants: Vec<String>,
    pub functions: usize,
    pub instructions: usize,
    pub max_stack_size: u32,
}

impl BytecodeInfo {
    /// Fails only when the buffer, after any signing wrapper is removed, is
    /// too short to hold a header.
    pub fn inspect(bytes: &[u8]) -> Result<BytecodeInfo> {
        let signature = SignedWrapper::parse(bytes).map(|w| w.signature);
        let module_bytes = decompress(bytes);
        let header = Header::read_from(module_bytes)?;

        let mut problem = verify_bytecode(module_bytes).err().map(|e| e.to_string());
        let mut info = BytecodeInfo {
            length: bytes.len(),
            signed: SignedWrapper::is_signed(bytes),
            signature,
            version: header.version,
            flags: header.flags,
            typesize: header.typesize,
            numbersize: header.numbersize,
            size: header.size,
            hash: header.hash,
            valid: problem.is_none(),
            problem: None,
            constants: Vec::new(),
            functions: 0,
            instructions: 0,
            max_stack_size: 0,
        };

        match decode_module(module_bytes) {
            Ok(module) => {
                info.constants = module.constants.iter().map(ToString::to_string).collect();
                info.functions = module.protos.len();
                info.instructions = module.protos.iter().map(|p| p.instructions.len()).sum();
                info.max_stack_size = module.entry().map_or(0, |p| p.max_stack_size);
            }
            Err(err) if problem.is_none() => problem = Some(format!("{err:#}")),
            Err(_) => {}
        }
        info.problem = problem;
        Ok(info)
    }
}

impl fmt::Display for BytecodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "length:      {} bytes{}", self.length, if self.signed { " (signed)" } else { "" })?;
        writeln!(
            f,
            "header:      version {}, flags {}, typesize {}, numbersize {}",
            self.version, self.flags, self.typesize, self.numbersize
        )?;
        writeln!(f, "payload:     {} bytes, hash {:#010x}", self.size, self.hash)?;
        match &self.problem {
            None => writeln!(f, "status:      valid")?,
            Some(problem) if self.valid => writeln!(f, "status:      valid, undecodable ({problem})")?,
            Some(problem) => writeln!(f, "status:      invalid ({problem})")?,
        }
        writeln!(
            f,
            "functions:   {} ({} instructions, maxstack {})",
            self.functions, self.instructions, self.max_stack_size
        )?;
        write!(f, "constants:   {}", self.constants.len())?;
        for (idx, constant) in self.constants.iter().enumerate() {
            write!(f, "\n  K{idx:<4}{constant}")?;
        }
        Ok(())
    }
}

/// Text report for `bytes`; never fails.
pub fn bytecode_info(bytes: &[u8]) -> String {
    match BytecodeInfo::inspect(bytes) {
        Ok(info) => info.to_string(),
        Err(err) => format!("invalid bytecode: {err}"),
    }
}

/// Listing of the constant pool and every instruction, with byte offsets into
/// each function's code.
pub fn disassemble(bytes: &[u8]) -> Result<String> {
    let module = decode_module(decompress(bytes))?;
    let header = module.header;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "; version {} flags {} typesize {} numbersize {} size {} hash {:#010x}",
        header.version, header.flags, header.typesize, header.numbersize, header.size, header.hash
    );
    let _ = writeln!(out, "constants ({})", module.constants.len());
    for (idx, constant) in module.constants.iter().enumerate() {
        let _ = writeln!(out, "  K{idx:<4}{:<8}{constant}", constant.kind_name());
    }
    for (idx, proto) in module.protos.iter().enumerate() {
        let _ = writeln!(
            out,
            "function {idx} (maxstack {}, params {}, upvalues {}{})",
            proto.max_stack_size,
            proto.num_params,
            proto.num_upvalues,
            if proto.is_vararg { ", vararg" } else { "" }
        );
        let mut offset = 0usize;
        for instr in &proto.instructions {
            let _ = writeln!(out, "  {offset:04}  {instr}");
            offset += instr.encoded_len();
        }
    }
    Ok(out)
}
