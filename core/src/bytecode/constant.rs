use anyhow::{Context, Result, bail, ensure};

use super::varint::{read_varint, write_varint};

pub const TAG_NIL: u8 = 0;
pub const TAG_BOOLEAN: u8 = 1;
pub const TAG_NUMBER: u8 = 2;
pub const TAG_STRING: u8 = 3;
pub const TAG_IMPORT: u8 = 4;
pub const TAG_TABLE: u8 = 5;
pub const TAG_CLOSURE: u8 = 6;

/// A single constant-pool entry.
///
/// `Import`, `Table` and `Closure` are never produced by the push builders but
/// are carried so foreign modules can be decoded and inspected.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    /// Raw bytes; no encoding is enforced.
    String(Vec<u8>),
    Import(u32),
    /// Constant indices of the template keys.
    Table(Vec<u32>),
    /// Index of the referenced prototype.
    Closure(u32),
}

impl Constant {
    pub fn string(value: impl Into<Vec<u8>>) -> Self {
        Constant::String(value.into())
    }

    pub const fn tag(&self) -> u8 {
        match self {
            Constant::Nil => TAG_NIL,
            Constant::Boolean(_) => TAG_BOOLEAN,
            Constant::Number(_) => TAG_NUMBER,
            Constant::String(_) => TAG_STRING,
            Constant::Import(_) => TAG_IMPORT,
            Constant::Table(_) => TAG_TABLE,
            Constant::Closure(_) => TAG_CLOSURE,
        }
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Constant::Nil => "nil",
            Constant::Boolean(_) => "boolean",
            Constant::Number(_) => "number",
            Constant::String(_) => "string",
            Constant::Import(_) => "import",
            Constant::Table(_) => "table",
            Constant::Closure(_) => "closure",
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            Constant::Nil => {}
            Constant::Boolean(b) => out.push(u8::from(*b)),
            Constant::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
            Constant::String(bytes) => {
                write_varint(out, bytes.len() as u32);
                out.extend_from_slice(bytes);
            }
            Constant::Import(id) => out.extend_from_slice(&id.to_le_bytes()),
            Constant::Table(keys) => {
                write_varint(out, keys.len() as u32);
                for key in keys {
                    write_varint(out, *key);
                }
            }
            Constant::Closure(proto) => write_varint(out, *proto),
        }
    }

    pub fn decode(bytes: &[u8], cursor: &mut usize) -> Result<Constant> {
        let tag = read_u8(bytes, cursor)?;
        Ok(match tag {
            TAG_NIL => Constant::Nil,
            TAG_BOOLEAN => Constant::Boolean(read_u8(bytes, cursor)? != 0),
            TAG_NUMBER => {
                let raw = read_array::<8>(bytes, cursor, "number constant")?;
                Constant::Number(f64::from_le_bytes(raw))
            }
            TAG_STRING => {
                let len = read_varint(bytes, cursor)? as usize;
                ensure!(
                    *cursor + len <= bytes.len(),
                    "string constant of {} bytes overruns payload",
                    len
                );
                let value = bytes[*cursor..*cursor + len].to_vec();
                *cursor += len;
                Constant::String(value)
            }
            TAG_IMPORT => Constant::Import(u32::from_le_bytes(read_array::<4>(bytes, cursor, "import constant")?)),
            TAG_TABLE => {
                let count = read_varint(bytes, cursor)? as usize;
                let mut keys = Vec::with_capacity(count.min(bytes.len()));
                for _ in 0..count {
                    keys.push(read_varint(bytes, cursor)?);
                }
                Constant::Table(keys)
            }
            TAG_CLOSURE => Constant::Closure(read_varint(bytes, cursor)?),
            other => bail!("unknown constant tag {}", other),
        })
    }
}

/// Ordered, append-only constant pool. Indices are stable once handed out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a constant and return its index. Duplicates are kept.
    pub fn push(&mut self, constant: Constant) -> u32 {
        self.entries.push(constant);
        (self.entries.len() - 1) as u32
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }

    /// Count followed by every entry.
    pub fn encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.entries.len() as u32);
        for constant in &self.entries {
            constant.encode(out);
        }
    }

    pub fn decode(bytes: &[u8], cursor: &mut usize) -> Result<ConstantPool> {
        let count = read_varint(bytes, cursor)? as usize;
        let mut entries = Vec::with_capacity(count.min(bytes.len()));
        for idx in 0..count {
            let constant = Constant::decode(bytes, cursor).with_context(|| format!("constant {idx}"))?;
            entries.push(constant);
        }
        Ok(ConstantPool { entries })
    }
}

impl From<Vec<Constant>> for ConstantPool {
    fn from(entries: Vec<Constant>) -> Self {
        ConstantPool { entries }
    }
}

pub(crate) fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor >= bytes.len() {
        bail!("unexpected end of input while reading u8");
    }
    let value = bytes[*cursor];
    *cursor += 1;
    Ok(value)
}

pub(crate) fn read_array<const N: usize>(bytes: &[u8], cursor: &mut usize, what: &str) -> Result<[u8; N]> {
    if *cursor + N > bytes.len() {
        bail!("unexpected end of input while reading {}", what);
    }
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[*cursor..*cursor + N]);
    *cursor += N;
    Ok(buf)
}
