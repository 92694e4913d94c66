//! Builders for single-value modules. Every module produced here runs one
//! prototype that leaves the requested value in register 0.

use anyhow::{Result, ensure};
use tracing::trace;

use crate::config::EncoderOptions;

use super::compile::parse_number_literal;
use super::constant::Constant;
use super::module::assemble_module;
use super::proto::{MAX_WIDE_CONSTANT, ProtoBuilder};

/// Registers an array batch may occupy; register 0 holds the table.
pub const ARRAY_BATCH: usize = u8::MAX as usize;
/// Largest register file a prototype can address.
pub const MAX_REGISTERS: usize = u8::MAX as usize + 1;

/// Module builder carrying the header options every buffer is stamped with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BytecodeBuilder {
    options: EncoderOptions,
}

impl BytecodeBuilder {
    pub fn new(options: EncoderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    fn finish(&self, proto: ProtoBuilder) -> Vec<u8> {
        let (pool, proto) = proto.finish();
        assemble_module(&self.options, &pool, &proto)
    }

    pub fn push_nil(&self) -> Vec<u8> {
        let mut proto = ProtoBuilder::new();
        proto.load_nil(0);
        self.finish(proto)
    }

    pub fn push_boolean(&self, value: bool) -> Vec<u8> {
        let mut proto = ProtoBuilder::new();
        proto.load_bool(0, value, 0);
        self.finish(proto)
    }

    pub fn push_number(&self, value: f64) -> Vec<u8> {
        let mut proto = ProtoBuilder::new();
        proto.add_constant(Constant::Number(value));
        proto.loadn(0, 0);
        self.finish(proto)
    }

    pub fn push_string(&self, value: impl Into<Vec<u8>>) -> Vec<u8> {
        let mut proto = ProtoBuilder::new();
        proto.add_constant(Constant::string(value));
        proto.loadk(0, 0);
        self.finish(proto)
    }

    /// Integers travel as numbers; magnitudes above 2^53 lose precision.
    pub fn push_integer(&self, value: i64) -> Vec<u8> {
        self.push_number(value as f64)
    }

    /// Empty table pre-sized with the given array and hash hints.
    pub fn push_table(&self, array_size: u16, hash_size: u8) -> Vec<u8> {
        let mut proto = ProtoBuilder::new();
        proto.new_table(0, array_size, hash_size);
        self.finish(proto)
    }

    /// Sequence of strings at indices `1..=len`.
    ///
    /// Elements are staged through registers `1..=255` and flushed with one
    /// `SETLIST` per batch.
    pub fn push_array<S: AsRef<[u8]>>(&self, values: &[S]) -> Result<Vec<u8>> {
        if values.is_empty() {
            return Ok(self.push_table(0, 0));
        }
        ensure!(
            values.len() <= MAX_WIDE_CONSTANT as usize,
            "array of {} elements exceeds the {} element limit",
            values.len(),
            MAX_WIDE_CONSTANT
        );

        let mut proto = ProtoBuilder::new();
        proto.new_table(0, values.len() as u16, 0);
        for (batch_idx, batch) in values.chunks(ARRAY_BATCH).enumerate() {
            let first = batch_idx * ARRAY_BATCH;
            for (offset, value) in batch.iter().enumerate() {
                let kidx = proto.add_constant(Constant::string(value.as_ref()));
                proto.load_constant(offset as u8 + 1, kidx)?;
            }
            proto.set_list(0, 1, batch.len() as u8, (first + 1) as u16);
        }
        Ok(self.finish(proto))
    }

    /// String-keyed table built with one `SETTABLE` per pair.
    pub fn push_dictionary<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, pairs: &[(K, V)]) -> Result<Vec<u8>> {
        if pairs.is_empty() {
            return Ok(self.push_table(0, 0));
        }
        let mut proto = ProtoBuilder::new();
        proto.new_table(0, 0, saturate_hint(pairs.len()));
        for (key, value) in pairs {
            let kidx = proto.add_constant(Constant::string(key.as_ref()));
            let vidx = proto.add_constant(Constant::string(value.as_ref()));
            proto.load_constant(1, kidx)?;
            proto.load_constant(2, vidx)?;
            proto.set_table(0, 1, 2);
        }
        Ok(self.finish(proto))
    }

    /// One value per register, each typed from its text: `"true"`/`"false"`
    /// become booleans, numeric literals numbers, anything else a string.
    pub fn push_multiple<S: AsRef<str>>(&self, values: &[S]) -> Result<Vec<u8>> {
        if values.is_empty() {
            return Ok(self.push_nil());
        }
        let mut proto = ProtoBuilder::new();
        load_literals(&mut proto, values, 0)?;
        Ok(self.finish(proto))
    }

    /// Look up the global `name` and call it with `args`, each typed as in
    /// [`push_multiple`](Self::push_multiple).
    pub fn function_call<S: AsRef<str>>(&self, name: &str, args: &[S], returns: u8) -> Result<Vec<u8>> {
        ensure!(
            args.len() < MAX_REGISTERS - 1,
            "call to {} passes {} arguments, at most {} fit",
            name,
            args.len(),
            MAX_REGISTERS - 2
        );
        ensure!(returns < u8::MAX, "call to {} expects too many results ({})", name, returns);

        let mut proto = ProtoBuilder::new();
        proto.get_global(0, name)?;
        load_literals(&mut proto, args, 1)?;
        proto.call(0, args.len() as u8, returns);
        Ok(self.finish(proto))
    }

    // Engine value types have no constructor path yet; each degrades to an
    // empty table pre-sized like the value it stands for.

    pub fn push_vector2(&self, x: f32, y: f32) -> Vec<u8> {
        trace!(x, y, "Vector2 pushed as empty table");
        self.push_table(2, 0)
    }

    pub fn push_vector3(&self, x: f32, y: f32, z: f32) -> Vec<u8> {
        trace!(x, y, z, "Vector3 pushed as empty table");
        self.push_table(3, 0)
    }

    pub fn push_color3(&self, r: f32, g: f32, b: f32) -> Vec<u8> {
        trace!(r, g, b, "Color3 pushed as empty table");
        self.push_table(3, 0)
    }

    pub fn push_udim(&self, scale: f32, offset: i32) -> Vec<u8> {
        trace!(scale, offset, "UDim pushed as empty table");
        self.push_table(2, 0)
    }

    pub fn push_udim2(&self, x: (f32, i32), y: (f32, i32)) -> Vec<u8> {
        trace!(x_scale = x.0, x_offset = x.1, y_scale = y.0, y_offset = y.1, "UDim2 pushed as empty table");
        self.push_table(4, 0)
    }

    /// `rotation` is a quaternion `[x, y, z, w]`.
    pub fn push_cframe(&self, position: [f32; 3], rotation: [f32; 4]) -> Vec<u8> {
        trace!(?position, ?rotation, "CFrame pushed as empty table");
        self.push_table(7, 0)
    }

    pub fn push_brick_color(&self, id: i32) -> Vec<u8> {
        trace!(id, "BrickColor pushed as empty table");
        self.push_table(1, 0)
    }

    /// The hash hint is the property count; properties are not assigned.
    pub fn push_instance<K: AsRef<str>, V: AsRef<str>>(&self, class_name: &str, properties: &[(K, V)]) -> Vec<u8> {
        trace!(class_name, properties = properties.len(), "Instance pushed as empty table");
        self.push_table(0, saturate_hint(properties.len()))
    }
}

/// Hash hints are a single byte; larger counts clamp.
fn saturate_hint(len: usize) -> u8 {
    u8::try_from(len).unwrap_or(u8::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Literal<'a> {
    Boolean(bool),
    Number(f64),
    Text(&'a str),
}

impl<'a> Literal<'a> {
    fn classify(text: &'a str) -> Self {
        match text {
            "true" => Literal::Boolean(true),
            "false" => Literal::Boolean(false),
            _ => parse_number_literal(text).map_or(Literal::Text(text), Literal::Number),
        }
    }
}

/// Load `values` into consecutive registers from `first_reg`. Constants are
/// pooled numbers first, then booleans, then strings; booleans are still
/// loaded inline with `LOADB`.
fn load_literals<S: AsRef<str>>(proto: &mut ProtoBuilder, values: &[S], first_reg: u8) -> Result<()> {
    ensure!(
        usize::from(first_reg) + values.len() <= MAX_REGISTERS,
        "{} values do not fit in registers {}..{}",
        values.len(),
        first_reg,
        MAX_REGISTERS
    );
    let literals: Vec<Literal<'_>> = values.iter().map(|v| Literal::classify(v.as_ref())).collect();

    let mut slots = vec![0u32; literals.len()];
    for (slot, literal) in slots.iter_mut().zip(&literals) {
        if let Literal::Number(n) = literal {
            *slot = proto.add_constant(Constant::Number(*n));
        }
    }
    for (slot, literal) in slots.iter_mut().zip(&literals) {
        if let Literal::Boolean(b) = literal {
            *slot = proto.add_constant(Constant::Boolean(*b));
        }
    }
    for (slot, literal) in slots.iter_mut().zip(&literals) {
        if let Literal::Text(s) = literal {
            *slot = proto.add_constant(Constant::string(*s));
        }
    }

    for (offset, (literal, kidx)) in literals.iter().zip(&slots).enumerate() {
        let reg = first_reg + offset as u8;
        match literal {
            Literal::Boolean(b) => proto.load_bool(reg, *b, 0),
            Literal::Number(_) => proto.load_number_constant(reg, *kidx)?,
            Literal::Text(_) => proto.load_constant(reg, *kidx)?,
        }
    }
    Ok(())
}

pub fn create_push_nil() -> Vec<u8> {
    BytecodeBuilder::default().push_nil()
}

pub fn create_push_boolean(value: bool) -> Vec<u8> {
    BytecodeBuilder::default().push_boolean(value)
}

pub fn create_push_number(value: f64) -> Vec<u8> {
    BytecodeBuilder::default().push_number(value)
}

pub fn create_push_string(value: impl Into<Vec<u8>>) -> Vec<u8> {
    BytecodeBuilder::default().push_string(value)
}

pub fn create_push_integer(value: i64) -> Vec<u8> {
    BytecodeBuilder::default().push_integer(value)
}

pub fn create_push_table(array_size: u16, hash_size: u8) -> Vec<u8> {
    BytecodeBuilder::default().push_table(array_size, hash_size)
}

pub fn create_push_array<S: AsRef<[u8]>>(values: &[S]) -> Result<Vec<u8>> {
    BytecodeBuilder::default().push_array(values)
}

pub fn create_push_dictionary<K: AsRef<[u8]>, V: AsRef<[u8]>>(pairs: &[(K, V)]) -> Result<Vec<u8>> {
    BytecodeBuilder::default().push_dictionary(pairs)
}

pub fn create_push_multiple<S: AsRef<str>>(values: &[S]) -> Result<Vec<u8>> {
    BytecodeBuilder::default().push_multiple(values)
}

pub fn create_function_call<S: AsRef<str>>(name: &str, args: &[S], returns: u8) -> Result<Vec<u8>> {
    BytecodeBuilder::default().function_call(name, args, returns)
}

pub fn create_push_vector2(x: f32, y: f32) -> Vec<u8> {
    BytecodeBuilder::default().push_vector2(x, y)
}

pub fn create_push_vector3(x: f32, y: f32, z: f32) -> Vec<u8> {
    BytecodeBuilder::default().push_vector3(x, y, z)
}

pub fn create_push_color3(r: f32, g: f32, b: f32) -> Vec<u8> {
    BytecodeBuilder::default().push_color3(r, g, b)
}

pub fn create_push_udim(scale: f32, offset: i32) -> Vec<u8> {
    BytecodeBuilder::default().push_udim(scale, offset)
}

pub fn create_push_udim2(x: (f32, i32), y: (f32, i32)) -> Vec<u8> {
    BytecodeBuilder::default().push_udim2(x, y)
}

pub fn create_push_cframe(position: [f32; 3], rotation: [f32; 4]) -> Vec<u8> {
    BytecodeBuilder::default().push_cframe(position, rotation)
}

pub fn create_push_brick_color(id: i32) -> Vec<u8> {
    BytecodeBuilder::default().push_brick_color(id)
}

pub fn create_push_instance<K: AsRef<str>, V: AsRef<str>>(class_name: &str, properties: &[(K, V)]) -> Vec<u8> {
    BytecodeBuilder::default().push_instance(class_name, properties)
}
