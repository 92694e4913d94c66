//! Function prototypes and the instruction-level builder that assembles them.

use anyhow::{Context, Result, ensure};

use super::constant::{Constant, ConstantPool, read_u8};
use super::instruction::Instruction;
use super::opcode::Opcode;
use super::varint::{read_varint, write_varint};

/// Constant indices above this need the wide `LOADKX` form.
pub const MAX_SHORT_CONSTANT: u32 = u8::MAX as u32;
/// Largest constant index any load instruction can address.
pub const MAX_WIDE_CONSTANT: u32 = u16::MAX as u32;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionProto {
    pub max_stack_size: u32,
    pub num_params: u32,
    pub num_upvalues: u32,
    pub is_vararg: bool,
    pub instructions: Vec<Instruction>,
    /// Number of constants the function references.
    pub size_k: u32,
    /// Number of nested prototypes; always zero for generated modules.
    pub size_p: u32,
    pub line_defined: u32,
    pub debug_name: u32,
    pub line_info: u8,
    pub debug_info: u8,
}

impl FunctionProto {
    pub fn encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.max_stack_size);
        write_varint(out, self.num_params);
        write_varint(out, self.num_upvalues);
        write_varint(out, u32::from(self.is_vararg));
        write_varint(out, self.instructions.len() as u32);
        for instr in &self.instructions {
            instr.encode(out);
        }
        write_varint(out, self.size_k);
        write_varint(out, self.size_p);
        write_varint(out, self.line_defined);
        write_varint(out, self.debug_name);
        out.push(self.line_info);
        out.push(self.debug_info);
    }

    pub fn decode(bytes: &[u8], cursor: &mut usize) -> Result<FunctionProto> {
        let max_stack_size = read_varint(bytes, cursor).context("maxstacksize")?;
        let num_params = read_varint(bytes, cursor).context("numparams")?;
        let num_upvalues = read_varint(bytes, cursor).context("numupvalues")?;
        let vararg = read_varint(bytes, cursor).context("is_vararg")?;
        ensure!(vararg <= 1, "is_vararg flag must be 0 or 1, found {}", vararg);

        let count = read_varint(bytes, cursor).context("instruction count")? as usize;
        let mut instructions = Vec::with_capacity(count.min(bytes.len()));
        for idx in 0..count {
            instructions.push(Instruction::decode(bytes, cursor).with_context(|| format!("instruction {idx}"))?);
        }

        Ok(FunctionProto {
            max_stack_size,
            num_params,
            num_upvalues,
            is_vararg: vararg == 1,
            instructions,
            size_k: read_varint(bytes, cursor).context("sizek")?,
            size_p: read_varint(bytes, cursor).context("sizep")?,
            line_defined: read_varint(bytes, cursor).context("linedefined")?,
            debug_name: read_varint(bytes, cursor).context("debugname")?,
            line_info: read_u8(bytes, cursor).context("lineinfo")?,
            debug_info: read_u8(bytes, cursor).context("debuginfo")?,
        })
    }
}

/// Single-writer builder for one function prototype and the constant pool it
/// references.
///
/// Every `load_*`/`new_*`/`set_*` call appends exactly one instruction. Stack
/// size is tracked from the registers each instruction touches.
#[derive(Debug, Default)]
pub struct ProtoBuilder {
    constants: ConstantPool,
    instructions: Vec<Instruction>,
    max_stack: u32,
    num_params: u32,
    num_upvalues: u32,
    is_vararg: bool,
}

impl ProtoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature(mut self, num_params: u32, num_upvalues: u32, is_vararg: bool) -> Self {
        self.num_params = num_params;
        self.num_upvalues = num_upvalues;
        self.is_vararg = is_vararg;
        self
    }

    pub fn add_constant(&mut self, constant: Constant) -> u32 {
        self.constants.push(constant)
    }

    /// Raise maxstacksize to at least `slots`.
    fn reserve_stack(&mut self, slots: u32) {
        self.max_stack = self.max_stack.max(slots);
    }

    fn emit(&mut self, instr: Instruction) {
        if let Some(reg) = instr.max_register() {
            self.reserve_stack(u32::from(reg) + 1);
        }
        self.instructions.push(instr);
    }

    pub fn load_nil(&mut self, reg: u8) {
        self.emit(Instruction::new_a(Opcode::LoadNil, reg));
    }

    pub fn load_bool(&mut self, reg: u8, value: bool, jump: u8) {
        self.emit(Instruction::new_abc(Opcode::LoadB, reg, u8::from(value), jump));
    }

    /// Load an existing constant with the given short opcode, widening to
    /// `LOADKX` when the index does not fit in one byte.
    fn load_from_pool(&mut self, op: Opcode, reg: u8, kidx: u32) -> Result<()> {
        ensure!(
            (kidx as usize) < self.constants.len(),
            "constant index {} out of range (pool has {})",
            kidx,
            self.constants.len()
        );
        if kidx <= MAX_SHORT_CONSTANT {
            self.emit(Instruction::new_ab(op, reg, kidx as u8));
        } else {
            ensure!(
                kidx <= MAX_WIDE_CONSTANT,
                "constant index {} exceeds the {} addressable constants",
                kidx,
                MAX_WIDE_CONSTANT + 1
            );
            self.emit(Instruction::new_a(Opcode::LoadKX, reg).with_aux(kidx as u16));
        }
        Ok(())
    }

    /// `LOADN` with a one-byte constant index. The index is not checked
    /// against the pool.
    pub fn loadn(&mut self, reg: u8, kidx: u8) {
        self.emit(Instruction::new_ab(Opcode::LoadN, reg, kidx));
    }

    /// `LOADK` with a one-byte constant index. The index is not checked
    /// against the pool.
    pub fn loadk(&mut self, reg: u8, kidx: u8) {
        self.emit(Instruction::new_ab(Opcode::LoadK, reg, kidx));
    }

    /// `LOADN` from an already pooled number constant.
    pub fn load_number_constant(&mut self, reg: u8, kidx: u32) -> Result<()> {
        self.load_from_pool(Opcode::LoadN, reg, kidx)
    }

    /// `LOADK` from an already pooled constant.
    pub fn load_constant(&mut self, reg: u8, kidx: u32) -> Result<()> {
        self.load_from_pool(Opcode::LoadK, reg, kidx)
    }

    pub fn load_number(&mut self, reg: u8, value: f64) -> Result<u32> {
        let kidx = self.add_constant(Constant::Number(value));
        self.load_number_constant(reg, kidx)?;
        Ok(kidx)
    }

    pub fn load_string(&mut self, reg: u8, value: impl Into<Vec<u8>>) -> Result<u32> {
        let kidx = self.add_constant(Constant::string(value));
        self.load_constant(reg, kidx)?;
        Ok(kidx)
    }

    pub fn move_reg(&mut self, dst: u8, src: u8) {
        self.emit(Instruction::new_ab(Opcode::Move, dst, src));
    }

    pub fn new_table(&mut self, reg: u8, array_size: u16, hash_size: u8) {
        self.emit(Instruction::new_ab(Opcode::NewTable, reg, hash_size).with_aux(array_size));
    }

    pub fn set_table(&mut self, table: u8, key: u8, value: u8) {
        self.emit(Instruction::new_abc(Opcode::SetTable, table, key, value));
    }

    /// Store `count` registers starting at `src` into `table[index..]`.
    pub fn set_list(&mut self, table: u8, src: u8, count: u8, index: u16) {
        self.emit(Instruction::new_abc(Opcode::SetList, table, src, count).with_aux(index));
    }

    /// Global lookup by name; the name is pooled as a string constant.
    pub fn get_global(&mut self, reg: u8, name: impl Into<Vec<u8>>) -> Result<u32> {
        let kidx = self.add_constant(Constant::string(name));
        ensure!(
            kidx <= MAX_WIDE_CONSTANT,
            "global name constant {} exceeds the addressable range",
            kidx
        );
        self.emit(Instruction::new_ab(Opcode::GetGlobal, reg, 0).with_aux(kidx as u16));
        Ok(kidx)
    }

    /// Call the function in `func` with `args` arguments following it.
    /// Operands carry `args + 1` and `results + 1`.
    pub fn call(&mut self, func: u8, args: u8, results: u8) {
        self.emit(Instruction::new_abc(
            Opcode::Call,
            func,
            args.saturating_add(1),
            results.saturating_add(1),
        ));
    }

    pub fn ret(&mut self, start: u8, count: u8) {
        self.emit(Instruction::new_ab(Opcode::Return, start, count.saturating_add(1)));
    }

    pub fn finish(self) -> (ConstantPool, FunctionProto) {
        let proto = FunctionProto {
            max_stack_size: self.max_stack,
            num_params: self.num_params,
            num_upvalues: self.num_upvalues,
            is_vararg: self.is_vararg,
            instructions: self.instructions,
            size_k: self.constants.len() as u32,
            ..FunctionProto::default()
        };
        (self.constants, proto)
    }
}
