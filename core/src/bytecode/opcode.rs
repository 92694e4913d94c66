//! Opcode enumeration, operand shapes, and the on-disk opcode permutation.
//!
//! Every opcode byte written to an instruction stream goes through
//! [`encode_opcode`], a multiply-by-227 permutation of the byte domain. It is a
//! fixed obfuscation step, not a cryptographic one: [`decode_opcode`] undoes it
//! with the modular inverse 203 (`227 * 203 == 1 mod 256`).

use std::fmt;

/// Multiplier applied to logical opcodes before they are written.
pub const OPCODE_MULTIPLIER: u8 = 227;
/// Inverse of [`OPCODE_MULTIPLIER`] modulo 256.
pub const OPCODE_INVERSE: u8 = 203;

#[inline]
pub const fn encode_opcode(op: u8) -> u8 {
    op.wrapping_mul(OPCODE_MULTIPLIER)
}

#[inline]
pub const fn decode_opcode(byte: u8) -> u8 {
    byte.wrapping_mul(OPCODE_INVERSE)
}

/// Operand bytes carried by an instruction, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    None,
    A,
    AB,
    ABC,
}

impl OperandShape {
    #[inline]
    pub const fn len(self) -> usize {
        match self {
            OperandShape::None => 0,
            OperandShape::A => 1,
            OperandShape::AB => 2,
            OperandShape::ABC => 3,
        }
    }
}

/// Whether an instruction is followed by a 16-bit immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrWidth {
    Single,
    Double,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop = 0,
    LoadNil = 1,
    LoadB = 2,
    LoadN = 3,
    LoadK = 4,
    Move = 5,
    GetGlobal = 6,
    SetGlobal = 7,
    GetUpval = 8,
    SetUpval = 9,
    CloseUpvals = 10,
    GetImport = 11,
    GetTable = 12,
    SetTable = 13,
    GetTableKs = 14,
    SetTableKs = 15,
    NameCall = 16,
    Call = 17,
    Return = 18,
    Jump = 19,
    JumpBack = 20,
    JumpIf = 21,
    JumpIfNot = 22,
    JumpIfEq = 23,
    JumpIfLe = 24,
    JumpIfLt = 25,
    JumpIfNotEq = 26,
    JumpIfNotLe = 27,
    JumpIfNotLt = 28,
    Add = 29,
    Sub = 30,
    Mul = 31,
    Div = 32,
    Mod = 33,
    Pow = 34,
    AddK = 35,
    SubK = 36,
    MulK = 37,
    DivK = 38,
    ModK = 39,
    PowK = 40,
    Concat = 41,
    Not = 42,
    Minus = 43,
    Length = 44,
    NewTable = 45,
    DupTable = 46,
    SetList = 47,
    ForNPrep = 48,
    ForNLoop = 49,
    ForGLoop = 50,
    ForGPrepINext = 51,
    ForGPrepNext = 52,
    And = 53,
    AndK = 54,
    Or = 55,
    OrK = 56,
    Coverage = 57,
    GetTableN = 58,
    SetTableN = 59,
    FastCall = 60,
    FastCall1 = 61,
    FastCall2 = 62,
    FastCall2K = 63,
    FastCall3 = 64,
    ForGPrep = 65,
    JumpIfEqK = 66,
    JumpIfNotEqK = 67,
    LoadKX = 68,
    FastCall2M = 69,
    Capture = 70,
    JumpX = 71,
    FastCallM = 72,
}

impl Opcode {
    pub const COUNT: usize = 73;

    pub const ALL: [Opcode; Opcode::COUNT] = [
        Opcode::Nop,
        Opcode::LoadNil,
        Opcode::LoadB,
        Opcode::LoadN,
        Opcode::LoadK,
        Opcode::Move,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::GetUpval,
        Opcode::SetUpval,
        Opcode::CloseUpvals,
        Opcode::GetImport,
        Opcode::GetTable,
        Opcode::SetTable,
        Opcode::GetTableKs,
        Opcode::SetTableKs,
        Opcode::NameCall,
        Opcode::Call,
        Opcode::Return,
        Opcode::Jump,
        Opcode::JumpBack,
        Opcode::JumpIf,
        Opcode::JumpIfNot,
        Opcode::JumpIfEq,
        Opcode::JumpIfLe,
        Opcode::JumpIfLt,
        Opcode::JumpIfNotEq,
        Opcode::JumpIfNotLe,
        Opcode::JumpIfNotLt,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Pow,
        Opcode::AddK,
        Opcode::SubK,
        Opcode::MulK,
        Opcode::DivK,
        Opcode::ModK,
        Opcode::PowK,
        Opcode::Concat,
        Opcode::Not,
        Opcode::Minus,
        Opcode::Length,
        Opcode::NewTable,
        Opcode::DupTable,
        Opcode::SetList,
        Opcode::ForNPrep,
        Opcode::ForNLoop,
        Opcode::ForGLoop,
        Opcode::ForGPrepINext,
        Opcode::ForGPrepNext,
        Opcode::And,
        Opcode::AndK,
        Opcode::Or,
        Opcode::OrK,
        Opcode::Coverage,
        Opcode::GetTableN,
        Opcode::SetTableN,
        Opcode::FastCall,
        Opcode::FastCall1,
        Opcode::FastCall2,
        Opcode::FastCall2K,
        Opcode::FastCall3,
        Opcode::ForGPrep,
        Opcode::JumpIfEqK,
        Opcode::JumpIfNotEqK,
        Opcode::LoadKX,
        Opcode::FastCall2M,
        Opcode::Capture,
        Opcode::JumpX,
        Opcode::FastCallM,
    ];

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn from_u8(raw: u8) -> Option<Opcode> {
        Opcode::ALL.get(raw as usize).copied()
    }

    /// The byte actually written to the instruction stream.
    #[inline]
    pub const fn encoded(self) -> u8 {
        encode_opcode(self as u8)
    }

    /// Inverse of [`Opcode::encoded`]; `None` for bytes outside the enumeration.
    #[inline]
    pub fn from_encoded(byte: u8) -> Option<Opcode> {
        Opcode::from_u8(decode_opcode(byte))
    }

    pub const fn width(self) -> InstrWidth {
        match self {
            Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::GetImport
            | Opcode::GetTableKs
            | Opcode::SetTableKs
            | Opcode::NameCall
            | Opcode::JumpIfEq
            | Opcode::JumpIfLe
            | Opcode::JumpIfLt
            | Opcode::JumpIfNotEq
            | Opcode::JumpIfNotLe
            | Opcode::JumpIfNotLt
            | Opcode::NewTable
            | Opcode::SetList
            | Opcode::ForGLoop
            | Opcode::LoadKX
            | Opcode::JumpIfEqK
            | Opcode::JumpIfNotEqK
            | Opcode::FastCall2
            | Opcode::FastCall2K => InstrWidth::Double,
            _ => InstrWidth::Single,
        }
    }

    #[inline]
    pub const fn is_double_word(self) -> bool {
        matches!(self.width(), InstrWidth::Double)
    }

    pub const fn shape(self) -> OperandShape {
        match self {
            Opcode::Nop | Opcode::Coverage | Opcode::JumpX => OperandShape::None,
            Opcode::LoadNil | Opcode::CloseUpvals | Opcode::LoadKX => OperandShape::A,
            Opcode::LoadN
            | Opcode::LoadK
            | Opcode::Move
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::GetUpval
            | Opcode::SetUpval
            | Opcode::GetImport
            | Opcode::Return
            | Opcode::Jump
            | Opcode::JumpBack
            | Opcode::JumpIf
            | Opcode::JumpIfNot
            | Opcode::JumpIfEq
            | Opcode::JumpIfLe
            | Opcode::JumpIfLt
            | Opcode::JumpIfNotEq
            | Opcode::JumpIfNotLe
            | Opcode::JumpIfNotLt
            | Opcode::Not
            | Opcode::Minus
            | Opcode::Length
            | Opcode::NewTable
            | Opcode::DupTable
            | Opcode::ForNPrep
            | Opcode::ForNLoop
            | Opcode::ForGLoop
            | Opcode::ForGPrepINext
            | Opcode::ForGPrepNext
            | Opcode::FastCall
            | Opcode::ForGPrep
            | Opcode::JumpIfEqK
            | Opcode::JumpIfNotEqK
            | Opcode::Capture => OperandShape::AB,
            _ => OperandShape::ABC,
        }
    }

    /// Total encoded size of one instruction with this opcode.
    #[inline]
    pub const fn encoded_len(self) -> usize {
        let aux = if self.is_double_word() { 2 } else { 0 };
        1 + self.shape().len() + aux
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::LoadNil => "LOADNIL",
            Opcode::LoadB => "LOADB",
            Opcode::LoadN => "LOADN",
            Opcode::LoadK => "LOADK",
            Opcode::Move => "MOVE",
            Opcode::GetGlobal => "GETGLOBAL",
            Opcode::SetGlobal => "SETGLOBAL",
            Opcode::GetUpval => "GETUPVAL",
            Opcode::SetUpval => "SETUPVAL",
            Opcode::CloseUpvals => "CLOSEUPVALS",
            Opcode::GetImport => "GETIMPORT",
            Opcode::GetTable => "GETTABLE",
            Opcode::SetTable => "SETTABLE",
            Opcode::GetTableKs => "GETTABLEKS",
            Opcode::SetTableKs => "SETTABLEKS",
            Opcode::NameCall => "NAMECALL",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Jump => "JUMP",
            Opcode::JumpBack => "JUMPBACK",
            Opcode::JumpIf => "JUMPIF",
            Opcode::JumpIfNot => "JUMPIFNOT",
            Opcode::JumpIfEq => "JUMPIFEQ",
            Opcode::JumpIfLe => "JUMPIFLE",
            Opcode::JumpIfLt => "JUMPIFLT",
            Opcode::JumpIfNotEq => "JUMPIFNOTEQ",
            Opcode::JumpIfNotLe => "JUMPIFNOTLE",
            Opcode::JumpIfNotLt => "JUMPIFNOTLT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Pow => "POW",
            Opcode::AddK => "ADDK",
            Opcode::SubK => "SUBK",
            Opcode::MulK => "MULK",
            Opcode::DivK => "DIVK",
            Opcode::ModK => "MODK",
            Opcode::PowK => "POWK",
            Opcode::Concat => "CONCAT",
            Opcode::Not => "NOT",
            Opcode::Minus => "MINUS",
            Opcode::Length => "LENGTH",
            Opcode::NewTable => "NEWTABLE",
            Opcode::DupTable => "DUPTABLE",
            Opcode::SetList => "SETLIST",
            Opcode::ForNPrep => "FORNPREP",
            Opcode::ForNLoop => "FORNLOOP",
            Opcode::ForGLoop => "FORGLOOP",
            Opcode::ForGPrepINext => "FORGPREP_INEXT",
            Opcode::ForGPrepNext => "FORGPREP_NEXT",
            Opcode::And => "AND",
            Opcode::AndK => "ANDK",
            Opcode::Or => "OR",
            Opcode::OrK => "ORK",
            Opcode::Coverage => "COVERAGE",
            Opcode::GetTableN => "GETTABLEN",
            Opcode::SetTableN => "SETTABLEN",
            Opcode::FastCall => "FASTCALL",
            Opcode::FastCall1 => "FASTCALL1",
            Opcode::FastCall2 => "FASTCALL2",
            Opcode::FastCall2K => "FASTCALL2K",
            Opcode::FastCall3 => "FASTCALL3",
            Opcode::ForGPrep => "FORGPREP",
            Opcode::JumpIfEqK => "JUMPIFEQK",
            Opcode::JumpIfNotEqK => "JUMPIFNOTEQK",
            Opcode::LoadKX => "LOADKX",
            Opcode::FastCall2M => "FASTCALL2M",
            Opcode::Capture => "CAPTURE",
            Opcode::JumpX => "JUMPX",
            Opcode::FastCallM => "FASTCALLM",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn permutation_is_a_bijection_over_bytes() {
        let images: HashSet<u8> = (0..=255u8).map(encode_opcode).collect();
        assert_eq!(images.len(), 256);
        for x in 0..=255u8 {
            assert_eq!(decode_opcode(encode_opcode(x)), x);
        }
    }

    #[test]
    fn inverse_multiplier_is_correct() {
        assert_eq!(OPCODE_MULTIPLIER.wrapping_mul(OPCODE_INVERSE), 1);
    }

    #[test]
    fn table_indices_match_discriminants() {
        for (idx, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.as_u8() as usize, idx, "{op}");
            assert_eq!(Opcode::from_encoded(op.encoded()), Some(*op));
        }
        assert_eq!(Opcode::from_u8(Opcode::COUNT as u8), None);
    }

    #[test]
    fn known_encodings() {
        assert_eq!(Opcode::LoadNil.encoded(), 227);
        assert_eq!(Opcode::LoadB.encoded(), 198);
        assert_eq!(Opcode::NewTable.encoded(), (45u32 * 227 % 256) as u8);
    }

    #[test]
    fn double_word_table_has_twenty_entries() {
        let doubles = Opcode::ALL.iter().filter(|op| op.is_double_word()).count();
        assert_eq!(doubles, 20);
        assert_eq!(Opcode::NewTable.encoded_len(), 5);
        assert_eq!(Opcode::LoadK.encoded_len(), 3);
        assert_eq!(Opcode::LoadKX.encoded_len(), 4);
    }
}
