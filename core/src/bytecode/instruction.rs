use std::fmt;

use anyhow::{Context, Result, bail, ensure};

use super::opcode::Opcode;

/// One decoded instruction: logical opcode, operand bytes, optional immediate.
///
/// Only the first `op.shape().len()` operand bytes are meaningful; the rest are
/// zero. `aux` is `Some` exactly when `op.is_double_word()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    operands: [u8; 3],
    pub aux: Option<u16>,
}

impl Instruction {
    /// Build an instruction, checking operand count and immediate presence
    /// against the opcode table.
    pub fn new(op: Opcode, operands: &[u8], aux: Option<u16>) -> Result<Self> {
        let expected = op.shape().len();
        ensure!(
            operands.len() == expected,
            "{} takes {} operand bytes, got {}",
            op,
            expected,
            operands.len()
        );
        ensure!(
            aux.is_some() == op.is_double_word(),
            "{} {} a 16-bit immediate",
            op,
            if op.is_double_word() { "requires" } else { "does not take" }
        );
        let mut packed = [0u8; 3];
        packed[..expected].copy_from_slice(operands);
        Ok(Instruction {
            op,
            operands: packed,
            aux,
        })
    }

    // Unchecked constructors; the shape must match `op.shape()`.

    pub(crate) const fn new_a(op: Opcode, a: u8) -> Self {
        Instruction {
            op,
            operands: [a, 0, 0],
            aux: None,
        }
    }

    pub(crate) const fn new_ab(op: Opcode, a: u8, b: u8) -> Self {
        Instruction {
            op,
            operands: [a, b, 0],
            aux: None,
        }
    }

    pub(crate) const fn new_abc(op: Opcode, a: u8, b: u8, c: u8) -> Self {
        Instruction {
            op,
            operands: [a, b, c],
            aux: None,
        }
    }

    pub(crate) const fn with_aux(mut self, aux: u16) -> Self {
        self.aux = Some(aux);
        self
    }

    pub fn operands(&self) -> &[u8] {
        &self.operands[..self.op.shape().len()]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.operands[0]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.operands[1]
    }

    #[inline]
    pub fn c(&self) -> u8 {
        self.operands[2]
    }

    pub fn encoded_len(&self) -> usize {
        self.op.encoded_len()
    }

    /// Constant index read by a load-from-constant instruction.
    pub fn constant_index(&self) -> Option<u32> {
        match self.op {
            Opcode::LoadN | Opcode::LoadK => Some(u32::from(self.b())),
            Opcode::LoadKX | Opcode::GetGlobal | Opcode::SetGlobal => self.aux.map(u32::from),
            _ => None,
        }
    }

    /// Highest register this instruction writes or reads through operand A,
    /// plus any contiguous register window it addresses.
    pub(crate) fn max_register(&self) -> Option<u8> {
        match self.op {
            Opcode::Nop | Opcode::Coverage | Opcode::JumpX => None,
            Opcode::Move => Some(self.a().max(self.b())),
            Opcode::SetTable => Some(self.a().max(self.b()).max(self.c())),
            Opcode::SetList => {
                let window_end = u16::from(self.b()) + u16::from(self.c());
                let last = window_end.saturating_sub(1).min(u16::from(u8::MAX)) as u8;
                Some(self.a().max(last))
            }
            // Arguments sit in R(a+1)..=R(a+args); results land in
            // R(a)..=R(a+results-1).
            Opcode::Call => {
                let args = self.b().saturating_sub(1);
                let results = self.c().saturating_sub(1);
                let last_arg = self.a().saturating_add(args);
                let last_result = self.a().saturating_add(results.saturating_sub(1));
                Some(last_arg.max(last_result))
            }
            _ => Some(self.a()),
        }
    }

    /// Append the permuted opcode byte, operand bytes, and immediate.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.op.encoded());
        out.extend_from_slice(self.operands());
        if let Some(aux) = self.aux {
            out.extend_from_slice(&aux.to_le_bytes());
        }
    }

    pub fn decode(bytes: &[u8], cursor: &mut usize) -> Result<Instruction> {
        let Some(&raw) = bytes.get(*cursor) else {
            bail!("unexpected end of input while reading opcode");
        };
        let op = Opcode::from_encoded(raw)
            .with_context(|| format!("unknown opcode byte 0x{:02x} at offset {}", raw, *cursor))?;
        ensure!(
            *cursor + op.encoded_len() <= bytes.len(),
            "{} at offset {} overruns instruction stream",
            op,
            *cursor
        );
        let start = *cursor + 1;
        let count = op.shape().len();
        let mut operands = [0u8; 3];
        operands[..count].copy_from_slice(&bytes[start..start + count]);
        let aux = if op.is_double_word() {
            let at = start + count;
            Some(u16::from_le_bytes([bytes[at], bytes[at + 1]]))
        } else {
            None
        };
        *cursor += op.encoded_len();
        Ok(Instruction { op, operands, aux })
    }
}

/// Encode a single instruction from its raw parts.
pub fn encode_instruction(op: Opcode, operands: &[u8], aux: Option<u16>) -> Result<Vec<u8>> {
    let instr = Instruction::new(op, operands, aux)?;
    let mut out = Vec::with_capacity(instr.encoded_len());
    instr.encode(&mut out);
    Ok(out)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12}", self.op.name())?;
        match self.op {
            Opcode::LoadNil => write!(f, " R{}", self.a())?,
            Opcode::LoadB => write!(f, " R{} {} +{}", self.a(), self.b() != 0, self.c())?,
            Opcode::LoadN | Opcode::LoadK => write!(f, " R{} K{}", self.a(), self.b())?,
            Opcode::LoadKX => write!(f, " R{}", self.a())?,
            Opcode::Move => write!(f, " R{} R{}", self.a(), self.b())?,
            Opcode::GetGlobal | Opcode::SetGlobal => write!(f, " R{}", self.a())?,
            Opcode::NewTable => write!(f, " R{} hash={}", self.a(), self.b())?,
            Opcode::SetTable => write!(f, " R{}[R{}] = R{}", self.a(), self.b(), self.c())?,
            Opcode::SetList => write!(f, " R{} R{}..+{}", self.a(), self.b(), self.c())?,
            Opcode::Call => write!(f, " R{} args={} results={}", self.a(), self.b(), self.c())?,
            Opcode::Return => write!(f, " R{} count={}", self.a(), self.b())?,
            _ => {
                for operand in self.operands() {
                    write!(f, " {}", operand)?;
                }
            }
        }
        match (self.op, self.aux) {
            (Opcode::LoadKX | Opcode::GetGlobal | Opcode::SetGlobal, Some(k)) => write!(f, " K{}", k),
            (Opcode::NewTable, Some(size)) => write!(f, " array={}", size),
            (Opcode::SetList, Some(index)) => write!(f, " at={}", index),
            (_, Some(aux)) => write!(f, " aux={}", aux),
            (_, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::encode_opcode;

    #[test]
    fn single_word_layout() {
        let bytes = encode_instruction(Opcode::LoadK, &[3, 7], None).expect("encode");
        assert_eq!(bytes, vec![encode_opcode(4), 3, 7]);
    }

    #[test]
    fn double_word_appends_le_immediate() {
        let bytes = encode_instruction(Opcode::NewTable, &[0, 2], Some(0x0105)).expect("encode");
        assert_eq!(bytes, vec![encode_opcode(45), 0, 2, 0x05, 0x01]);
    }

    #[test]
    fn operand_count_is_checked() {
        let err = encode_instruction(Opcode::LoadNil, &[0, 1], None).unwrap_err();
        assert!(err.to_string().contains("LOADNIL takes 1 operand bytes"));
        assert!(encode_instruction(Opcode::NewTable, &[0, 0], None).is_err());
        assert!(encode_instruction(Opcode::Move, &[0, 1], Some(1)).is_err());
    }

    #[test]
    fn decode_reverses_encode() {
        let originals = [
            Instruction::new_a(Opcode::LoadNil, 4),
            Instruction::new_abc(Opcode::LoadB, 0, 1, 0),
            Instruction::new_ab(Opcode::NewTable, 0, 0).with_aux(300),
            Instruction::new_abc(Opcode::SetList, 0, 1, 3).with_aux(1),
        ];
        let mut stream = Vec::new();
        for instr in &originals {
            instr.encode(&mut stream);
        }
        let mut cursor = 0;
        for expected in &originals {
            let decoded = Instruction::decode(&stream, &mut cursor).expect("decode");
            assert_eq!(&decoded, expected);
        }
        assert_eq!(cursor, stream.len());
    }

    #[test]
    fn unknown_and_truncated_opcodes_fail() {
        let mut cursor = 0;
        assert!(Instruction::decode(&[encode_opcode(200)], &mut cursor).is_err());
        let mut cursor = 0;
        assert!(Instruction::decode(&[Opcode::LoadK.encoded(), 0], &mut cursor).is_err());
    }

    #[test]
    fn constant_index_covers_load_forms() {
        assert_eq!(Instruction::new_ab(Opcode::LoadN, 0, 5).constant_index(), Some(5));
        assert_eq!(
            Instruction::new_a(Opcode::LoadKX, 0).with_aux(700).constant_index(),
            Some(700)
        );
        assert_eq!(Instruction::new_a(Opcode::LoadNil, 0).constant_index(), None);
    }

    #[test]
    fn call_register_window() {
        // No arguments, three results: R0..=R2.
        assert_eq!(Instruction::new_abc(Opcode::Call, 0, 1, 4).max_register(), Some(2));
        // Two arguments, one result: R1..=R2 hold the arguments.
        assert_eq!(Instruction::new_abc(Opcode::Call, 0, 3, 2).max_register(), Some(2));
        assert_eq!(Instruction::new_abc(Opcode::Call, 5, 1, 1).max_register(), Some(5));
    }
}
