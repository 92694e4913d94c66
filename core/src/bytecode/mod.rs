//! Push-module bytecode format
//!
//! Encoders for small self-contained modules (a checksummed header, a constant
//! pool and one function prototype) that leave a single value in register 0,
//! plus the validator, signature stripper and inspection helpers that work on
//! any buffer in the same format.

mod cache;
mod compile;
mod constant;
mod diagnostics;
mod header;
mod instruction;
mod loader;
mod module;
mod opcode;
mod proto;
mod push;
mod validate;
mod varint;

pub use cache::*;
pub use compile::*;
pub use constant::*;
pub use diagnostics::*;
pub use header::*;
pub use instruction::*;
pub use loader::*;
pub use module::*;
pub use opcode::*;
pub use proto::*;
pub use push::*;
pub use validate::*;
pub use varint::*;

#[cfg(test)]
mod diagnostics_test;
