pub mod bytecode;
pub mod config;

pub use bytecode::{
    BytecodeBuilder, BytecodeCache, BytecodeLoader, BytecodePusher, PushValue, ValidationError, compile, decompress,
    validate_bytecode, verify_bytecode,
};
pub use config::EncoderOptions;
