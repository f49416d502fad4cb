//! ScopeVM Runtime - bytecode virtual machine core
//!
//! This library provides:
//! - The value model and program/function tables the VM consumes
//! - Bytecode tooling: builder, disassembler, validator, binary images
//! - The VM: operand stack, frame arena, lexical context chain and the
//!   dispatch loop

/// ScopeVM runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bytecode;
pub mod error;
pub mod output;
pub mod program;
pub mod value;
pub mod vm;

pub use bytecode::{disassemble, validate, Bytecode, Opcode};
pub use error::{ErrorKind, RuntimeError, Status};
pub use output::OutputWriter;
pub use program::{
    ConstantPool, Function, FunctionId, Global, Program, ProgramError, ScopeDecl, ScopeId,
    Signature, SlotDecl,
};
pub use scopevm_config::VmConfig;
pub use value::{StrHandle, Value, VarType};
pub use vm::{Profiler, VM};
