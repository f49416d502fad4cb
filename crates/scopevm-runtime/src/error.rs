//! Runtime faults and the terminal execution status

use crate::program::FunctionId;
use crate::value::VarType;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Fault category reported in [`Status::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Unknown opcode, truncated operands, bad branch target, dangling reference
    MalformedBytecode,
    /// Integer division or modulo by zero
    ArithmeticFault,
    /// Operand-stack or frame-stack capacity exceeded
    ResourceExhausted,
    /// Stored tag differs from the type an instruction requested
    TypeContractViolation,
    /// String to int conversion failed
    ConversionFault,
    /// The output sink rejected a write
    OutputFault,
    /// Initial global bindings do not match the global scope
    InvalidBinding,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedBytecode => "malformed bytecode",
            ErrorKind::ArithmeticFault => "arithmetic fault",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::TypeContractViolation => "type contract violation",
            ErrorKind::ConversionFault => "conversion fault",
            ErrorKind::OutputFault => "output fault",
            ErrorKind::InvalidBinding => "invalid binding",
        };
        f.write_str(name)
    }
}

/// A fatal condition raised while executing an instruction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("instruction {opcode} is truncated (missing operand bytes)")]
    TruncatedInstruction { opcode: &'static str },

    #[error("branch target {target} is out of range (len={len})")]
    BranchOutOfRange { target: isize, len: usize },

    #[error("constant index {index} out of bounds (pool size={pool_size})")]
    ConstantOutOfRange { index: u16, pool_size: usize },

    #[error("unknown function id {0}")]
    UnknownFunction(FunctionId),

    #[error("scope {scope} is not reachable from function '{function}'")]
    UnresolvedScope { scope: u16, function: String },

    #[error("slot {slot} out of range for scope {scope} ({len} slots)")]
    SlotOutOfRange { scope: u16, slot: u16, len: usize },

    #[error("function '{function}' called outside a live activation of '{parent}'")]
    DetachedCall { function: String, parent: String },

    #[error("function '{0}' declares no local scope")]
    NoLocalScope(String),

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("function '{function}' returned with operand depth {actual}, expected {expected}")]
    ReturnImbalance {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("control reached the end of function '{function}' returning {ret}")]
    MissingReturn { function: String, ret: VarType },

    #[error("integer division by zero")]
    DivideByZero,

    #[error("integer modulo by zero")]
    ModuloByZero,

    #[error("operand stack overflow (capacity {capacity})")]
    OperandStackOverflow { capacity: usize },

    #[error("stack overflow: frame stack capacity {capacity} exceeded")]
    FrameStackOverflow { capacity: usize },

    #[error("type contract violation: expected {expected}, found {found}")]
    TypeMismatch { expected: VarType, found: VarType },

    #[error("cannot convert {text:?} to int")]
    InvalidConversion { text: String },

    #[error("output error: {0}")]
    Output(String),

    #[error("unknown global '{0}'")]
    UnknownGlobal(String),

    #[error("global '{name}' declared {declared}, bound to {supplied}")]
    GlobalTypeMismatch {
        name: String,
        declared: VarType,
        supplied: VarType,
    },

    #[error("program has no global scope to bind '{0}'")]
    NoGlobalScope(String),

    #[error("verification failed: {0}")]
    Verification(String),
}

impl RuntimeError {
    /// Map the fault into the status taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::UnknownOpcode(_)
            | RuntimeError::TruncatedInstruction { .. }
            | RuntimeError::BranchOutOfRange { .. }
            | RuntimeError::ConstantOutOfRange { .. }
            | RuntimeError::UnknownFunction(_)
            | RuntimeError::UnresolvedScope { .. }
            | RuntimeError::DetachedCall { .. }
            | RuntimeError::SlotOutOfRange { .. }
            | RuntimeError::NoLocalScope(_)
            | RuntimeError::StackUnderflow
            | RuntimeError::ReturnImbalance { .. }
            | RuntimeError::MissingReturn { .. }
            | RuntimeError::Verification(_) => ErrorKind::MalformedBytecode,
            RuntimeError::DivideByZero | RuntimeError::ModuloByZero => ErrorKind::ArithmeticFault,
            RuntimeError::OperandStackOverflow { .. } | RuntimeError::FrameStackOverflow { .. } => {
                ErrorKind::ResourceExhausted
            }
            RuntimeError::TypeMismatch { .. } => ErrorKind::TypeContractViolation,
            RuntimeError::InvalidConversion { .. } => ErrorKind::ConversionFault,
            RuntimeError::Output(_) => ErrorKind::OutputFault,
            RuntimeError::UnknownGlobal(_)
            | RuntimeError::GlobalTypeMismatch { .. }
            | RuntimeError::NoGlobalScope(_) => ErrorKind::InvalidBinding,
        }
    }
}

/// A runtime error located at the instruction that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub error: RuntimeError,
    /// Byte offset of the failing instruction within its function
    pub offset: Option<usize>,
    /// Function whose instruction stream `offset` refers to
    pub function: Option<FunctionId>,
}

impl Fault {
    /// A fault not tied to any instruction (binding, verification)
    pub fn unlocated(error: RuntimeError) -> Self {
        Self {
            error,
            offset: None,
            function: None,
        }
    }

    pub fn at(error: RuntimeError, function: FunctionId, offset: usize) -> Self {
        Self {
            error,
            offset: Some(offset),
            function: Some(function),
        }
    }
}

impl From<Fault> for Status {
    fn from(fault: Fault) -> Self {
        Status::Error {
            kind: fault.error.kind(),
            message: fault.error.to_string(),
            offset: fault.offset,
            function: fault.function,
        }
    }
}

/// Terminal outcome of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Status {
    Ok,
    Error {
        kind: ErrorKind,
        message: String,
        offset: Option<usize>,
        function: Option<FunctionId>,
    },
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// Fault category, if this is an error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Status::Ok => None,
            Status::Error { kind, .. } => Some(*kind),
        }
    }

    /// Offset of the failing instruction, if known
    pub fn offset(&self) -> Option<usize> {
        match self {
            Status::Ok => None,
            Status::Error { offset, .. } => *offset,
        }
    }

    /// Human-readable message, if this is an error
    pub fn message(&self) -> Option<&str> {
        match self {
            Status::Ok => None,
            Status::Error { message, .. } => Some(message),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("ok"),
            Status::Error {
                kind,
                message,
                offset,
                function,
            } => {
                write!(f, "{}: {}", kind, message)?;
                match (function, offset) {
                    (Some(func), Some(off)) => write!(f, " (function {} at {:04})", func, off),
                    (None, Some(off)) => write!(f, " (at {:04})", off),
                    _ => Ok(()),
                }
            }
        }
    }
}
