//! Bytecode instruction set, builder and decoding
//!
//! Instructions are encoded as:
//! - Opcode (1 byte)
//! - Operands (fixed per opcode, little-endian)

mod disasm;
mod opcode;
mod serialize;
mod validator;

pub use disasm::{disassemble, disassemble_function};
pub use opcode::{Opcode, Operands};
pub use serialize::{ImageError, IMAGE_MAGIC, IMAGE_VERSION};
pub use validator::{validate, ValidationError, ValidationErrorKind};

use crate::error::RuntimeError;
use thiserror::Error;

/// Errors raised while assembling an instruction stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("branch at {site} cannot reach {target} with a 16-bit offset")]
    BranchOutOfRange { site: usize, target: usize },

    #[error("no branch operand to patch at {0}")]
    BadPatchSite(usize),
}

/// Instruction stream builder
///
/// Used by tests, benches and embedders that assemble code by hand.
/// Branch sites returned by [`Bytecode::emit_forward`] are the offsets of
/// the i16 operand, which is also the base the VM adds the offset to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytecode {
    instructions: Vec<u8>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an opcode byte
    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.instructions.push(opcode as u8);
        self
    }

    /// Emit a raw byte (for hand-crafted malformed streams)
    pub fn emit_u8(&mut self, byte: u8) -> &mut Self {
        self.instructions.push(byte);
        self
    }

    pub fn emit_u16(&mut self, value: u16) -> &mut Self {
        self.instructions.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn emit_i16(&mut self, value: i16) -> &mut Self {
        self.instructions.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn emit_i64(&mut self, value: i64) -> &mut Self {
        self.instructions.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn emit_f64(&mut self, value: f64) -> &mut Self {
        self.instructions.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// `ILOAD value`
    pub fn iload(&mut self, value: i64) -> &mut Self {
        self.emit(Opcode::ILoad).emit_i64(value)
    }

    /// `DLOAD value`
    pub fn dload(&mut self, value: f64) -> &mut Self {
        self.emit(Opcode::DLoad).emit_f64(value)
    }

    /// Emit a branch to an already known target
    pub fn emit_branch(&mut self, opcode: Opcode, target: usize) -> Result<&mut Self, BuildError> {
        let site = self.emit_forward(opcode);
        self.bind(site, target)?;
        Ok(self)
    }

    /// Emit a branch whose target is patched later; returns the patch site
    pub fn emit_forward(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode);
        let site = self.instructions.len();
        self.emit_i16(0);
        site
    }

    /// Point the branch operand at `site` to `target`
    pub fn bind(&mut self, site: usize, target: usize) -> Result<(), BuildError> {
        if site + 2 > self.instructions.len() {
            return Err(BuildError::BadPatchSite(site));
        }
        let delta = target as i64 - site as i64;
        let offset =
            i16::try_from(delta).map_err(|_| BuildError::BranchOutOfRange { site, target })?;
        self.instructions[site..site + 2].copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// Point the branch operand at `site` to the current end of the stream
    pub fn patch_branch(&mut self, site: usize) -> Result<(), BuildError> {
        self.bind(site, self.current_offset())
    }

    /// Offset the next emitted byte will occupy
    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.instructions
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.instructions
    }
}

/// Decoded operand of one instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    None,
    Int(i64),
    Double(f64),
    Constant(u16),
    Slot(u16),
    ScopeSlot { scope: u16, slot: u16 },
    /// Raw offset and the absolute target it selects
    Branch { offset: i16, target: isize },
    Function(u16),
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operand: Operand,
}

impl Instruction {
    /// Offset of the following instruction
    pub fn next_offset(&self) -> usize {
        self.offset + self.opcode.width()
    }
}

/// Decode the instruction starting at `offset`
pub fn decode_at(code: &[u8], offset: usize) -> Result<Instruction, RuntimeError> {
    let byte = *code.get(offset).ok_or(RuntimeError::BranchOutOfRange {
        target: offset as isize,
        len: code.len(),
    })?;
    let opcode = Opcode::try_from(byte).map_err(|_| RuntimeError::UnknownOpcode(byte))?;
    let at = offset + 1;
    let truncated = || RuntimeError::TruncatedInstruction {
        opcode: opcode.mnemonic(),
    };
    let operand = match opcode.operands() {
        Operands::None => Operand::None,
        Operands::Int => Operand::Int(read_i64(code, at).ok_or_else(truncated)?),
        Operands::Double => Operand::Double(read_f64(code, at).ok_or_else(truncated)?),
        Operands::Constant => Operand::Constant(read_u16(code, at).ok_or_else(truncated)?),
        Operands::Slot => Operand::Slot(read_u16(code, at).ok_or_else(truncated)?),
        Operands::Function => Operand::Function(read_u16(code, at).ok_or_else(truncated)?),
        Operands::ScopeSlot => Operand::ScopeSlot {
            scope: read_u16(code, at).ok_or_else(truncated)?,
            slot: read_u16(code, at + 2).ok_or_else(truncated)?,
        },
        Operands::Branch => {
            let offset = read_i16(code, at).ok_or_else(truncated)?;
            Operand::Branch {
                offset,
                target: branch_target(at, offset),
            }
        }
    };
    Ok(Instruction {
        offset,
        opcode,
        operand,
    })
}

/// Linear decoder over a whole stream
///
/// Yields each instruction or the error at its offset. After an unknown
/// opcode decoding resumes at the next byte; a truncated instruction ends
/// the stream.
pub fn decode_all(code: &[u8]) -> impl Iterator<Item = Result<Instruction, (usize, RuntimeError)>> + '_ {
    let mut offset = 0;
    std::iter::from_fn(move || {
        if offset >= code.len() {
            return None;
        }
        let at = offset;
        match decode_at(code, at) {
            Ok(instr) => {
                offset = instr.next_offset();
                Some(Ok(instr))
            }
            Err(err @ RuntimeError::UnknownOpcode(_)) => {
                offset += 1;
                Some(Err((at, err)))
            }
            Err(err) => {
                offset = code.len();
                Some(Err((at, err)))
            }
        }
    })
}

/// Absolute target of a branch whose operand sits at `operand_at`
#[inline]
pub(crate) fn branch_target(operand_at: usize, offset: i16) -> isize {
    operand_at as isize + offset as isize
}

#[inline]
pub(crate) fn read_u16(code: &[u8], at: usize) -> Option<u16> {
    let bytes = code.get(at..at + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub(crate) fn read_i16(code: &[u8], at: usize) -> Option<i16> {
    read_u16(code, at).map(|v| v as i16)
}

#[inline]
pub(crate) fn read_i64(code: &[u8], at: usize) -> Option<i64> {
    let bytes: [u8; 8] = code.get(at..at + 8)?.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}

#[inline]
pub(crate) fn read_f64(code: &[u8], at: usize) -> Option<f64> {
    let bytes: [u8; 8] = code.get(at..at + 8)?.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}
