//! Bytecode disassembler
//!
//! Converts a program back to a human-readable listing. Used for
//! debugging and snapshot tests.

use super::{decode_all, Instruction, Operand};
use crate::error::RuntimeError;
use crate::program::{ConstantPool, Function, Program};
use std::fmt;

/// Disassemble a whole program
///
/// # Format
/// ```text
/// === Constants ===
/// 0: "hello"
///
/// === Function 0: main void () ===
/// scope 0: int x
/// 0000  SLOAD @0 "hello"
/// 0003  SPRINT
/// 0004  STOP
/// ```
pub fn disassemble(program: &Program) -> String {
    ProgramListing(program).to_string()
}

/// Disassemble one function, resolving constants and callees in `program`
pub fn disassemble_function(program: &Program, function: &Function) -> String {
    FunctionListing { program, function }.to_string()
}

struct ProgramListing<'a>(&'a Program);

impl fmt::Display for ProgramListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.0;
        if !program.constants().is_empty() {
            writeln!(f, "=== Constants ===")?;
            for (idx, constant) in program.constants().iter().enumerate() {
                writeln!(f, "{}: {:?}", idx, constant)?;
            }
            writeln!(f)?;
        }
        for (i, function) in program.functions().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", FunctionListing { program, function })?;
        }
        Ok(())
    }
}

struct FunctionListing<'a> {
    program: &'a Program,
    function: &'a Function,
}

impl fmt::Display for FunctionListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = self.function;
        write!(
            f,
            "=== Function {}: {} {}",
            function.id(),
            function.name(),
            function.signature()
        )?;
        if let Some(parent) = function.parent() {
            write!(f, " in {}", parent)?;
        }
        writeln!(f, " ===")?;

        for scope in function.scopes() {
            write!(f, "scope {}:", scope.id)?;
            for (i, slot) in scope.slots.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{}{} {}", sep, slot.ty, slot.name)?;
            }
            writeln!(f)?;
        }

        for decoded in decode_all(function.bytecode()) {
            match decoded {
                Ok(instr) => {
                    writeln!(f, "{}", self.render(&instr))?;
                }
                Err((offset, RuntimeError::UnknownOpcode(byte))) => {
                    writeln!(f, "{:04}  <invalid opcode: {:#04x}>", offset, byte)?;
                }
                Err((offset, err)) => {
                    writeln!(f, "{:04}  <{}>", offset, err)?;
                }
            }
        }
        Ok(())
    }
}

impl FunctionListing<'_> {
    fn render(&self, instr: &Instruction) -> String {
        let head = format!("{:04}  {}", instr.offset, instr.opcode.mnemonic());
        match instr.operand {
            Operand::None => head,
            Operand::Int(v) => format!("{} {}", head, v),
            Operand::Double(v) => format!("{} {:?}", head, v),
            Operand::Constant(idx) => format_constant(&head, idx, self.program.constants()),
            Operand::Slot(slot) => format!("{} {}", head, slot),
            Operand::ScopeSlot { scope, slot } => format!("{} {}:{}", head, scope, slot),
            Operand::Branch { offset, target } => {
                format!("{} {:+} -> {:04}", head, offset, target)
            }
            Operand::Function(id) => match self.program.function(id) {
                Some(callee) => format!("{} {} ({})", head, id, callee.name()),
                None => format!("{} {} (<unknown>)", head, id),
            },
        }
    }
}

fn format_constant(head: &str, idx: u16, pool: &ConstantPool) -> String {
    match pool.get(idx) {
        Some(s) => format!("{} @{} {:?}", head, idx, s),
        None => format!("{} @{} <invalid>", head, idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bytecode, Opcode};
    use crate::program::{ScopeDecl, Signature, SlotDecl};
    use crate::value::VarType;

    fn program(code: Bytecode, constants: Vec<String>) -> Program {
        let main = Function::new(
            0,
            "main",
            Signature::void(),
            vec![ScopeDecl::new(0, vec![SlotDecl::new("x", VarType::Int)])],
            code.into_bytes(),
        );
        Program::new(ConstantPool::from(constants), vec![main]).unwrap()
    }

    #[test]
    fn test_disassemble_branches_and_constants() {
        let mut code = Bytecode::new();
        code.iload(5).iload(5);
        let site = code.emit_forward(Opcode::IfICmpE);
        code.emit(Opcode::SLoad).emit_u16(0).emit(Opcode::SPrint);
        code.patch_branch(site).unwrap();
        code.emit(Opcode::StoreIVar0).emit(Opcode::Stop);

        let out = disassemble(&program(code, vec!["no".into()]));
        insta::assert_snapshot!(out, @r###"
        === Constants ===
        0: "no"

        === Function 0: main void () ===
        scope 0: int x
        0000  ILOAD 5
        0009  ILOAD 5
        0018  IFICMPE +6 -> 0025
        0021  SLOAD @0 "no"
        0024  SPRINT
        0025  STOREIVAR0
        0026  STOP
        "###);
    }

    #[test]
    fn test_disassemble_invalid_bytes() {
        let mut code = Bytecode::new();
        code.emit(Opcode::ILoad1).emit_u8(0xEE).emit(Opcode::Call).emit_u8(1);
        let out = disassemble(&program(code, vec![]));
        insta::assert_snapshot!(out, @r###"
        === Function 0: main void () ===
        scope 0: int x
        0000  ILOAD1
        0001  <invalid opcode: 0xee>
        0002  <instruction CALL is truncated (missing operand bytes)>
        "###);
    }
}
