//! Bytecode validator: static analysis before VM execution
//!
//! Per function, performs these checks:
//! 1. **Decode pass**: every byte is a known opcode with enough operand bytes
//! 2. **Branch targets**: destinations are within `[0, len]` and land on an
//!    instruction boundary (or exactly at the end of the stream)
//! 3. **References**: constants, callees, scopes and slots exist, scopes are
//!    reachable through the static parent chain, and typed slot access
//!    matches the slot's declared type
//! 4. **Stack depth**: linear walk detects obvious operand-stack underflow
//! 5. **Return**: non-void functions do not end by falling off the stream
//!
//! The validator is advisory. The VM runs it only when verification is
//! enabled; the dispatch loop checks what it needs regardless.

use super::{decode_all, Instruction, Opcode, Operand};
use crate::error::RuntimeError;
use crate::program::{Function, FunctionId, Program, ScopeId};
use crate::value::VarType;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A validation error located by function and byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub function: FunctionId,
    /// Byte offset in the function's stream where the error was detected
    pub offset: usize,
    pub kind: ValidationErrorKind,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function {} offset {:04}: {}",
            self.function, self.offset, self.kind
        )
    }
}

/// Kinds of errors the validator can detect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    UnknownOpcode(u8),
    TruncatedInstruction { opcode: &'static str },
    BranchOutOfBounds { target: isize, len: usize },
    BranchMisaligned { target: usize },
    ConstantOutOfBounds { index: u16, pool_size: usize },
    UnknownFunction(FunctionId),
    /// A local-scope variable opcode in a function without scopes
    NoLocalScope,
    UnreachableScope { scope: ScopeId },
    SlotOutOfBounds { scope: ScopeId, slot: u16, len: usize },
    SlotTypeMismatch {
        scope: ScopeId,
        slot: u16,
        declared: VarType,
        accessed: VarType,
    },
    StackUnderflow { op: &'static str, depth_before: i32 },
    /// A non-void function can reach the end of its stream
    MissingReturn,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode(b) => write!(f, "unknown opcode {:#04x}", b),
            Self::TruncatedInstruction { opcode } => {
                write!(f, "instruction {} is truncated (missing operand bytes)", opcode)
            }
            Self::BranchOutOfBounds { target, len } => {
                write!(f, "branch target {} is out of bounds (len={})", target, len)
            }
            Self::BranchMisaligned { target } => {
                write!(f, "branch target {} does not align to an instruction", target)
            }
            Self::ConstantOutOfBounds { index, pool_size } => {
                write!(f, "constant index {} out of bounds (pool size={})", index, pool_size)
            }
            Self::UnknownFunction(id) => write!(f, "call to unknown function {}", id),
            Self::NoLocalScope => write!(f, "local variable access without a local scope"),
            Self::UnreachableScope { scope } => write!(f, "scope {} is not reachable", scope),
            Self::SlotOutOfBounds { scope, slot, len } => {
                write!(f, "slot {} out of bounds for scope {} ({} slots)", slot, scope, len)
            }
            Self::SlotTypeMismatch {
                scope,
                slot,
                declared,
                accessed,
            } => write!(
                f,
                "slot {}:{} declared {} but accessed as {}",
                scope, slot, declared, accessed
            ),
            Self::StackUnderflow { op, depth_before } => {
                write!(f, "stack underflow in {}: depth before = {}", op, depth_before)
            }
            Self::MissingReturn => write!(f, "non-void function can fall off its end"),
        }
    }
}

/// Validate every function of `program`, collecting all errors found
///
/// Does NOT short-circuit on the first error.
pub fn validate(program: &Program) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    for function in program.functions() {
        FunctionValidator {
            program,
            function,
            errors: &mut errors,
        }
        .run();
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct FunctionValidator<'a> {
    program: &'a Program,
    function: &'a Function,
    errors: &'a mut Vec<ValidationError>,
}

impl<'a> FunctionValidator<'a> {
    fn report(&mut self, offset: usize, kind: ValidationErrorKind) {
        self.errors.push(ValidationError {
            function: self.function.id(),
            offset,
            kind,
        });
    }

    fn run(&mut self) {
        let decoded = self.decode();
        let boundaries: HashSet<usize> = decoded.iter().map(|i| i.offset).collect();
        self.check_branches(&decoded, &boundaries);
        self.check_references(&decoded);
        self.check_stack_depth(&decoded);
        self.check_return(&decoded);
    }

    // Pass 1: decode
    fn decode(&mut self) -> Vec<Instruction> {
        let mut decoded = Vec::new();
        for item in decode_all(self.function.bytecode()) {
            match item {
                Ok(instr) => decoded.push(instr),
                Err((offset, RuntimeError::UnknownOpcode(byte))) => {
                    self.report(offset, ValidationErrorKind::UnknownOpcode(byte))
                }
                Err((offset, RuntimeError::TruncatedInstruction { opcode })) => {
                    self.report(offset, ValidationErrorKind::TruncatedInstruction { opcode })
                }
                Err(_) => {}
            }
        }
        decoded
    }

    // Pass 2: branch targets
    fn check_branches(&mut self, decoded: &[Instruction], boundaries: &HashSet<usize>) {
        let len = self.function.bytecode().len();
        for instr in decoded {
            let Operand::Branch { target, .. } = instr.operand else {
                continue;
            };
            if target < 0 || target as usize > len {
                self.report(
                    instr.offset,
                    ValidationErrorKind::BranchOutOfBounds { target, len },
                );
                continue;
            }
            let target = target as usize;
            if target != len && !boundaries.contains(&target) {
                self.report(instr.offset, ValidationErrorKind::BranchMisaligned { target });
            }
        }
    }

    // Pass 3: constant, function, scope and slot references
    fn check_references(&mut self, decoded: &[Instruction]) {
        for instr in decoded {
            match instr.operand {
                Operand::Constant(index) => {
                    let pool_size = self.program.constants().len();
                    if index as usize >= pool_size {
                        self.report(
                            instr.offset,
                            ValidationErrorKind::ConstantOutOfBounds { index, pool_size },
                        );
                    }
                }
                Operand::Function(id) => {
                    if self.program.function(id).is_none() {
                        self.report(instr.offset, ValidationErrorKind::UnknownFunction(id));
                    }
                }
                Operand::ScopeSlot { scope, slot } => {
                    self.check_slot(instr, Some(scope), slot);
                }
                Operand::Slot(slot) => self.check_slot(instr, None, slot),
                Operand::None => {
                    if let Some(slot) = instr.opcode.fixed_slot() {
                        self.check_slot(instr, None, slot);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_slot(&mut self, instr: &Instruction, scope: Option<ScopeId>, slot: u16) {
        let function = self.function;
        let (owner, scope) = match scope {
            None => match function.local_scope() {
                Some(local) => (function, local.id),
                None => {
                    self.report(instr.offset, ValidationErrorKind::NoLocalScope);
                    return;
                }
            },
            Some(scope) => match self.static_owner(scope) {
                Some(owner) => (owner, scope),
                None => {
                    self.report(instr.offset, ValidationErrorKind::UnreachableScope { scope });
                    return;
                }
            },
        };
        let Some(idx) = owner.scope_index(scope) else {
            return;
        };
        let slots = &owner.scopes()[idx].slots;
        let Some(decl) = slots.get(slot as usize) else {
            self.report(
                instr.offset,
                ValidationErrorKind::SlotOutOfBounds {
                    scope,
                    slot,
                    len: slots.len(),
                },
            );
            return;
        };
        if let Some(accessed) = instr.opcode.slot_type() {
            if accessed != decl.ty {
                self.report(
                    instr.offset,
                    ValidationErrorKind::SlotTypeMismatch {
                        scope,
                        slot,
                        declared: decl.ty,
                        accessed,
                    },
                );
            }
        }
    }

    /// Function along the static parent chain that declares `scope`
    fn static_owner(&self, scope: ScopeId) -> Option<&'a Function> {
        let program = self.program;
        let mut current = Some(self.function);
        let mut hops = 0;
        while let Some(function) = current {
            if function.scope_index(scope).is_some() {
                return Some(function);
            }
            if function.id() == 0 || hops > program.functions().len() {
                return None;
            }
            hops += 1;
            current = program.function(function.parent().unwrap_or(0));
        }
        None
    }

    // Pass 4: stack depth
    fn check_stack_depth(&mut self, decoded: &[Instruction]) {
        let params = self.function.signature().params.len() as i32;
        let mut depth = Some(params);
        let mut at_target: HashMap<usize, i32> = HashMap::new();

        for instr in decoded {
            if depth.is_none() {
                depth = at_target.get(&instr.offset).copied();
            }
            let Some(current) = depth else {
                continue;
            };
            let Some((pops, pushes)) = stack_effect(self.program, instr) else {
                depth = None;
                continue;
            };
            if current < pops {
                self.report(
                    instr.offset,
                    ValidationErrorKind::StackUnderflow {
                        op: instr.opcode.mnemonic(),
                        depth_before: current,
                    },
                );
                depth = Some(pushes);
            } else {
                depth = Some(current - pops + pushes);
            }
            if let (Operand::Branch { target, .. }, Some(after)) = (instr.operand, depth) {
                if target > instr.offset as isize {
                    at_target.entry(target as usize).or_insert(after);
                }
            }
            if matches!(instr.opcode, Opcode::Ja | Opcode::Stop) {
                depth = None;
            }
        }
    }

    // Pass 5: non-void functions must not fall off the end
    fn check_return(&mut self, decoded: &[Instruction]) {
        if self.function.signature().ret == VarType::Void {
            return;
        }
        let terminal = decoded
            .last()
            .map(|i| matches!(i.opcode, Opcode::Return | Opcode::Stop | Opcode::Ja));
        if terminal != Some(true) {
            let offset = decoded.last().map_or(0, |i| i.offset);
            self.report(offset, ValidationErrorKind::MissingReturn);
        }
    }
}

/// `(pops, pushes)` of one instruction
///
/// Returns `None` where the linear walk cannot continue (`RETURN`, or a
/// call to a function that does not exist).
fn stack_effect(program: &Program, instr: &Instruction) -> Option<(i32, i32)> {
    use Opcode::*;
    let effect = match instr.opcode {
        DLoad | ILoad | SLoad | DLoad0 | ILoad0 | SLoad0 | DLoad1 | ILoad1 | DLoadM1 | ILoadM1 => {
            (0, 1)
        }
        DAdd | IAdd | DSub | ISub | DMul | IMul | DDiv | IDiv | IMod | IAOr | IAAnd | IAXor
        | DCmp | ICmp => (2, 1),
        DNeg | INeg | I2D | D2I | S2I => (1, 1),
        IPrint | DPrint | SPrint | Pop | Dump => (1, 0),
        Swap => (2, 2),
        LoadDVar0 | LoadDVar1 | LoadDVar2 | LoadDVar3 | LoadIVar0 | LoadIVar1 | LoadIVar2
        | LoadIVar3 | LoadSVar0 | LoadSVar1 | LoadSVar2 | LoadSVar3 | LoadDVar | LoadIVar
        | LoadSVar | LoadCtxDVar | LoadCtxIVar | LoadCtxSVar => (0, 1),
        StoreDVar0 | StoreDVar1 | StoreDVar2 | StoreDVar3 | StoreIVar0 | StoreIVar1
        | StoreIVar2 | StoreIVar3 | StoreSVar0 | StoreSVar1 | StoreSVar2 | StoreSVar3
        | StoreDVar | StoreIVar | StoreSVar | StoreCtxDVar | StoreCtxIVar | StoreCtxSVar => (1, 0),
        IfICmpNe | IfICmpE | IfICmpG | IfICmpGe | IfICmpL | IfICmpLe => (2, 0),
        Ja | Stop | Break => (0, 0),
        Call => {
            let Operand::Function(id) = instr.operand else {
                return None;
            };
            let signature = program.function(id)?.signature();
            (
                signature.params.len() as i32,
                signature.return_arity() as i32,
            )
        }
        Return => return None,
    };
    Some(effect)
}
