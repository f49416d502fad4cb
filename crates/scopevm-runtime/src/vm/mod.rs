//! Stack-based virtual machine
//!
//! A single iterative dispatch loop runs over an explicit frame arena. Each
//! CALL pushes a frame and the loop simply continues in the callee; RETURN
//! pops it and the loop resumes the caller after its CALL. Host recursion is
//! never used, so frame-stack capacity is the only bound on call depth.

mod dispatch;
mod frame;
mod profiler;
mod stack;

pub use profiler::{ProfileSummary, Profiler};

use crate::bytecode::{branch_target, read_f64, read_i16, read_i64, read_u16, validate, Opcode};
use crate::error::{Fault, RuntimeError, Status};
use crate::output::{stdout_writer, OutputWriter};
use crate::program::{Function, FunctionId, Global, Program, ScopeId};
use crate::value::{StrHandle, Value, VarType};
use dispatch::decode_opcode;
use frame::{CallFrame, FrameStack};
use scopevm_config::vm::{DEFAULT_FRAME_STACK_CAPACITY, DEFAULT_OPERAND_STACK_CAPACITY};
use scopevm_config::VmConfig;
use stack::{as_double, as_int, as_string, coerce, OperandStack};
use std::io::Write;
use tracing::{debug, trace, warn};

/// What the loop does after an instruction
enum Flow {
    Continue,
    Halt,
}

/// Virtual machine state
///
/// Owns its operand stack, frame arena and slot storage; independent
/// instances share nothing. Not reentrant.
///
/// The operand stack and frame arena are allocated once at their
/// configured capacities. Slot storage holds the slot blocks of live
/// frames only, so its length is bounded by frame capacity times the
/// largest slot block in the program; it keeps its allocation across
/// executions.
pub struct VM {
    stack: OperandStack,
    frames: FrameStack,
    /// Scope slots of every live frame, addressed by `slot_base + offset`
    slots: Vec<Value>,
    /// Output writer for the print instructions (defaults to stdout)
    output: OutputWriter,
    /// Check value tags on every typed access
    strict_types: bool,
    /// Run the validator before executing
    verify: bool,
    profiler: Option<Profiler>,
}

impl VM {
    /// Create a VM with explicit operand-stack and frame-stack capacities
    pub fn new(operand_capacity: usize, frame_capacity: usize) -> Self {
        Self {
            stack: OperandStack::new(operand_capacity),
            frames: FrameStack::new(frame_capacity),
            slots: Vec::new(),
            output: stdout_writer(),
            strict_types: false,
            verify: false,
            profiler: None,
        }
    }

    /// Create a VM from the `[vm]` configuration section
    pub fn with_config(config: &VmConfig) -> Self {
        let mut vm = Self::new(config.operand_stack_capacity(), config.frame_stack_capacity());
        vm.strict_types = config.strict_types();
        vm.verify = config.verify();
        if config.profile() {
            vm.profiler = Some(Profiler::enabled());
        }
        vm
    }

    /// Redirect the print instructions
    pub fn set_output_writer(&mut self, writer: OutputWriter) {
        self.output = writer;
    }

    pub fn set_strict_types(&mut self, strict: bool) {
        self.strict_types = strict;
    }

    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    /// Start collecting execution counters (kept across runs)
    pub fn enable_profiling(&mut self) {
        self.profiler.get_or_insert_with(Profiler::enabled).enable();
    }

    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    /// Operand-stack depth (after a run: the depth it terminated with)
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Live frames (after a run: the frames alive when it terminated)
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Operand `distance` slots below the top of the stack
    pub fn peek_stack(&self, distance: usize) -> Option<&Value> {
        self.stack.peek(distance)
    }

    /// Run `program` to completion
    ///
    /// `globals` seed the global scope by name. Their values are replaced
    /// with the final values only when the status is Ok; on Error they are
    /// left untouched.
    pub fn execute(&mut self, program: &Program, globals: &mut [Global]) -> Status {
        debug!(
            operand_capacity = self.stack.capacity(),
            frame_capacity = self.frames.capacity(),
            functions = program.functions().len(),
            globals = globals.len(),
            "execute start"
        );

        let status = match self.run(program, globals) {
            Ok(()) => {
                self.write_back(program, globals);
                Status::Ok
            }
            Err(fault) => {
                warn!(
                    kind = %fault.error.kind(),
                    offset = ?fault.offset,
                    function = ?fault.function,
                    "execution halted: {}",
                    fault.error
                );
                fault.into()
            }
        };

        debug!(
            %status,
            stack_depth = self.stack.len(),
            frame_depth = self.frames.len(),
            "execute finished"
        );
        status
    }

    fn run(&mut self, program: &Program, globals: &[Global]) -> Result<(), Fault> {
        self.stack.clear();
        self.frames.clear();
        self.slots.clear();

        if self.verify {
            if let Err(errors) = validate(program) {
                debug!(errors = errors.len(), "verification failed");
                let first = &errors[0];
                return Err(Fault {
                    error: RuntimeError::Verification(first.kind.to_string()),
                    offset: Some(first.offset),
                    function: Some(first.function),
                });
            }
        }

        self.enter(program, 0, None).map_err(Fault::unlocated)?;
        self.bind_globals(program, globals)
            .map_err(Fault::unlocated)?;
        self.dispatch_loop(program)?;
        self.flush_output().map_err(Fault::unlocated)
    }

    /// Copy initial bindings into the top-level frame's global scope
    fn bind_globals(&mut self, program: &Program, globals: &[Global]) -> Result<(), RuntimeError> {
        for global in globals {
            let scope = program
                .global_scope()
                .ok_or_else(|| RuntimeError::NoGlobalScope(global.name.clone()))?;
            let pos = scope
                .slot_named(&global.name)
                .ok_or_else(|| RuntimeError::UnknownGlobal(global.name.clone()))?;
            let declared = scope.slots[pos].ty;
            let supplied = global.value.var_type();
            if declared != supplied {
                return Err(RuntimeError::GlobalTypeMismatch {
                    name: global.name.clone(),
                    declared,
                    supplied,
                });
            }
            // The global scope is the first scope of frame 0, so slot
            // positions are absolute.
            let slot = self
                .slots
                .get_mut(pos)
                .ok_or_else(|| RuntimeError::UnknownGlobal(global.name.clone()))?;
            *slot = global.value.clone();
        }
        Ok(())
    }

    fn write_back(&self, program: &Program, globals: &mut [Global]) {
        let Some(scope) = program.global_scope() else {
            return;
        };
        for global in globals.iter_mut() {
            let value = scope
                .slot_named(&global.name)
                .and_then(|pos| self.slots.get(pos));
            if let Some(value) = value {
                global.value = value.clone().detach(program.constants());
            }
        }
    }

    fn dispatch_loop(&mut self, program: &Program) -> Result<(), Fault> {
        loop {
            let Some(frame) = self.frames.top() else {
                return Ok(());
            };
            let (function_id, pc) = (frame.function, frame.pc);
            let function = program
                .function(function_id)
                .ok_or_else(|| Fault::at(RuntimeError::UnknownFunction(function_id), function_id, pc))?;

            let flow = if pc >= function.bytecode().len() {
                self.fall_off_end(program, function)
            } else {
                self.step(program, function, pc)
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(error) => return Err(Fault::at(error, function_id, pc)),
            }
        }
    }

    /// Execute the instruction at `pc` of the top frame
    fn step(&mut self, program: &Program, function: &Function, pc: usize) -> Result<Flow, RuntimeError> {
        let code = function.bytecode();
        let byte = code[pc];
        let opcode = decode_opcode(byte).ok_or(RuntimeError::UnknownOpcode(byte))?;
        let next = pc + opcode.width();
        if next > code.len() {
            return Err(truncated(opcode));
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_instruction(opcode, self.stack.len(), self.frames.len());
        }
        self.set_pc(next)?;

        let at = pc + 1;
        let strict = self.strict_types;
        match opcode {
            // ===== Literal loads =====
            Opcode::DLoad => {
                let value = read_f64(code, at).ok_or_else(|| truncated(opcode))?;
                self.stack.push(Value::Double(value))?;
            }
            Opcode::ILoad => {
                let value = read_i64(code, at).ok_or_else(|| truncated(opcode))?;
                self.stack.push(Value::Int(value))?;
            }
            Opcode::SLoad => {
                let index = operand_u16(code, at, opcode)?;
                if program.constants().get(index).is_none() {
                    return Err(RuntimeError::ConstantOutOfRange {
                        index,
                        pool_size: program.constants().len(),
                    });
                }
                self.stack.push(Value::Str(StrHandle::Constant(index)))?;
            }
            Opcode::DLoad0 => self.stack.push(Value::Double(0.0))?,
            Opcode::ILoad0 => self.stack.push(Value::Int(0))?,
            Opcode::SLoad0 => self.stack.push(Value::empty_string())?,
            Opcode::DLoad1 => self.stack.push(Value::Double(1.0))?,
            Opcode::ILoad1 => self.stack.push(Value::Int(1))?,
            Opcode::DLoadM1 => self.stack.push(Value::Double(-1.0))?,
            Opcode::ILoadM1 => self.stack.push(Value::Int(-1))?,

            // ===== Arithmetic =====
            Opcode::DAdd => self.binary_double(|a, b| a + b)?,
            Opcode::DSub => self.binary_double(|a, b| a - b)?,
            Opcode::DMul => self.binary_double(|a, b| a * b)?,
            Opcode::DDiv => self.binary_double(|a, b| a / b)?,
            Opcode::IAdd => self.binary_int(|a, b| Ok(a.wrapping_add(b)))?,
            Opcode::ISub => self.binary_int(|a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::IMul => self.binary_int(|a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::IDiv => self.binary_int(|a, b| {
                if b == 0 {
                    Err(RuntimeError::DivideByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Opcode::IMod => self.binary_int(|a, b| {
                if b == 0 {
                    Err(RuntimeError::ModuloByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Opcode::IAOr => self.binary_int(|a, b| Ok(a | b))?,
            Opcode::IAAnd => self.binary_int(|a, b| Ok(a & b))?,
            Opcode::IAXor => self.binary_int(|a, b| Ok(a ^ b))?,
            Opcode::DNeg => {
                let top = self.stack.top_mut()?;
                *top = Value::Double(-as_double(top, strict)?);
            }
            Opcode::INeg => {
                let top = self.stack.top_mut()?;
                *top = Value::Int(as_int(top, strict)?.wrapping_neg());
            }

            // ===== Output =====
            Opcode::IPrint => {
                let value = self.pop_int()?;
                self.write_output(&value.to_string())?;
            }
            Opcode::DPrint => {
                let value = self.pop_double()?;
                self.write_output(&value.to_string())?;
            }
            Opcode::SPrint => {
                let value = Value::Str(as_string(self.stack.pop()?)?);
                self.write_output(&value.render(program.constants()))?;
            }
            Opcode::Dump => {
                let value = self.stack.pop()?;
                let mut text = value.render(program.constants()).into_owned();
                text.push('\n');
                self.write_output(&text)?;
            }

            // ===== Conversion =====
            Opcode::I2D => {
                let top = self.stack.top_mut()?;
                *top = Value::Double(as_int(top, strict)? as f64);
            }
            Opcode::D2I => {
                let top = self.stack.top_mut()?;
                // `as` truncates toward zero and saturates; NaN becomes 0
                *top = Value::Int(as_double(top, strict)? as i64);
            }
            Opcode::S2I => {
                let value = Value::Str(as_string(self.stack.pop()?)?);
                let text = value.as_str(program.constants()).unwrap_or_default();
                let parsed = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| RuntimeError::InvalidConversion {
                        text: text.to_string(),
                    })?;
                self.stack.push(Value::Int(parsed))?;
            }

            // ===== Stack manipulation =====
            Opcode::Swap => self.stack.swap_top()?,
            Opcode::Pop => {
                self.stack.pop()?;
            }

            // ===== Variables =====
            Opcode::LoadDVar0
            | Opcode::LoadDVar1
            | Opcode::LoadDVar2
            | Opcode::LoadDVar3
            | Opcode::LoadIVar0
            | Opcode::LoadIVar1
            | Opcode::LoadIVar2
            | Opcode::LoadIVar3
            | Opcode::LoadSVar0
            | Opcode::LoadSVar1
            | Opcode::LoadSVar2
            | Opcode::LoadSVar3 => {
                let slot = opcode.fixed_slot().ok_or(RuntimeError::UnknownOpcode(byte))?;
                let location = self.local_slot(function, slot)?;
                self.load_slot(location, slot_type(opcode, byte)?)?;
            }
            Opcode::StoreDVar0
            | Opcode::StoreDVar1
            | Opcode::StoreDVar2
            | Opcode::StoreDVar3
            | Opcode::StoreIVar0
            | Opcode::StoreIVar1
            | Opcode::StoreIVar2
            | Opcode::StoreIVar3
            | Opcode::StoreSVar0
            | Opcode::StoreSVar1
            | Opcode::StoreSVar2
            | Opcode::StoreSVar3 => {
                let slot = opcode.fixed_slot().ok_or(RuntimeError::UnknownOpcode(byte))?;
                let location = self.local_slot(function, slot)?;
                self.store_slot(location, slot_type(opcode, byte)?)?;
            }
            Opcode::LoadDVar | Opcode::LoadIVar | Opcode::LoadSVar => {
                let slot = operand_u16(code, at, opcode)?;
                let location = self.local_slot(function, slot)?;
                self.load_slot(location, slot_type(opcode, byte)?)?;
            }
            Opcode::StoreDVar | Opcode::StoreIVar | Opcode::StoreSVar => {
                let slot = operand_u16(code, at, opcode)?;
                let location = self.local_slot(function, slot)?;
                self.store_slot(location, slot_type(opcode, byte)?)?;
            }
            Opcode::LoadCtxDVar | Opcode::LoadCtxIVar | Opcode::LoadCtxSVar => {
                let scope = operand_u16(code, at, opcode)?;
                let slot = operand_u16(code, at + 2, opcode)?;
                let location = self.context_slot(program, scope, slot)?;
                self.load_slot(location, slot_type(opcode, byte)?)?;
            }
            Opcode::StoreCtxDVar | Opcode::StoreCtxIVar | Opcode::StoreCtxSVar => {
                let scope = operand_u16(code, at, opcode)?;
                let slot = operand_u16(code, at + 2, opcode)?;
                let location = self.context_slot(program, scope, slot)?;
                self.store_slot(location, slot_type(opcode, byte)?)?;
            }

            // ===== Comparison =====
            Opcode::DCmp => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                let sign = a.partial_cmp(&b).map_or(0, |ord| ord as i64);
                self.stack.push(Value::Int(sign))?;
            }
            Opcode::ICmp => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.stack.push(Value::Int(a.cmp(&b) as i64))?;
            }

            // ===== Control flow =====
            Opcode::Ja => {
                let offset = read_i16(code, at).ok_or_else(|| truncated(opcode))?;
                self.jump(code.len(), at, offset)?;
            }
            Opcode::IfICmpNe
            | Opcode::IfICmpE
            | Opcode::IfICmpG
            | Opcode::IfICmpGe
            | Opcode::IfICmpL
            | Opcode::IfICmpLe => {
                let offset = read_i16(code, at).ok_or_else(|| truncated(opcode))?;
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                let taken = match opcode {
                    Opcode::IfICmpNe => a != b,
                    Opcode::IfICmpE => a == b,
                    Opcode::IfICmpG => a > b,
                    Opcode::IfICmpGe => a >= b,
                    Opcode::IfICmpL => a < b,
                    _ => a <= b,
                };
                if taken {
                    self.jump(code.len(), at, offset)?;
                }
            }

            // ===== Functions =====
            Opcode::Call => {
                let callee = operand_u16(code, at, opcode)?;
                let caller = self.frames.len().checked_sub(1);
                self.enter(program, callee, caller)?;
            }
            Opcode::Return => return self.leave(program),

            // ===== Special =====
            Opcode::Stop => return Ok(Flow::Halt),
            Opcode::Break => {
                trace!(function = function.name(), offset = pc, "breakpoint");
            }
        }
        Ok(Flow::Continue)
    }

    /// Push a frame for `function_id` and zero its scope slots
    fn enter(
        &mut self,
        program: &Program,
        function_id: FunctionId,
        caller: Option<usize>,
    ) -> Result<(), RuntimeError> {
        let function = program
            .function(function_id)
            .ok_or(RuntimeError::UnknownFunction(function_id))?;
        let static_link = self.frames.static_link_for(program, function, caller)?;
        let params = function.signature().params.len();
        let stack_base = self.stack.len();
        if stack_base < params {
            return Err(RuntimeError::StackUnderflow);
        }

        self.frames.push(CallFrame {
            function: function_id,
            pc: 0,
            caller,
            static_link,
            slot_base: self.slots.len(),
            stack_base,
        })?;
        self.slots.extend(function.slot_types().map(Value::zero));

        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_call(function_id);
        }
        trace!(
            function = function.name(),
            depth = self.frames.len(),
            "call"
        );
        Ok(())
    }

    /// Pop the current frame and resume its caller
    ///
    /// Returning from the top-level frame ends the program; its slots stay
    /// in place for the global write-back.
    fn leave(&mut self, program: &Program) -> Result<Flow, RuntimeError> {
        let frame = self.frames.top().ok_or(RuntimeError::StackUnderflow)?;
        if frame.caller.is_none() {
            return Ok(Flow::Halt);
        }
        let function = program
            .function(frame.function)
            .ok_or(RuntimeError::UnknownFunction(frame.function))?;
        let signature = function.signature();
        let expected = frame.stack_base - signature.params.len() + signature.return_arity();
        let actual = self.stack.len();
        if actual != expected {
            return Err(RuntimeError::ReturnImbalance {
                function: function.name().to_string(),
                expected,
                actual,
            });
        }

        let slot_base = frame.slot_base;
        self.frames.pop();
        self.slots.truncate(slot_base);
        trace!(
            function = function.name(),
            depth = self.frames.len(),
            "return"
        );
        Ok(Flow::Continue)
    }

    /// Control ran past the last instruction of the current function
    fn fall_off_end(&mut self, program: &Program, function: &Function) -> Result<Flow, RuntimeError> {
        let ret = function.signature().ret;
        if ret != VarType::Void {
            return Err(RuntimeError::MissingReturn {
                function: function.name().to_string(),
                ret,
            });
        }
        self.leave(program)
    }

    fn set_pc(&mut self, pc: usize) -> Result<(), RuntimeError> {
        self.frames
            .top_mut()
            .ok_or(RuntimeError::StackUnderflow)?
            .pc = pc;
        Ok(())
    }

    /// Branch relative to the operand at `operand_at`
    fn jump(&mut self, len: usize, operand_at: usize, offset: i16) -> Result<(), RuntimeError> {
        let target = branch_target(operand_at, offset);
        if target < 0 || target as usize > len {
            return Err(RuntimeError::BranchOutOfRange { target, len });
        }
        self.set_pc(target as usize)
    }

    fn local_slot(&self, function: &Function, slot: u16) -> Result<(usize, VarType), RuntimeError> {
        let local = function
            .local_scope()
            .ok_or_else(|| RuntimeError::NoLocalScope(function.name().to_string()))?;
        let (offset, ty) =
            function
                .slot_location(local.id, slot)
                .ok_or(RuntimeError::SlotOutOfRange {
                    scope: local.id,
                    slot,
                    len: local.slots.len(),
                })?;
        let base = self
            .frames
            .top()
            .ok_or(RuntimeError::StackUnderflow)?
            .slot_base;
        Ok((base + offset, ty))
    }

    fn context_slot(
        &self,
        program: &Program,
        scope: ScopeId,
        slot: u16,
    ) -> Result<(usize, VarType), RuntimeError> {
        let current = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or(RuntimeError::StackUnderflow)?;
        self.frames.resolve(program, current, scope, slot)
    }

    fn load_slot(&mut self, (index, declared): (usize, VarType), ty: VarType) -> Result<(), RuntimeError> {
        if self.strict_types && declared != ty {
            return Err(RuntimeError::TypeMismatch {
                expected: declared,
                found: ty,
            });
        }
        let value = self.slots.get(index).cloned().ok_or(RuntimeError::StackUnderflow)?;
        let value = coerce(value, ty, self.strict_types)?;
        self.stack.push(value)
    }

    fn store_slot(&mut self, (index, declared): (usize, VarType), ty: VarType) -> Result<(), RuntimeError> {
        if self.strict_types && declared != ty {
            return Err(RuntimeError::TypeMismatch {
                expected: declared,
                found: ty,
            });
        }
        let value = coerce(self.stack.pop()?, ty, self.strict_types)?;
        let slot = self.slots.get_mut(index).ok_or(RuntimeError::StackUnderflow)?;
        *slot = value;
        Ok(())
    }

    #[inline]
    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        let value = self.stack.pop()?;
        as_int(&value, self.strict_types)
    }

    #[inline]
    fn pop_double(&mut self) -> Result<f64, RuntimeError> {
        let value = self.stack.pop()?;
        as_double(&value, self.strict_types)
    }

    /// Pop b, pop a, push `op(a, b)`
    #[inline]
    fn binary_int(
        &mut self,
        op: impl FnOnce(i64, i64) -> Result<i64, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.stack.push(Value::Int(op(a, b)?))
    }

    #[inline]
    fn binary_double(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop_double()?;
        let a = self.pop_double()?;
        self.stack.push(Value::Double(op(a, b)))
    }

    fn write_output(&self, text: &str) -> Result<(), RuntimeError> {
        let mut writer = self
            .output
            .lock()
            .map_err(|_| RuntimeError::Output("output writer lock poisoned".to_string()))?;
        writer
            .write_all(text.as_bytes())
            .map_err(|e| RuntimeError::Output(e.to_string()))
    }

    fn flush_output(&self) -> Result<(), RuntimeError> {
        let mut writer = self
            .output
            .lock()
            .map_err(|_| RuntimeError::Output("output writer lock poisoned".to_string()))?;
        writer.flush().map_err(|e| RuntimeError::Output(e.to_string()))
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new(DEFAULT_OPERAND_STACK_CAPACITY, DEFAULT_FRAME_STACK_CAPACITY)
    }
}

fn truncated(opcode: Opcode) -> RuntimeError {
    RuntimeError::TruncatedInstruction {
        opcode: opcode.mnemonic(),
    }
}

#[inline]
fn operand_u16(code: &[u8], at: usize, opcode: Opcode) -> Result<u16, RuntimeError> {
    read_u16(code, at).ok_or_else(|| truncated(opcode))
}

#[inline]
fn slot_type(opcode: Opcode, byte: u8) -> Result<VarType, RuntimeError> {
    opcode.slot_type().ok_or(RuntimeError::UnknownOpcode(byte))
}
