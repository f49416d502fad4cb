//! Shared test utilities
//!
//! Builders for small programs and a VM wired to an in-memory output
//! buffer.

#![allow(dead_code)]

use scopevm_runtime::{
    Bytecode, ConstantPool, Function, Global, Program, ScopeDecl, Signature, SlotDecl, Status,
    VarType, VM,
};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Output buffer shared between a test and the VM's writer
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that always fails
pub struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// VM with small default capacities writing into a fresh capture
pub fn capturing_vm(operands: usize, frames: usize) -> (VM, Capture) {
    let mut vm = VM::new(operands, frames);
    let capture = Capture::default();
    vm.set_output_writer(Arc::new(Mutex::new(Box::new(capture.clone()))));
    (vm, capture)
}

pub fn scope(id: u16, slots: &[(&str, VarType)]) -> ScopeDecl {
    ScopeDecl::new(
        id,
        slots
            .iter()
            .map(|(name, ty)| SlotDecl::new(*name, *ty))
            .collect(),
    )
}

/// Void top-level function with one global scope
pub fn main_fn(code: Bytecode, globals: &[(&str, VarType)]) -> Function {
    Function::new(0, "main", Signature::void(), vec![scope(0, globals)], code.into_bytes())
}

pub fn program(constants: &[&str], functions: Vec<Function>) -> Program {
    let pool = ConstantPool::from(constants.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    Program::new(pool, functions).unwrap()
}

/// Program consisting only of `main` with no globals
pub fn single(code: Bytecode) -> Program {
    program(&[], vec![main_fn(code, &[])])
}

/// Run with default test capacities; returns status and output
pub fn run(program: &Program) -> (Status, String) {
    run_with_globals(program, &mut [])
}

pub fn run_with_globals(program: &Program, globals: &mut [Global]) -> (Status, String) {
    let (mut vm, capture) = capturing_vm(256, 64);
    let status = vm.execute(program, globals);
    (status, capture.text())
}
