//! VM Performance Benchmarks
//!
//! Dispatch-loop throughput over hand-assembled programs:
//! - Counting loops with local slot traffic
//! - Mixed integer and double arithmetic
//! - Recursive calls (frame push/pop)
//! - Context-chain variable access
//!
//! Run with: cargo bench --bench vm_performance_benches

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scopevm_runtime::output::sink_writer;
use scopevm_runtime::{
    Bytecode, ConstantPool, Function, Opcode, Program, ScopeDecl, Signature, SlotDecl, VarType, VM,
};

fn vm_run(program: &Program) {
    let mut vm = VM::default();
    vm.set_output_writer(sink_writer());
    let status = vm.execute(program, &mut []);
    assert!(status.is_ok(), "{}", status);
}

fn int_scope(id: u16, names: &[&str]) -> ScopeDecl {
    ScopeDecl::new(
        id,
        names.iter().map(|n| SlotDecl::new(*n, VarType::Int)).collect(),
    )
}

fn assemble(functions: Vec<Function>) -> Program {
    Program::new(ConstantPool::new(), functions).unwrap()
}

/// sum = 0; i = n; while i > 0 { sum += i; i -= 1 }; print sum
fn counting_loop(n: i64) -> Program {
    let mut code = Bytecode::new();
    code.iload(n).emit(Opcode::StoreIVar1);
    let top = code.current_offset();
    code.emit(Opcode::LoadIVar0).emit(Opcode::LoadIVar1).emit(Opcode::IAdd);
    code.emit(Opcode::StoreIVar0);
    code.emit(Opcode::LoadIVar1).emit(Opcode::ILoad1).emit(Opcode::ISub);
    code.emit(Opcode::StoreIVar1);
    code.emit(Opcode::LoadIVar1).emit(Opcode::ILoad0);
    code.emit_branch(Opcode::IfICmpG, top).unwrap();
    code.emit(Opcode::LoadIVar0).emit(Opcode::IPrint).emit(Opcode::Stop);
    let main = Function::new(
        0,
        "main",
        Signature::void(),
        vec![int_scope(0, &["sum", "i"])],
        code.into_bytes(),
    );
    assemble(vec![main])
}

/// Loop body mixing int and double arithmetic with conversions
fn mixed_arithmetic(n: i64) -> Program {
    let mut code = Bytecode::new();
    code.iload(n).emit(Opcode::StoreIVar0);
    let top = code.current_offset();
    code.emit(Opcode::LoadDVar1).emit(Opcode::LoadIVar0).emit(Opcode::I2D);
    code.dload(1.5).emit(Opcode::DMul).emit(Opcode::DAdd).emit(Opcode::StoreDVar1);
    code.emit(Opcode::LoadIVar0).iload(3).emit(Opcode::IMod).emit(Opcode::Pop);
    code.emit(Opcode::LoadIVar0).emit(Opcode::ILoad1).emit(Opcode::ISub);
    code.emit(Opcode::StoreIVar0);
    code.emit(Opcode::LoadIVar0).emit(Opcode::ILoad0);
    code.emit_branch(Opcode::IfICmpG, top).unwrap();
    code.emit(Opcode::LoadDVar1).emit(Opcode::D2I).emit(Opcode::IPrint);
    let main = Function::new(
        0,
        "main",
        Signature::void(),
        vec![ScopeDecl::new(
            0,
            vec![
                SlotDecl::new("i", VarType::Int),
                SlotDecl::new("acc", VarType::Double),
            ],
        )],
        code.into_bytes(),
    );
    assemble(vec![main])
}

/// fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2)
fn recursive_fib(n: i64) -> Program {
    let mut fib = Bytecode::new();
    fib.emit(Opcode::StoreIVar0);
    fib.emit(Opcode::LoadIVar0).iload(2);
    let recurse = fib.emit_forward(Opcode::IfICmpGe);
    fib.emit(Opcode::LoadIVar0).emit(Opcode::Return);
    fib.patch_branch(recurse).unwrap();
    fib.emit(Opcode::LoadIVar0).emit(Opcode::ILoad1).emit(Opcode::ISub);
    fib.emit(Opcode::Call).emit_u16(1);
    fib.emit(Opcode::LoadIVar0).iload(2).emit(Opcode::ISub);
    fib.emit(Opcode::Call).emit_u16(1);
    fib.emit(Opcode::IAdd).emit(Opcode::Return);

    let mut main = Bytecode::new();
    main.iload(n).emit(Opcode::Call).emit_u16(1).emit(Opcode::IPrint);

    assemble(vec![
        Function::new(0, "main", Signature::void(), vec![], main.into_bytes()),
        Function::new(
            1,
            "fib",
            Signature::new(VarType::Int, vec![(VarType::Int, "n".to_string())]),
            vec![int_scope(1, &["n"])],
            fib.into_bytes(),
        ),
    ])
}

/// Loop in a nested function updating a counter two scopes out
fn context_chain(n: i64) -> Program {
    let mut inner = Bytecode::new();
    inner.iload(n).emit(Opcode::StoreIVar0);
    let top = inner.current_offset();
    inner.emit(Opcode::LoadCtxIVar).emit_u16(0).emit_u16(0);
    inner.emit(Opcode::ILoad1).emit(Opcode::IAdd);
    inner.emit(Opcode::StoreCtxIVar).emit_u16(0).emit_u16(0);
    inner.emit(Opcode::LoadIVar0).emit(Opcode::ILoad1).emit(Opcode::ISub);
    inner.emit(Opcode::StoreIVar0);
    inner.emit(Opcode::LoadIVar0).emit(Opcode::ILoad0);
    inner.emit_branch(Opcode::IfICmpG, top).unwrap();
    inner.emit(Opcode::Return);

    let mut outer = Bytecode::new();
    outer.emit(Opcode::Call).emit_u16(2).emit(Opcode::Return);

    let mut main = Bytecode::new();
    main.emit(Opcode::Call).emit_u16(1).emit(Opcode::LoadIVar0).emit(Opcode::IPrint);

    assemble(vec![
        Function::new(0, "main", Signature::void(), vec![int_scope(0, &["count"])], main.into_bytes()),
        Function::new(1, "outer", Signature::void(), vec![], outer.into_bytes()),
        Function::new(2, "inner", Signature::void(), vec![int_scope(2, &["i"])], inner.into_bytes())
            .with_parent(1),
    ])
}

// ============================================================================
// Loop Benchmarks
// ============================================================================

fn bench_loop_counting(c: &mut Criterion) {
    let program = counting_loop(1000);
    c.bench_function("vm_loop_counting_1000", |b| {
        b.iter(|| vm_run(black_box(&program)));
    });
}

fn bench_loop_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("vm_loop_scaling");
    for size in [100, 1000, 5000, 10000] {
        let program = counting_loop(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &program, |b, program| {
            b.iter(|| vm_run(black_box(program)));
        });
    }
    group.finish();
}

// ============================================================================
// Arithmetic Benchmarks
// ============================================================================

fn bench_arithmetic_mixed(c: &mut Criterion) {
    let program = mixed_arithmetic(1000);
    c.bench_function("vm_arithmetic_mixed_1000", |b| {
        b.iter(|| vm_run(black_box(&program)));
    });
}

// ============================================================================
// Function Call Benchmarks
// ============================================================================

fn bench_function_recursive(c: &mut Criterion) {
    let program = recursive_fib(20);
    c.bench_function("vm_function_recursive_fib_20", |b| {
        b.iter(|| vm_run(black_box(&program)));
    });
}

fn bench_context_chain(c: &mut Criterion) {
    let program = context_chain(1000);
    c.bench_function("vm_context_chain_1000", |b| {
        b.iter(|| vm_run(black_box(&program)));
    });
}

criterion_group!(loop_benches, bench_loop_counting, bench_loop_scaling,);
criterion_group!(arithmetic_benches, bench_arithmetic_mixed,);
criterion_group!(function_benches, bench_function_recursive, bench_context_chain,);

criterion_main!(loop_benches, arithmetic_benches, function_benches);
