//! Binding initial globals and writing final values back

mod common;

use common::*;
use pretty_assertions::assert_eq;
use rstest::rstest;
use scopevm_runtime::{
    Bytecode, ErrorKind, Function, Global, Opcode, Program, Signature, Status, StrHandle, Value,
    VarType,
};

fn ledger_program(tail: &[Opcode]) -> Program {
    let mut code = Bytecode::new();
    code.emit(Opcode::LoadIVar0).emit(Opcode::ILoad1).emit(Opcode::IAdd);
    code.emit(Opcode::StoreIVar0);
    code.emit(Opcode::SLoad).emit_u16(0).emit(Opcode::StoreSVar1);
    code.emit(Opcode::LoadDVar2).dload(2.0).emit(Opcode::DMul);
    code.emit(Opcode::StoreDVar2);
    for op in tail {
        code.emit(*op);
    }
    program(
        &["new"],
        vec![main_fn(
            code,
            &[
                ("count", VarType::Int),
                ("name", VarType::String),
                ("ratio", VarType::Double),
            ],
        )],
    )
}

fn ledger_globals() -> Vec<Global> {
    vec![
        Global::new("count", 41_i64),
        Global::new("name", "old"),
        Global::new("ratio", 1.25),
    ]
}

#[rstest]
#[case(&[Opcode::Stop])]
#[case(&[Opcode::Return])]
#[case(&[])]
fn test_final_values_written_back(#[case] tail: &[Opcode]) {
    let program = ledger_program(tail);
    let mut globals = ledger_globals();
    let (status, _) = run_with_globals(&program, &mut globals);

    assert_eq!(status, Status::Ok);
    assert_eq!(
        globals,
        vec![
            Global::new("count", 42_i64),
            Global::new("name", "new"),
            Global::new("ratio", 2.5),
        ]
    );
}

#[test]
fn test_written_back_strings_are_owned() {
    let program = ledger_program(&[]);
    let mut globals = ledger_globals();
    run_with_globals(&program, &mut globals);
    assert!(matches!(globals[1].value, Value::Str(StrHandle::Owned(_))));
    drop(program);
    assert_eq!(globals[1].value, Value::string("new"));
}

#[test]
fn test_globals_untouched_on_error() {
    let program = ledger_program(&[Opcode::ILoad1, Opcode::ILoad0, Opcode::IDiv]);
    let mut globals = ledger_globals();
    let (status, _) = run_with_globals(&program, &mut globals);

    assert_eq!(status.kind(), Some(ErrorKind::ArithmeticFault));
    assert_eq!(globals, ledger_globals());
}

#[test]
fn test_only_supplied_globals_are_written() {
    let program = ledger_program(&[]);
    let mut globals = vec![Global::new("ratio", 4.0)];
    let (status, _) = run_with_globals(&program, &mut globals);
    assert!(status.is_ok());
    assert_eq!(globals, vec![Global::new("ratio", 8.0)]);
}

#[test]
fn test_unsupplied_globals_start_zeroed() {
    let mut code = Bytecode::new();
    code.emit(Opcode::LoadIVar0).emit(Opcode::IPrint);
    code.emit(Opcode::LoadSVar1).emit(Opcode::SPrint);
    let program = program(
        &[],
        vec![main_fn(code, &[("n", VarType::Int), ("s", VarType::String)])],
    );
    let mut globals = vec![Global::new("s", "seeded")];
    let (status, output) = run_with_globals(&program, &mut globals);
    assert!(status.is_ok());
    assert_eq!(output, "0seeded");
}

#[test]
fn test_nested_call_updates_global() {
    let mut bump = Bytecode::new();
    bump.emit(Opcode::LoadCtxIVar).emit_u16(0).emit_u16(0);
    bump.iload(100).emit(Opcode::IAdd);
    bump.emit(Opcode::StoreCtxIVar).emit_u16(0).emit_u16(0);
    bump.emit(Opcode::Stop);
    let mut main = Bytecode::new();
    main.emit(Opcode::Call).emit_u16(1).emit(Opcode::Call).emit_u16(1);

    let bump = Function::new(1, "bump", Signature::void(), vec![], bump.into_bytes());
    let program = program(&[], vec![main_fn(main, &[("total", VarType::Int)]), bump]);
    let mut globals = vec![Global::new("total", 1_i64)];
    let (status, _) = run_with_globals(&program, &mut globals);

    assert_eq!(status, Status::Ok);
    assert_eq!(globals[0].value, Value::Int(101));
}

// ============================================================================
// Invalid bindings
// ============================================================================

#[test]
fn test_unknown_global_name() {
    let program = ledger_program(&[]);
    let mut globals = vec![Global::new("missing", 1_i64)];
    let (status, output) = run_with_globals(&program, &mut globals);

    assert_eq!(status.kind(), Some(ErrorKind::InvalidBinding));
    assert_eq!(status.offset(), None);
    assert_eq!(output, "");
    assert_eq!(globals, vec![Global::new("missing", 1_i64)]);
}

#[rstest]
#[case(Global::new("count", 1.0))]
#[case(Global::new("count", "1"))]
#[case(Global::new("ratio", 1_i64))]
fn test_global_type_mismatch(#[case] global: Global) {
    let program = ledger_program(&[]);
    let mut globals = vec![global.clone()];
    let (status, _) = run_with_globals(&program, &mut globals);
    assert_eq!(status.kind(), Some(ErrorKind::InvalidBinding));
    assert_eq!(globals, vec![global]);
}

#[test]
fn test_no_global_scope() {
    let mut code = Bytecode::new();
    code.emit(Opcode::Stop);
    let main = Function::new(0, "main", Signature::void(), vec![], code.into_bytes());
    let program = program(&[], vec![main]);

    let (status, _) = run_with_globals(&program, &mut [Global::new("x", 1_i64)]);
    assert_eq!(status.kind(), Some(ErrorKind::InvalidBinding));

    let (status, _) = run_with_globals(&program, &mut []);
    assert_eq!(status, Status::Ok);
}

#[test]
fn test_bind_failure_message_names_global() {
    let program = ledger_program(&[]);
    let (status, _) = run_with_globals(&program, &mut [Global::new("count", "x")]);
    let message = status.message().unwrap();
    assert!(message.contains("count"), "message: {}", message);
}
