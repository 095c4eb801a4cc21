// tantrums-vm - Bytecode file round-trip tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::compile_source;
use tantrums_vm::bytecode;
use tantrums_vm::compiler::CompileMode;
use tantrums_vm::vm::InterpretResult;
use tantrums_vm::Vm;

const PROGRAM: &str = "tantrum int add(int a, int b) { return a + b; } \
     tantrum main() { \
       total = 0; \
       for i in range(4) { total = add(total, i); } \
       try { print(total); } catch (e) { print(e); } \
       int* p = alloc int(99); \
       print(*p); \
     }";

fn compile_to_function(source: &str) -> tantrums_core::object::Function {
    compile_source(source, CompileMode::Both)
        .script
        .expect("compile error")
}

#[test]
fn serialised_script_runs_identically() {
    let script = compile_to_function(PROGRAM);

    let (mut vm, direct_out) = Vm::with_captured_output();
    assert_eq!(vm.interpret(script), InterpretResult::Ok);

    let reloaded = bytecode::from_bytes(&bytecode::to_bytes(&compile_to_function(PROGRAM)))
        .expect("round-trip failed");
    let (mut vm2, loaded_out) = Vm::with_captured_output();
    assert_eq!(vm2.interpret(reloaded), InterpretResult::Ok);

    assert_eq!(direct_out.get(), loaded_out.get());
    assert_eq!(direct_out.get(), "6\n99\n");
}

#[test]
fn roundtrip_preserves_code_and_lines() {
    let script = compile_to_function(PROGRAM);
    let loaded = bytecode::from_bytes(&bytecode::to_bytes(&script)).expect("round-trip failed");
    assert_eq!(script.arity, loaded.arity);
    assert_eq!(script.name, loaded.name);
    assert_eq!(script.chunk.code, loaded.chunk.code);
    assert_eq!(script.chunk.lines, loaded.chunk.lines);
    assert_eq!(script.chunk.constants.len(), loaded.chunk.constants.len());
}

#[test]
fn compilation_is_deterministic() {
    // compile(program, mode) is a pure function of its inputs: the emitted
    // bytes must be identical across runs.
    let a = bytecode::to_bytes(&compile_to_function(PROGRAM));
    let b = bytecode::to_bytes(&compile_to_function(PROGRAM));
    assert_eq!(a, b);
}

#[test]
fn deterministic_across_modes_means_same_mode_only() {
    let both = bytecode::to_bytes(&compile_to_function("tantrum main() { x = 1; print(x); }"));
    let both_again =
        bytecode::to_bytes(&compile_to_function("tantrum main() { x = 1; print(x); }"));
    assert_eq!(both, both_again);
}

#[test]
fn save_and_load_through_the_filesystem() {
    let script = compile_to_function("tantrum main() { print(\"persisted\"); }");
    let dir = std::env::temp_dir().join("tantrums-bytecode-test");
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("prog.42ass");

    bytecode::save(&path, &script).expect("save failed");
    let loaded = bytecode::load(&path).expect("load failed");

    let (mut vm, captured) = Vm::with_captured_output();
    assert_eq!(vm.interpret(loaded), InterpretResult::Ok);
    assert_eq!(captured.get(), "persisted\n");

    std::fs::remove_file(&path).ok();
}

#[test]
fn load_rejects_garbage() {
    assert!(bytecode::from_bytes(b"not bytecode at all").is_err());
    assert!(bytecode::from_bytes(b"").is_err());
}
