// tantrums-vm - Shared test helpers
// Copyright (c) 2025 Tom Waddington. MIT licensed.

// Each integration test binary compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

use tantrums_parser::{Lexer, Parser};
use tantrums_vm::compiler::{compile, CompileMode, CompileOptions, CompileOutput};
use tantrums_vm::vm::InterpretResult;
use tantrums_vm::Vm;

/// Compile source text under the given mode, with auto-free notes kept (they
/// land in `diagnostics.notes`, not stdout).
pub fn compile_source(source: &str, mode: CompileMode) -> CompileOutput {
    compile_source_with(source, mode, false)
}

pub fn compile_source_with(source: &str, mode: CompileMode, allow_leaks: bool) -> CompileOutput {
    let tokens = Lexer::new(source).tokenize().expect("lexer error");
    let program = Parser::new(tokens).parse().expect("parse error");
    compile(
        &program,
        &CompileOptions {
            mode,
            autofree_default: true,
            allow_leaks,
            suppress_autofree_notes: false,
        },
    )
}

/// Outcome of compiling and executing a program.
pub struct RunResult {
    pub stdout: String,
    pub result: InterpretResult,
    /// Live heap objects after teardown; the registry invariant says zero.
    pub live_after_teardown: usize,
    pub leaks: usize,
    pub reaper_frees: usize,
    /// The compile-time auto-free note stream.
    pub notes: Vec<String>,
}

/// Compile and run in `both` mode, asserting the compile succeeded.
pub fn run_program(source: &str) -> RunResult {
    run_program_mode(source, CompileMode::Both)
}

pub fn run_program_mode(source: &str, mode: CompileMode) -> RunResult {
    let output = compile_source(source, mode);
    let script = match output.script {
        Some(script) => script,
        None => panic!("compile errors: {:?}", output.diagnostics.errors),
    };

    let (mut vm, captured) = Vm::with_captured_output();
    let result = vm.interpret(script);
    vm.finish(None);

    RunResult {
        stdout: captured.get(),
        result,
        live_after_teardown: vm.live_objects(),
        leaks: vm.report().total_leaks(),
        reaper_frees: vm.report().total_auto_frees(),
        notes: output.diagnostics.notes,
    }
}

/// Run and return stdout, asserting clean termination.
pub fn run_ok(source: &str) -> String {
    let run = run_program(source);
    assert_eq!(
        run.result,
        InterpretResult::Ok,
        "program failed; stdout so far: {:?}",
        run.stdout
    );
    run.stdout
}

/// Assert that compilation fails and return the first error's text.
pub fn compile_error(source: &str, mode: CompileMode) -> String {
    let output = compile_source(source, mode);
    assert!(
        output.script.is_none(),
        "expected a compile error, got none"
    );
    output
        .diagnostics
        .first_error()
        .expect("error recorded")
        .to_string()
}
