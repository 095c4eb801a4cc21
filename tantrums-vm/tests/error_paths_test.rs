// tantrums-vm - Error path tests: compile diagnostics and runtime errors
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::{compile_error, compile_source, run_ok, run_program};
use tantrums_vm::compiler::CompileMode;
use tantrums_vm::vm::InterpretResult;

// =============================================================================
// Runtime errors routed through try/catch
// =============================================================================

#[test]
fn division_by_zero_is_catchable() {
    let out = run_ok(
        "tantrum main() { a = 0; try { print(1 / a); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "Division by zero.\n");
}

#[test]
fn modulo_by_zero_raises() {
    let out = run_ok(
        "tantrum main() { a = 0; try { print(1 % a); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "Modulo by zero.\n");
}

#[test]
fn fractional_modulo_raises() {
    let out = run_ok(
        "tantrum main() { a = 2.5; try { print(a % 2.0); } catch (e) { print(\"caught\"); } }",
    );
    assert_eq!(out, "caught\n");
}

#[test]
fn whole_float_modulo_is_fine() {
    assert_eq!(run_ok("tantrum main() { print(7.0 % 4.0); }"), "3\n");
}

#[test]
fn undefined_variable_is_catchable() {
    let out = run_ok(
        "tantrum main() { try { print(missing); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "Undefined variable 'missing'.\n");
}

#[test]
fn non_boolean_condition_raises() {
    let out = run_ok("tantrum main() { try { if (1) { print(\"yes\"); } } catch (e) { print(\"caught\"); } }");
    assert_eq!(out, "caught\n");
}

#[test]
fn non_boolean_not_raises() {
    let out = run_ok("tantrum main() { try { print(!1); } catch (e) { print(\"caught\"); } }");
    assert_eq!(out, "caught\n");
}

#[test]
fn arity_mismatch_raises() {
    let out = run_ok(
        "tantrum int id(int x) { return x; } \
         tantrum main() { try { id(1, 2); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "'id' expected 1 args but got 2.\n");
}

#[test]
fn calling_a_non_function_raises() {
    let out = run_ok(
        "tantrum main() { f = 42; try { f(); } catch (e) { print(\"caught\"); } }",
    );
    assert_eq!(out, "caught\n");
}

#[test]
fn deref_non_pointer_raises() {
    let out = run_ok(
        "tantrum main() { x = 5; try { print(*x); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "Cannot dereference a non-pointer.\n");
}

#[test]
fn deref_after_free_names_the_type() {
    let out = run_ok(
        "tantrum main() { int* p = alloc int(7); free p; try { print(*p); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "Null pointer dereference of 'int' pointer!\n");
}

#[test]
fn double_free_raises() {
    let out = run_ok(
        "tantrum main() { int* p = alloc int(7); free p; try { free p; } catch (e) { print(e); } }",
    );
    assert_eq!(out, "Double free detected.\n");
}

#[test]
fn bad_index_combination_raises() {
    let out = run_ok(
        "tantrum main() { try { print(5[0]); } catch (e) { print(\"caught\"); } }",
    );
    assert_eq!(out, "caught\n");
}

#[test]
fn uncaught_error_is_fatal() {
    let run = run_program("tantrum main() { a = 0; print(1 / a); }");
    assert_eq!(run.result, InterpretResult::RuntimeError);
}

#[test]
fn uncaught_throw_is_fatal() {
    let run = run_program("tantrum main() { throw \"kaboom\"; }");
    assert_eq!(run.result, InterpretResult::RuntimeError);
}

#[test]
fn nested_try_unwinds_to_innermost() {
    let out = run_ok(
        "tantrum main() { \
           try { \
             try { throw \"inner\"; } catch (e) { print(\"first \" + e); throw \"outer\"; } \
           } catch (e) { print(\"second \" + e); } \
         }",
    );
    assert_eq!(out, "first inner\nsecond outer\n");
}

#[test]
fn throw_unwinds_across_call_frames() {
    let out = run_ok(
        "tantrum void boom() { throw \"deep\"; } \
         tantrum main() { try { boom(); } catch (e) { print(e); } }",
    );
    assert_eq!(out, "deep\n");
}

#[test]
fn catch_without_binding_discards_value() {
    let out = run_ok("tantrum main() { try { throw 1; } catch { print(\"ok\"); } }");
    assert_eq!(out, "ok\n");
}

#[test]
fn execution_continues_after_caught_error() {
    let out = run_ok(
        "tantrum main() { a = 0; try { print(1 / a); } catch (e) { } print(\"after\"); }",
    );
    assert_eq!(out, "after\n");
}

// =============================================================================
// Compile errors
// =============================================================================

#[test]
fn duplicate_function_is_an_error() {
    let msg = compile_error(
        "tantrum void f() { } tantrum void f() { } tantrum main() { }",
        CompileMode::Both,
    );
    assert!(msg.contains("Duplicate function 'f'"), "got: {}", msg);
}

#[test]
fn duplicate_global_is_an_error() {
    let msg = compile_error("int x = 1; int x = 2;", CompileMode::Both);
    assert!(msg.contains("Duplicate global"), "got: {}", msg);
}

#[test]
fn duplicate_local_in_same_scope_is_an_error() {
    let msg = compile_error(
        "tantrum main() { int x = 1; int x = 2; }",
        CompileMode::Both,
    );
    assert!(msg.contains("Duplicate variable declaration"), "got: {}", msg);
}

#[test]
fn shadowing_in_inner_scope_is_allowed() {
    let out = run_ok(
        "tantrum main() { int x = 1; if (true) { int x = 2; print(x); } print(x); }",
    );
    assert_eq!(out, "2\n1\n");
}

#[test]
fn division_by_literal_zero_is_a_compile_error() {
    let msg = compile_error("tantrum main() { print(1 / 0); }", CompileMode::Both);
    assert!(msg.contains("Division by zero"), "got: {}", msg);
}

#[test]
fn break_outside_loop_is_an_error() {
    let msg = compile_error("tantrum main() { break; }", CompileMode::Both);
    assert!(msg.contains("'break' used outside of loop"), "got: {}", msg);
}

#[test]
fn continue_outside_loop_is_an_error() {
    let msg = compile_error("tantrum main() { continue; }", CompileMode::Both);
    assert!(msg.contains("'continue' used outside of loop"), "got: {}", msg);
}

#[test]
fn return_outside_function_is_an_error() {
    let msg = compile_error("return 1;", CompileMode::Both);
    assert!(msg.contains("outside of a function"), "got: {}", msg);
}

#[test]
fn throw_outside_function_is_an_error() {
    let msg = compile_error("throw \"x\";", CompileMode::Both);
    assert!(msg.contains("outside of a function"), "got: {}", msg);
}

#[test]
fn call_to_undefined_function_is_an_error() {
    let msg = compile_error("tantrum main() { nothing(); }", CompileMode::Both);
    assert!(msg.contains("undefined function 'nothing'"), "got: {}", msg);
}

#[test]
fn declaration_type_mismatch_is_an_error() {
    let msg = compile_error("tantrum main() { int x = \"text\"; }", CompileMode::Both);
    assert!(msg.contains("Cannot assign 'string' value"), "got: {}", msg);
}

#[test]
fn assignment_type_mismatch_is_an_error() {
    let msg = compile_error(
        "tantrum main() { int x = 1; x = \"text\"; }",
        CompileMode::Both,
    );
    assert!(msg.contains("Cannot assign 'string' value"), "got: {}", msg);
}

#[test]
fn argument_type_mismatch_is_an_error() {
    let msg = compile_error(
        "tantrum void takes_int(int x) { } tantrum main() { takes_int(\"no\"); }",
        CompileMode::Both,
    );
    assert!(msg.contains("parameter 1 expects 'int'"), "got: {}", msg);
}

#[test]
fn int_promotes_to_float_parameter() {
    let out = run_ok(
        "tantrum float half(float x) { return x / 2.0; } \
         tantrum main() { print(half(5)); }",
    );
    assert_eq!(out, "2.5\n");
}

#[test]
fn null_is_compatible_with_pointer_types() {
    let output = compile_source(
        "tantrum main() { int* p = alloc int(1); free p; p = null; print(p == null); }",
        CompileMode::Both,
    );
    assert!(
        output.script.is_some(),
        "null into pointer slot should compile: {:?}",
        output.diagnostics.errors
    );
}

// =============================================================================
// Static mode
// =============================================================================

#[test]
fn static_mode_requires_declared_types() {
    let msg = compile_error("tantrum main() { x = 5; }", CompileMode::Static);
    assert!(msg.contains("must be declared with a type"), "got: {}", msg);
}

#[test]
fn static_mode_requires_return_types_except_main() {
    let msg = compile_error(
        "tantrum helper() { } tantrum main() { }",
        CompileMode::Static,
    );
    assert!(msg.contains("must declare a return type"), "got: {}", msg);
}

#[test]
fn static_mode_checks_all_paths_return() {
    let msg = compile_error(
        "tantrum int f(int x) { if (x > 0) { return 1; } } tantrum main() { }",
        CompileMode::Static,
    );
    assert!(msg.contains("not all code paths return"), "got: {}", msg);
}

#[test]
fn static_mode_no_return_at_all() {
    let msg = compile_error(
        "tantrum int f() { print(1); } tantrum main() { }",
        CompileMode::Static,
    );
    assert!(msg.contains("has no return statement"), "got: {}", msg);
}

#[test]
fn static_mode_void_in_expression_is_an_error() {
    let msg = compile_error(
        "tantrum void noop() { } tantrum main() { print(noop()); }",
        CompileMode::Static,
    );
    assert!(msg.contains("is void and cannot be used"), "got: {}", msg);
}

#[test]
fn static_mode_return_type_mismatch() {
    let msg = compile_error(
        "tantrum int f() { return \"no\"; } tantrum main() { }",
        CompileMode::Static,
    );
    assert!(msg.contains("return type mismatch"), "got: {}", msg);
}

#[test]
fn void_return_with_value_is_an_error() {
    let msg = compile_error(
        "tantrum void f() { return 1; } tantrum main() { }",
        CompileMode::Both,
    );
    assert!(msg.contains("must not return a value"), "got: {}", msg);
}

// =============================================================================
// Dynamic mode
// =============================================================================

#[test]
fn dynamic_mode_skips_type_checks() {
    let output = compile_source(
        "tantrum main() { int x = \"text\"; print(x); }",
        CompileMode::Dynamic,
    );
    assert!(
        output.script.is_some(),
        "dynamic mode should not type-check: {:?}",
        output.diagnostics.errors
    );
}

#[test]
fn dynamic_mode_still_enforces_arity_at_runtime() {
    let output = compile_source(
        "tantrum int id(int x) { return x; } \
         tantrum main() { try { id(); } catch (e) { print(e); } }",
        CompileMode::Dynamic,
    );
    let script = output.script.expect("dynamic compile");
    let (mut vm, captured) = tantrums_vm::Vm::with_captured_output();
    assert_eq!(vm.interpret(script), InterpretResult::Ok);
    assert_eq!(captured.get(), "'id' expected 1 args but got 0.\n");
}

// =============================================================================
// Warnings
// =============================================================================

#[test]
fn unused_variable_warns() {
    let output = compile_source("tantrum main() { int unused = 1; }", CompileMode::Both);
    assert!(output
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.to_string().contains("Unused variable 'unused'")));
}

#[test]
fn unreachable_code_warns() {
    let output = compile_source(
        "tantrum int f() { return 1; print(2); } tantrum main() { }",
        CompileMode::Both,
    );
    assert!(output
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.to_string().contains("Unreachable code")));
}

#[test]
fn shadowing_a_builtin_warns() {
    let output = compile_source("tantrum main() { print = 1; int len = 2; }", CompileMode::Both);
    assert!(output
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.to_string().contains("shadows a built-in")));
}

#[test]
fn discarded_pointer_return_warns() {
    let output = compile_source(
        "tantrum int* mk() { int* p = alloc int(1); return p; } \
         tantrum main() { mk(); }",
        CompileMode::Both,
    );
    assert!(output
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.to_string().contains("pointer return value discarded")));
}
