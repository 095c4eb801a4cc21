// tantrums-vm - End-to-end execution tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::{run_ok, run_program};
use tantrums_vm::vm::InterpretResult;

#[test]
fn arithmetic_and_print() {
    assert_eq!(run_ok("tantrum main() { print(1 + 2 * 3); }"), "7\n");
}

#[test]
fn string_concat_with_auto_convert() {
    assert_eq!(run_ok("tantrum main() { print(\"v=\" + 42); }"), "v=42\n");
}

#[test]
fn loop_and_break() {
    let out = run_ok(
        "tantrum main() { for i in range(10) { if (i == 3) { break; } print(i); } }",
    );
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn throw_caught_by_catch() {
    let out = run_ok("tantrum main() { try { throw \"boom\"; } catch (e) { print(e); } }");
    assert_eq!(out, "boom\n");
}

#[test]
fn pointer_auto_free_path() {
    let run = run_program("tantrum main() { int* p = alloc int(7); print(*p); }");
    assert_eq!(run.result, InterpretResult::Ok);
    assert_eq!(run.stdout, "7\n");
    assert_eq!(run.live_after_teardown, 0);
    assert_eq!(run.leaks, 0);
    assert!(
        run.notes.iter().any(|n| n.contains("auto-freed 'p'")),
        "expected an auto-free note, got {:?}",
        run.notes
    );
}

#[test]
fn pointer_escape_via_return() {
    let run = run_program(
        "tantrum int* mk() { int* p = alloc int(3); return p; } \
         tantrum main() { int* q = mk(); print(*q); free q; }",
    );
    assert_eq!(run.result, InterpretResult::Ok);
    assert_eq!(run.stdout, "3\n");
    assert_eq!(run.leaks, 0);
    assert_eq!(run.live_after_teardown, 0);
}

#[test]
fn empty_program_succeeds() {
    let run = run_program("");
    assert_eq!(run.result, InterpretResult::Ok);
    assert_eq!(run.stdout, "");
}

#[test]
fn empty_main_returns_cleanly() {
    assert_eq!(run_ok("tantrum main() { }"), "");
}

#[test]
fn float_contaminates_int() {
    assert_eq!(run_ok("tantrum main() { print(1 + 0.5); }"), "1.5\n");
    assert_eq!(run_ok("tantrum main() { print(2 * 2.5); }"), "5\n");
}

#[test]
fn float_prints_shortest_form() {
    assert_eq!(run_ok("tantrum main() { print(7.0); }"), "7\n");
    assert_eq!(run_ok("tantrum main() { print(2.5); }"), "2.5\n");
}

#[test]
fn integer_division_truncates() {
    assert_eq!(run_ok("tantrum main() { print(7 / 2); }"), "3\n");
}

#[test]
fn comparisons_and_logic() {
    assert_eq!(run_ok("tantrum main() { print(1 < 2); }"), "true\n");
    assert_eq!(run_ok("tantrum main() { print(2 =< 2); }"), "true\n");
    assert_eq!(run_ok("tantrum main() { print(true && false); }"), "false\n");
    assert_eq!(run_ok("tantrum main() { print(false || true); }"), "true\n");
    assert_eq!(run_ok("tantrum main() { print(!true); }"), "false\n");
}

#[test]
fn equality_contract() {
    assert_eq!(run_ok("tantrum main() { print(1 == 1.0); }"), "false\n");
    assert_eq!(run_ok("tantrum main() { print(\"a\" == \"a\"); }"), "true\n");
    assert_eq!(run_ok("tantrum main() { print(null == null); }"), "true\n");
    assert_eq!(run_ok("tantrum main() { print(1 != 2); }"), "true\n");
}

#[test]
fn while_loop_with_compound_assignment() {
    let out = run_ok(
        "tantrum main() { i = 0; total = 0; while (i < 5) { total += i; i++; } print(total); }",
    );
    assert_eq!(out, "10\n");
}

#[test]
fn postfix_increment_yields_old_value() {
    assert_eq!(run_ok("tantrum main() { i = 5; print(i++); print(i); }"), "5\n6\n");
}

#[test]
fn prefix_increment_yields_new_value() {
    assert_eq!(run_ok("tantrum main() { i = 5; print(++i); }"), "6\n");
}

#[test]
fn continue_skips_iteration() {
    let out = run_ok(
        "tantrum main() { for i in range(5) { if (i == 2) { continue; } print(i); } }",
    );
    assert_eq!(out, "0\n1\n3\n4\n");
}

#[test]
fn while_continue_and_break() {
    let out = run_ok(
        "tantrum main() { i = 0; while (true) { i++; if (i == 2) { continue; } if (i > 4) { break; } print(i); } }",
    );
    assert_eq!(out, "1\n3\n4\n");
}

#[test]
fn list_literals_index_and_append() {
    assert_eq!(run_ok("tantrum main() { l = [1, 2, 3]; print(l[1]); }"), "2\n");
    assert_eq!(
        run_ok("tantrum main() { l = [1]; append(l, 9); print(len(l)); print(l[1]); }"),
        "2\n9\n"
    );
    assert_eq!(run_ok("tantrum main() { print([1, 2] + [3]); }"), "[1, 2, 3]\n");
}

#[test]
fn list_index_past_end_is_null() {
    assert_eq!(run_ok("tantrum main() { l = [1]; print(l[5]); }"), "null\n");
    assert_eq!(run_ok("tantrum main() { l = [1]; print(l[-1]); }"), "null\n");
}

#[test]
fn empty_containers_have_length_zero() {
    assert_eq!(run_ok("tantrum main() { print(len([])); }"), "0\n");
    assert_eq!(run_ok("tantrum main() { print(len({})); }"), "0\n");
    assert_eq!(run_ok("tantrum main() { print(len(\"\")); }"), "0\n");
}

#[test]
fn map_set_get_and_len() {
    let out = run_ok(
        "tantrum main() { m = {\"a\": 1}; m[\"b\"] = 2; print(m[\"a\"]); print(m[\"b\"]); print(len(m)); }",
    );
    assert_eq!(out, "1\n2\n2\n");
}

#[test]
fn map_int_keys() {
    let out = run_ok("tantrum main() { m = {}; m[42] = \"x\"; print(m[42]); print(len(m)); }");
    assert_eq!(out, "x\n1\n");
}

#[test]
fn map_missing_key_is_null() {
    assert_eq!(run_ok("tantrum main() { m = {}; print(m[\"nope\"]); }"), "null\n");
}

#[test]
fn map_float_keys_follow_the_equality_contract() {
    let out = run_ok(
        "tantrum main() { m = {}; m[0.0] = 1; m[2.5] = 2; print(m[-0.0]); print(m[2.5]); print(len(m)); }",
    );
    assert_eq!(out, "1\n2\n2\n");
}

#[test]
fn string_indexing() {
    assert_eq!(run_ok("tantrum main() { s = \"abc\"; print(s[1]); }"), "b\n");
    assert_eq!(run_ok("tantrum main() { s = \"abc\"; print(s[9]); }"), "null\n");
}

#[test]
fn for_in_over_list_and_string() {
    assert_eq!(run_ok("tantrum main() { for x in [5, 6] { print(x); } }"), "5\n6\n");
    assert_eq!(run_ok("tantrum main() { for c in \"ab\" { print(c); } }"), "a\nb\n");
}

#[test]
fn range_with_start_and_step() {
    assert_eq!(
        run_ok("tantrum main() { for i in range(2, 9, 3) { print(i); } }"),
        "2\n5\n8\n"
    );
    assert_eq!(run_ok("tantrum main() { print(len(range(0, 5, 0))); }"), "0\n");
}

#[test]
fn nested_function_calls_and_arity() {
    let out = run_ok(
        "tantrum int add(int a, int b) { return a + b; } \
         tantrum main() { print(add(add(1, 2), 3)); }",
    );
    assert_eq!(out, "6\n");
}

#[test]
fn recursion_works() {
    let out = run_ok(
        "tantrum int fact(int n) { if (n =< 1) { return 1; } return n * fact(n - 1); } \
         tantrum main() { print(fact(6)); }",
    );
    assert_eq!(out, "720\n");
}

#[test]
fn function_without_main_runs_top_level() {
    // Top-level code runs even when no main is defined.
    let run = run_program("x = 9;");
    assert_eq!(run.result, InterpretResult::Ok);
}

#[test]
fn globals_are_readable_from_functions() {
    let out = run_ok(
        "limit = 40; \
         tantrum int doubled() { return limit * 2; } \
         tantrum main() { print(doubled()); }",
    );
    assert_eq!(out, "80\n");
}

#[test]
fn assignment_in_function_shadows_global() {
    // An unresolved assignment inside a function creates a fresh local;
    // the global keeps its value.
    let out = run_ok(
        "x = 1; \
         tantrum void shadow() { x = 99; print(x); } \
         tantrum main() { shadow(); print(x); }",
    );
    assert_eq!(out, "99\n1\n");
}

#[test]
fn casts_on_typed_declarations() {
    // The declared type coerces initialisers whose type is only known at
    // runtime.
    assert_eq!(
        run_ok("tantrum main() { v = 3.9; int x = v; print(x); }"),
        "3\n"
    );
    assert_eq!(
        run_ok("tantrum main() { v = 5; string s = v; print(s + \"!\"); }"),
        "5!\n"
    );
    assert_eq!(run_ok("tantrum main() { float f = 2; print(f + 0.5); }"), "2.5\n");
    assert_eq!(
        run_ok("tantrum main() { v = \"false\"; bool b = v; print(b); }"),
        "false\n"
    );
}

#[test]
fn default_initialisation_by_type() {
    assert_eq!(run_ok("tantrum main() { int x; print(x); }"), "0\n");
    assert_eq!(run_ok("tantrum main() { string s; print(len(s)); }"), "0\n");
    assert_eq!(run_ok("tantrum main() { list l; print(len(l)); }"), "0\n");
    assert_eq!(run_ok("tantrum main() { bool b; print(b); }"), "false\n");
}

#[test]
fn print_joins_arguments_with_spaces() {
    assert_eq!(run_ok("tantrum main() { print(1, \"two\", 3.5); }"), "1 two 3.5\n");
}

#[test]
fn string_builtins() {
    assert_eq!(run_ok("tantrum main() { print(type(1)); }"), "int\n");
    assert_eq!(run_ok("tantrum main() { print(type(\"s\")); }"), "string\n");
    assert_eq!(run_ok("tantrum main() { print(type(null)); }"), "null\n");
    assert_eq!(run_ok("tantrum main() { print(len(\"hello\")); }"), "5\n");
}

#[test]
fn repeated_concat_stays_correct() {
    let out = run_ok(
        "tantrum main() { s = \"a\"; s = s + \"b\"; s = s + \"c\"; s = s + \"d\"; print(s); }",
    );
    assert_eq!(out, "abcd\n");
}

#[test]
fn mixed_concat_order() {
    assert_eq!(run_ok("tantrum main() { print(1 + \"x\"); }"), "1x\n");
    assert_eq!(run_ok("tantrum main() { print(\"x\" + 1.5); }"), "x1.5\n");
    assert_eq!(run_ok("tantrum main() { print(\"v\" + true); }"), "vtrue\n");
    assert_eq!(run_ok("tantrum main() { print(\"n\" + null); }"), "nnull\n");
}

#[test]
fn else_if_chain() {
    let out = run_ok(
        "tantrum string grade(int n) { \
           if (n => 90) { return \"A\"; } else if (n => 80) { return \"B\"; } else { return \"C\"; } \
         } \
         tantrum main() { print(grade(95)); print(grade(85)); print(grade(10)); }",
    );
    assert_eq!(out, "A\nB\nC\n");
}

#[test]
fn list_plus_range_concatenation() {
    assert_eq!(run_ok("tantrum main() { print([9] + range(2)); }"), "[9, 0, 1]\n");
}
