// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Control-flow path analysis for return checking.
//!
//! A function with a non-void, non-null declared return type must terminate
//! in a `return` or `throw` on every path. An `if` only counts when both
//! branches exist and both terminate; `try`/`catch` counts when both bodies
//! terminate. Loops never count: a loop body may not run at all.

use tantrums_parser::ast::{Stmt, StmtKind};

/// Whether every path through this statement terminates in return or throw.
pub fn has_guaranteed_return(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) => true,
        StmtKind::Block(stmts) => stmts.iter().any(has_guaranteed_return),
        StmtKind::If {
            then_block,
            else_block,
            ..
        } => match else_block {
            Some(else_block) => {
                has_guaranteed_return(then_block) && has_guaranteed_return(else_block)
            }
            None => false,
        },
        StmtKind::TryCatch {
            try_block,
            catch_block,
            ..
        } => has_guaranteed_return(try_block) && has_guaranteed_return(catch_block),
        _ => false,
    }
}

/// Whether any path contains a `return` at all. Distinguishes "no return
/// statement" from "not all paths return" in diagnostics.
pub fn has_any_return(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::Block(stmts) => stmts.iter().any(has_any_return),
        StmtKind::If {
            then_block,
            else_block,
            ..
        } => {
            has_any_return(then_block)
                || else_block.as_deref().is_some_and(has_any_return)
        }
        StmtKind::TryCatch {
            try_block,
            catch_block,
            ..
        } => has_any_return(try_block) || has_any_return(catch_block),
        StmtKind::While { body, .. } | StmtKind::ForIn { body, .. } => has_any_return(body),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantrums_parser::parse_source;

    fn body_of(source: &str) -> Stmt {
        let program = parse_source(source).expect("parse error");
        match &program.decls[0].kind {
            StmtKind::FuncDecl(f) => (*f.body).clone(),
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn plain_return_guarantees() {
        let body = body_of("tantrum int f() { return 1; }");
        assert!(has_guaranteed_return(&body));
    }

    #[test]
    fn if_without_else_does_not_guarantee() {
        let body = body_of("tantrum int f(int x) { if (x > 0) { return 1; } }");
        assert!(!has_guaranteed_return(&body));
        assert!(has_any_return(&body));
    }

    #[test]
    fn if_else_both_returning_guarantees() {
        let body =
            body_of("tantrum int f(int x) { if (x > 0) { return 1; } else { return 2; } }");
        assert!(has_guaranteed_return(&body));
    }

    #[test]
    fn throw_counts_as_termination() {
        let body = body_of("tantrum int f(int x) { if (x > 0) { return 1; } else { throw \"no\"; } }");
        assert!(has_guaranteed_return(&body));
    }

    #[test]
    fn loop_body_never_guarantees() {
        let body = body_of("tantrum int f(int x) { while (x > 0) { return 1; } }");
        assert!(!has_guaranteed_return(&body));
        assert!(has_any_return(&body));
    }

    #[test]
    fn try_catch_requires_both_bodies() {
        let both = body_of(
            "tantrum int f() { try { return 1; } catch (e) { return 2; } }",
        );
        assert!(has_guaranteed_return(&both));
        let only_try = body_of(
            "tantrum int f() { try { return 1; } catch (e) { print(e); } }",
        );
        assert!(!has_guaranteed_return(&only_try));
    }
}
