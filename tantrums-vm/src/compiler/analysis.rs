// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Compile-time escape analysis for pointer-holding locals.
//!
//! After a local is initialised from an `alloc`, the remainder of its block
//! is scanned for uses of that name. The analysis is deliberately
//! conservative: naming the pointer anywhere but a final `free` marks it
//! escaped or ambiguous, and the runtime escape bit stays as the second line
//! of defence. Reads and writes through `*p` count as uses of the pointee,
//! not escapes of the pointer.

use tantrums_parser::ast::{Expr, ExprKind, Stmt, StmtKind, UnaryOp};

/// Raw scan counters for one target name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapeScan {
    /// The pointer becomes visible outside its scope.
    pub escaped: bool,
    /// A `free` of the pointer was seen in the scope.
    pub manual_free: bool,
    /// Direct naming of the pointer (aliasing positions).
    pub direct_uses: u32,
    /// Reads or writes through `*p`.
    pub deref_uses: u32,
}

impl EscapeScan {
    pub fn total_uses(&self) -> u32 {
        self.direct_uses + self.deref_uses
    }
}

/// Final disposition of a scanned pointer local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Visible outside the scope: the callee, alias or caller owns it now.
    Escaped,
    /// The user wrote `free`; no auto-free.
    ManualFreed,
    /// Provably local with a single use: insert an auto-free at scope exit.
    AutoLocal,
    /// Multiple uses without a free: defer to the runtime reaper.
    Ambiguous,
}

/// Scan the statements following a pointer declaration and classify it.
pub fn classify_block_tail(rest: &[Stmt], target: &str) -> Disposition {
    let mut scan = EscapeScan::default();
    for stmt in rest {
        scan_stmt(stmt, target, 0, &mut scan);
        if scan.escaped {
            break;
        }
    }
    classify(&scan)
}

/// Scan a single expression (used for re-checking return expressions).
pub fn scan_expression(expr: &Expr, target: &str) -> EscapeScan {
    let mut scan = EscapeScan::default();
    scan_expr(expr, target, 0, &mut scan);
    scan
}

fn classify(scan: &EscapeScan) -> Disposition {
    if scan.escaped {
        return Disposition::Escaped;
    }
    // Multi-use rule: more than one non-free use is no longer provably
    // local. A manual free accounts for one of the allowed uses.
    let allowed = if scan.manual_free { 2 } else { 1 };
    if scan.total_uses() > allowed {
        return Disposition::Ambiguous;
    }
    if scan.manual_free {
        Disposition::ManualFreed
    } else if scan.total_uses() == 1 {
        Disposition::AutoLocal
    } else {
        Disposition::Ambiguous
    }
}

fn scan_stmt(stmt: &Stmt, target: &str, loop_depth: u32, scan: &mut EscapeScan) {
    if scan.escaped {
        return;
    }
    match &stmt.kind {
        StmtKind::Expr(expr) => scan_expr(expr, target, loop_depth, scan),
        StmtKind::VarDecl { init, .. } => {
            // Aliasing: the pointer on the right-hand side of a declaration.
            if let Some(init) = init {
                let sub = subscan_expr(init, target, loop_depth);
                scan.deref_uses += sub.deref_uses;
                if sub.direct_uses > 0 || sub.escaped {
                    scan.escaped = true;
                }
            }
        }
        StmtKind::Block(stmts) => {
            for s in stmts {
                scan_stmt(s, target, loop_depth, scan);
            }
        }
        StmtKind::If {
            cond,
            then_block,
            else_block,
        } => {
            scan_expr(cond, target, loop_depth, scan);
            scan_stmt(then_block, target, loop_depth + 1, scan);
            if let Some(else_block) = else_block {
                scan_stmt(else_block, target, loop_depth + 1, scan);
            }
        }
        StmtKind::While { cond, body } => {
            scan_expr(cond, target, loop_depth, scan);
            scan_stmt(body, target, loop_depth + 1, scan);
        }
        StmtKind::ForIn { iterable, body, .. } => {
            scan_expr(iterable, target, loop_depth, scan);
            scan_stmt(body, target, loop_depth + 1, scan);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                let sub = subscan_expr(value, target, loop_depth);
                scan.deref_uses += sub.deref_uses;
                if sub.direct_uses > 0 || sub.escaped {
                    scan.escaped = true;
                }
            }
        }
        StmtKind::Throw(expr) => scan_expr(expr, target, loop_depth, scan),
        StmtKind::Free(expr) => {
            if expr.ident_name() == Some(target) {
                if loop_depth > 0 {
                    // A conditional free is ambiguous at best.
                    scan.escaped = true;
                } else {
                    scan.direct_uses += 1;
                    scan.manual_free = true;
                }
                return;
            }
            scan_expr(expr, target, loop_depth, scan);
        }
        StmtKind::TryCatch {
            try_block,
            catch_block,
            ..
        } => {
            scan_stmt(try_block, target, loop_depth + 1, scan);
            scan_stmt(catch_block, target, loop_depth + 1, scan);
        }
        StmtKind::FuncDecl(decl) => scan_stmt(&decl.body, target, loop_depth, scan),
        StmtKind::Break | StmtKind::Continue | StmtKind::Use(_) => {}
    }
}

fn subscan_expr(expr: &Expr, target: &str, loop_depth: u32) -> EscapeScan {
    let mut sub = EscapeScan::default();
    scan_expr(expr, target, loop_depth, &mut sub);
    sub
}

fn scan_expr(expr: &Expr, target: &str, loop_depth: u32, scan: &mut EscapeScan) {
    if scan.escaped {
        return;
    }
    match &expr.kind {
        ExprKind::Ident(name) => {
            if name == target {
                // Naming the pointer in a general expression aliases it.
                scan.direct_uses += 1;
                scan.escaped = true;
            }
        }
        ExprKind::Unary { op, operand } => {
            if *op == UnaryOp::Deref && operand.ident_name() == Some(target) {
                // A read through the pointer: a use, not an escape, unless
                // it sits inside a loop or try body.
                if loop_depth > 0 {
                    scan.escaped = true;
                } else {
                    scan.deref_uses += 1;
                }
                return;
            }
            scan_expr(operand, target, loop_depth, scan);
        }
        ExprKind::Binary { left, right, .. } => {
            scan_expr(left, target, loop_depth, scan);
            scan_expr(right, target, loop_depth, scan);
        }
        ExprKind::Call { callee, args } => {
            // Ownership crosses the call boundary.
            for arg in args {
                let sub = subscan_expr(arg, target, loop_depth);
                scan.deref_uses += sub.deref_uses;
                if sub.direct_uses > 0 || sub.escaped {
                    scan.escaped = true;
                    return;
                }
            }
            scan_expr(callee, target, loop_depth, scan);
        }
        ExprKind::Assign { value, .. } => {
            let sub = subscan_expr(value, target, loop_depth);
            scan.deref_uses += sub.deref_uses;
            if sub.direct_uses > 0 || sub.escaped {
                scan.escaped = true;
            }
        }
        ExprKind::IndexAssign {
            object,
            index,
            value,
        } => {
            if index.is_none() && object.ident_name() == Some(target) {
                // `*p = v`: a write through the pointer, not an escape.
                if loop_depth > 0 {
                    scan.escaped = true;
                } else {
                    scan.deref_uses += 1;
                }
                scan_expr(value, target, loop_depth, scan);
                return;
            }
            // Stored into a container entry.
            let sub = subscan_expr(value, target, loop_depth);
            scan.deref_uses += sub.deref_uses;
            if sub.direct_uses > 0 || sub.escaped {
                scan.escaped = true;
                return;
            }
            scan_expr(object, target, loop_depth, scan);
            if let Some(index) = index {
                scan_expr(index, target, loop_depth, scan);
            }
        }
        ExprKind::Index { object, index } => {
            scan_expr(object, target, loop_depth, scan);
            scan_expr(index, target, loop_depth, scan);
        }
        ExprKind::ListLit(items) => {
            for item in items {
                scan_expr(item, target, loop_depth, scan);
            }
        }
        ExprKind::MapLit(pairs) => {
            for (k, v) in pairs {
                scan_expr(k, target, loop_depth, scan);
                scan_expr(v, target, loop_depth, scan);
            }
        }
        ExprKind::Alloc { init, .. } => scan_expr(init, target, loop_depth, scan),
        ExprKind::Postfix { name, .. } => {
            if name == target {
                scan.direct_uses += 1;
                scan.escaped = true;
            }
        }
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantrums_parser::parse_source;

    /// Extract the statements after the first declaration of `main`'s body.
    fn tail_after_first(source: &str) -> Vec<Stmt> {
        let program = parse_source(source).expect("parse error");
        let StmtKind::FuncDecl(f) = &program.decls[0].kind else {
            panic!("expected function");
        };
        let StmtKind::Block(stmts) = &f.body.kind else {
            panic!("expected block");
        };
        stmts[1..].to_vec()
    }

    #[test]
    fn single_deref_read_is_auto_local() {
        let rest = tail_after_first("tantrum main() { int* p = alloc int(7); print(*p); }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::AutoLocal);
    }

    #[test]
    fn return_escapes() {
        let rest = tail_after_first("tantrum int* mk() { int* p = alloc int(3); return p; }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Escaped);
    }

    #[test]
    fn call_argument_escapes() {
        let rest = tail_after_first("tantrum main() { int* p = alloc int(1); consume(p); }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Escaped);
    }

    #[test]
    fn alias_escapes() {
        let rest = tail_after_first("tantrum main() { int* p = alloc int(1); q = p; }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Escaped);
    }

    #[test]
    fn container_store_escapes() {
        let rest =
            tail_after_first("tantrum main() { int* p = alloc int(1); list l = []; l[0] = p; }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Escaped);
    }

    #[test]
    fn use_inside_loop_escapes() {
        let rest = tail_after_first(
            "tantrum main() { int* p = alloc int(1); while (true) { *p = 2; } }",
        );
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Escaped);
    }

    #[test]
    fn manual_free_detected() {
        let rest =
            tail_after_first("tantrum main() { int* p = alloc int(1); *p = 2; free p; }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::ManualFreed);
    }

    #[test]
    fn write_then_read_is_ambiguous() {
        let rest =
            tail_after_first("tantrum main() { int* p = alloc int(1); *p = 2; print(*p); }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Ambiguous);
    }

    #[test]
    fn untouched_pointer_is_ambiguous() {
        let rest = tail_after_first("tantrum main() { int* p = alloc int(1); print(1); }");
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Ambiguous);
    }

    #[test]
    fn free_inside_if_escapes() {
        let rest = tail_after_first(
            "tantrum main() { int* p = alloc int(1); if (true) { free p; } }",
        );
        assert_eq!(classify_block_tail(&rest, "p"), Disposition::Escaped);
    }
}
