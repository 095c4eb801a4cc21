// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Code generation: single-pass AST-to-bytecode lowering.
//!
//! Type checks, control-flow validation and escape analysis are folded into
//! the lowering pass. Diagnostics accumulate instead of aborting; the caller
//! gets a script only when nothing was recorded as an error.

use tantrums_core::chunk::Chunk;
use tantrums_core::object::Function;
use tantrums_core::opcode::{CastKind, OpCode};
use tantrums_core::value::Value;
use tantrums_parser::ast::{
    BinaryOp, Expr, ExprKind, FuncDecl, Program, Stmt, StmtKind, UnaryOp,
};

use super::analysis::{self, Disposition};
use super::diagnostics::Diagnostics;
use super::flow;
use super::types::{self, SignatureTable, Ty};

const MAX_LOCALS: usize = 256;
const MAX_PARAMS: usize = 16;

/// Compile discipline selected by the `#mode` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompileMode {
    /// Every variable and non-`main` function must be typed.
    Static,
    /// Type checks suppressed; arity still enforced at runtime.
    Dynamic,
    /// Typed and untyped code coexist; checks apply to annotations only.
    #[default]
    Both,
}

/// Knobs collected from the CLI and source directives.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub mode: CompileMode,
    /// Default `auto_manage` for new allocations (`#autoFree`).
    pub autofree_default: bool,
    /// Downgrade leak errors to warnings (`#allowMemoryLeaks`).
    pub allow_leaks: bool,
    /// Silence the auto-free note stream.
    pub suppress_autofree_notes: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            mode: CompileMode::Both,
            autofree_default: true,
            allow_leaks: false,
            suppress_autofree_notes: false,
        }
    }
}

/// Result of a compilation: the script function when no errors were
/// recorded, plus every diagnostic either way.
#[derive(Debug)]
pub struct CompileOutput {
    pub script: Option<Function>,
    pub diagnostics: Diagnostics,
}

/// Compile a parsed program into a top-level script function.
pub fn compile(program: &Program, opts: &CompileOptions) -> CompileOutput {
    let mut shared = Shared {
        opts,
        sigs: SignatureTable::default(),
        globals: Vec::new(),
        diags: Diagnostics::default(),
    };

    prescan_signatures(program, &mut shared);
    if shared.sigs.find("main").is_none() {
        shared.diags.warning(0, "no 'main' function found.");
    }

    let mut script = FunctionCompiler::new(&mut shared, None, Ty::Dynamic, 0);
    script.reserve_slot_zero();
    for decl in &program.decls {
        script.compile_stmt(decl);
    }
    script.emit(OpCode::Null, 0);
    script.emit(OpCode::Return, 0);
    let function = script.finish();

    let diagnostics = shared.diags;
    CompileOutput {
        script: if diagnostics.has_errors() {
            None
        } else {
            Some(function)
        },
        diagnostics,
    }
}

/// Pre-scan: collect every top-level function signature before emitting a
/// single instruction, so call sites can be checked in one pass.
fn prescan_signatures(program: &Program, shared: &mut Shared<'_>) {
    for (decl, line) in types::top_level_functions(program) {
        if shared.opts.mode == CompileMode::Static
            && decl.ret_type.is_none()
            && decl.name != "main"
        {
            shared.diags.type_error(
                line,
                format!(
                    "function '{}' in static mode must declare a return type.",
                    decl.name
                ),
            );
        }
        if shared.sigs.find(&decl.name).is_some() {
            shared
                .diags
                .error(line, format!("Duplicate function '{}'.", decl.name));
        }
        shared.sigs.register(decl);
    }
}

/// State shared by the script compiler and nested function compilers.
struct Shared<'a> {
    opts: &'a CompileOptions,
    sigs: SignatureTable,
    globals: Vec<String>,
    diags: Diagnostics,
}

/// A local variable slot during compilation.
#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: u32,
    ty: Ty,
    is_used: bool,
    /// The slot currently owns an un-freed allocation; reaching scope exit
    /// in this state is a leak error.
    holds_alloc: bool,
    /// Provably local: emit a free at scope exit.
    auto_free: bool,
}

impl Local {
    fn is_hidden(&self) -> bool {
        self.name.is_empty() || self.name.starts_with('$')
    }
}

/// Per-loop bookkeeping for break/continue patching.
#[derive(Debug)]
struct LoopCtx {
    start: usize,
    scope_depth: u32,
    kind: LoopKind,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    While,
    ForIn,
}

/// Compiler for one function body (the script counts as one).
struct FunctionCompiler<'a, 'b> {
    shared: &'a mut Shared<'b>,
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: u32,
    func_name: Option<String>,
    ret_type: Ty,
    arity: u8,
    loops: Vec<LoopCtx>,
    in_expr_stmt: bool,
}

impl<'a, 'b> FunctionCompiler<'a, 'b> {
    fn new(
        shared: &'a mut Shared<'b>,
        func_name: Option<String>,
        ret_type: Ty,
        scope_depth: u32,
    ) -> Self {
        Self {
            shared,
            chunk: Chunk::new(),
            locals: Vec::new(),
            scope_depth,
            func_name,
            ret_type,
            arity: 0,
            loops: Vec::new(),
            in_expr_stmt: false,
        }
    }

    fn finish(self) -> Function {
        Function {
            arity: self.arity,
            name: self.func_name,
            chunk: self.chunk,
        }
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    fn emit(&mut self, op: OpCode, line: u32) {
        self.chunk.emit(op, line);
    }

    fn make_constant(&mut self, value: Value, line: u32) -> u16 {
        match self.chunk.add_constant(value) {
            Some(idx) => idx,
            None => {
                self.shared
                    .diags
                    .error(line, "Too many constants in function.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value, line: u32) {
        let idx = self.make_constant(value, line);
        self.emit(OpCode::Constant(idx), line);
    }

    fn name_constant(&mut self, name: &str, line: u32) -> u16 {
        self.make_constant(Value::string(name), line)
    }

    fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        let offset = self.chunk.current_offset();
        self.emit(op, line);
        offset
    }

    fn patch_jump(&mut self, offset: usize) {
        self.chunk.patch_jump(offset);
    }

    fn emit_loop(&mut self, loop_start: usize, line: u32) {
        let offset = loop_start as i32 - self.chunk.current_offset() as i32 - 1;
        self.emit(OpCode::Loop(offset as i16), line);
    }

    // =========================================================================
    // Scope and local management
    // =========================================================================

    fn begin_scope(&mut self, line: u32) {
        self.scope_depth += 1;
        self.emit(OpCode::EnterScope, line);
    }

    fn end_scope(&mut self, line: u32) {
        self.scope_depth -= 1;
        while self
            .locals
            .last()
            .is_some_and(|l| l.depth > self.scope_depth)
        {
            let slot = self.locals.len() - 1;
            let local = self.locals[slot].clone();

            let is_param = local.depth == 1 && self.func_name.is_some();
            // Function bodies sit at depth 2; anything deeper is a nested
            // block (loop or branch) where unused-variable noise is not
            // worth a warning.
            let is_nested_block = local.depth >= 3;

            if local.holds_alloc && !local.is_hidden() {
                self.leak_diagnostic(
                    line,
                    format!(
                        "Memory leak detected. Pointer '{}' goes out of scope without being freed.",
                        local.name
                    ),
                );
            }

            if local.auto_free {
                if !self.shared.opts.suppress_autofree_notes {
                    self.shared.diags.note(format!(
                        "[Tantrums] note: auto-freed '{}' at line {} (provably local)",
                        local.name, line
                    ));
                }
                self.emit(OpCode::GetLocal(slot as u8), line);
                self.emit(OpCode::Free, line);
            }

            if !local.is_used
                && self.func_name.is_some()
                && !local.is_hidden()
                && !is_param
                && !is_nested_block
            {
                self.shared
                    .diags
                    .warning(line, format!("Unused variable '{}'.", local.name));
            }

            self.emit(OpCode::Pop, line);
            self.locals.pop();
        }
        // The runtime reaper must only see pointers the compiled auto-frees
        // did not already release, so ExitScope goes after them.
        self.emit(OpCode::ExitScope, line);
    }

    fn leak_diagnostic(&mut self, line: u32, message: String) {
        if self.shared.opts.allow_leaks {
            self.shared.diags.warning(line, message);
        } else {
            self.shared.diags.type_error(line, message);
        }
    }

    fn add_local(&mut self, name: &str, ty: Ty, line: u32) -> Option<usize> {
        if self.locals.len() >= MAX_LOCALS {
            self.shared.diags.error(line, "Too many local variables.");
            return None;
        }
        self.locals.push(Local {
            name: name.to_string(),
            depth: self.scope_depth,
            ty,
            is_used: false,
            holds_alloc: false,
            auto_free: false,
        });
        Some(self.locals.len() - 1)
    }

    fn reserve_slot_zero(&mut self) {
        self.locals.push(Local {
            name: String::new(),
            depth: self.scope_depth,
            ty: Ty::Dynamic,
            is_used: true,
            holds_alloc: false,
            auto_free: false,
        });
    }

    fn resolve_local(&mut self, name: &str) -> Option<usize> {
        for (i, local) in self.locals.iter_mut().enumerate().rev() {
            if local.name == name {
                local.is_used = true;
                return Some(i);
            }
        }
        None
    }

    fn local_type(&self, name: &str) -> Option<Ty> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| l.ty.clone())
    }

    // =========================================================================
    // Type inference and checking
    // =========================================================================

    /// Bottom-up expression type inference.
    fn infer(&self, expr: &Expr) -> Ty {
        match &expr.kind {
            ExprKind::Int(_) => Ty::Int,
            ExprKind::Float(_) => Ty::Float,
            ExprKind::Str(_) => Ty::Str,
            ExprKind::Bool(_) => Ty::Bool,
            ExprKind::Null => Ty::Null,
            ExprKind::ListLit(_) => Ty::List,
            ExprKind::MapLit(_) => Ty::Map,
            ExprKind::Ident(name) => self.local_type(name).unwrap_or(Ty::Dynamic),
            ExprKind::Call { callee, .. } => match callee.ident_name() {
                Some(name) => self
                    .shared
                    .sigs
                    .find(name)
                    .map(|sig| sig.ret.clone())
                    .unwrap_or(Ty::Dynamic),
                None => Ty::Dynamic,
            },
            ExprKind::Binary { op, left, right } => {
                if op.is_comparison() {
                    return Ty::Bool;
                }
                let lt = self.infer(left);
                let rt = self.infer(right);
                if *op == BinaryOp::Add && (lt == Ty::Str || rt == Ty::Str) {
                    return Ty::Str;
                }
                if lt == Ty::Float || rt == Ty::Float {
                    return Ty::Float;
                }
                if lt == Ty::Int && rt == Ty::Int {
                    return Ty::Int;
                }
                lt
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => Ty::Bool,
                UnaryOp::Neg => self.infer(operand),
                UnaryOp::AddrOf => Ty::Ptr(Box::new(self.infer(operand))),
                UnaryOp::Deref => match self.infer(operand) {
                    Ty::Ptr(inner) => *inner,
                    _ => Ty::Dynamic,
                },
            },
            ExprKind::Alloc { type_name, .. } => Ty::Ptr(Box::new(Ty::parse(type_name))),
            ExprKind::Postfix { name, .. } => self.local_type(name).unwrap_or(Ty::Dynamic),
            ExprKind::Assign { value, .. } => self.infer(value),
            ExprKind::Index { .. } | ExprKind::IndexAssign { .. } => Ty::Dynamic,
        }
    }

    /// Call-site checks against the pre-scanned signature table.
    fn check_call_types(&mut self, callee: &Expr, args: &[Expr], line: u32) {
        let Some(name) = callee.ident_name() else {
            return;
        };
        if tantrums_core::builtins::is_builtin(name) {
            return;
        }
        let name = name.to_string();
        if self.shared.sigs.find(&name).is_none() {
            // A local holding a function value is resolved at runtime.
            if self.locals.iter().all(|l| l.name != name) {
                self.shared
                    .diags
                    .type_error(line, format!("Call to undefined function '{}'.", name));
            }
            return;
        }
        if self.shared.opts.mode == CompileMode::Dynamic {
            return;
        }

        let sig_params: Vec<Ty> = self.shared.sigs.find(&name).unwrap().params.clone();
        if args.len() != sig_params.len() {
            // Arity is enforced at the call site by the VM.
            return;
        }
        for (i, (param_ty, arg)) in sig_params.iter().zip(args).enumerate() {
            if param_ty.is_dynamic() {
                continue;
            }
            let arg_ty = self.infer(arg);
            if arg_ty.is_dynamic() {
                continue;
            }
            if !Ty::compatible(param_ty, &arg_ty) {
                self.shared.diags.type_error(
                    line,
                    format!(
                        "Function '{}' parameter {} expects '{}' but got '{}'.",
                        name,
                        i + 1,
                        param_ty,
                        arg_ty
                    ),
                );
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Int(n) => self.emit_constant(Value::Int(*n), line),
            ExprKind::Float(f) => self.emit_constant(Value::Float(*f), line),
            ExprKind::Str(s) => {
                let value = Value::string(s);
                self.emit_constant(value, line);
            }
            ExprKind::Bool(true) => self.emit(OpCode::True, line),
            ExprKind::Bool(false) => self.emit(OpCode::False, line),
            ExprKind::Null => self.emit(OpCode::Null, line),

            ExprKind::Ident(name) => match self.resolve_local(name) {
                Some(slot) => self.emit(OpCode::GetLocal(slot as u8), line),
                None => {
                    let idx = self.name_constant(name, line);
                    self.emit(OpCode::GetGlobal(idx), line);
                }
            },

            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand);
                let opcode = match op {
                    UnaryOp::Neg => OpCode::Negate,
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::AddrOf => OpCode::PtrRef,
                    UnaryOp::Deref => OpCode::PtrDeref,
                };
                self.emit(opcode, line);
            }

            ExprKind::Binary { op, left, right } => self.compile_binary(*op, left, right, line),

            ExprKind::Call { callee, args } => self.compile_call(callee, args, line),

            ExprKind::ListLit(items) => {
                if items.len() > u8::MAX as usize {
                    self.shared
                        .diags
                        .error(line, "Too many elements in list literal.");
                    return;
                }
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(OpCode::ListNew(items.len() as u8), line);
            }

            ExprKind::MapLit(pairs) => {
                if pairs.len() > u8::MAX as usize {
                    self.shared
                        .diags
                        .error(line, "Too many entries in map literal.");
                    return;
                }
                for (key, value) in pairs {
                    self.compile_expr(key);
                    self.compile_expr(value);
                }
                self.emit(OpCode::MapNew(pairs.len() as u8), line);
            }

            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.emit(OpCode::IndexGet, line);
            }

            ExprKind::Alloc { type_name, init } => {
                self.compile_expr(init);
                let idx = self.name_constant(type_name, line);
                self.emit(
                    OpCode::Alloc {
                        type_name: idx,
                        auto_manage: self.shared.opts.autofree_default,
                    },
                    line,
                );
            }

            ExprKind::Postfix { increment, name } => {
                self.compile_postfix(*increment, name, line);
            }

            ExprKind::Assign { name, value } => self.compile_assign(name, value, line),

            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => match index {
                None => {
                    // *p = v
                    self.compile_expr(value);
                    self.compile_expr(object);
                    self.emit(OpCode::PtrSet, line);
                }
                Some(index) => {
                    self.compile_expr(object);
                    self.compile_expr(index);
                    self.compile_expr(value);
                    self.emit(OpCode::IndexSet, line);
                }
            },
        }
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, line: u32) {
        match op {
            BinaryOp::And => {
                self.compile_expr(left);
                let end_jump = self.emit_jump(OpCode::JumpIfFalse(0), line);
                self.emit(OpCode::Pop, line);
                self.compile_expr(right);
                self.patch_jump(end_jump);
                return;
            }
            BinaryOp::Or => {
                self.compile_expr(left);
                let else_jump = self.emit_jump(OpCode::JumpIfFalse(0), line);
                let end_jump = self.emit_jump(OpCode::Jump(0), line);
                self.patch_jump(else_jump);
                self.emit(OpCode::Pop, line);
                self.compile_expr(right);
                self.patch_jump(end_jump);
                return;
            }
            _ => {}
        }

        self.compile_expr(left);
        self.compile_expr(right);
        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => {
                match &right.kind {
                    ExprKind::Int(0) => self.shared.diags.type_error(line, "Division by zero."),
                    ExprKind::Float(f) if *f == 0.0 => {
                        self.shared.diags.type_error(line, "Division by zero.")
                    }
                    _ => {}
                }
                OpCode::Div
            }
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Neq => OpCode::Neq,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Lte => OpCode::Lte,
            BinaryOp::Gte => OpCode::Gte,
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        self.emit(opcode, line);
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], line: u32) {
        self.check_call_types(callee, args, line);

        // Void calls cannot be used where a value is expected.
        if self.shared.opts.mode == CompileMode::Static && !self.in_expr_stmt {
            let ret = match callee.ident_name() {
                Some(name) => self
                    .shared
                    .sigs
                    .find(name)
                    .map(|sig| sig.ret.clone())
                    .unwrap_or(Ty::Dynamic),
                None => Ty::Dynamic,
            };
            if ret == Ty::Void {
                let message = match callee.ident_name() {
                    Some(name) => {
                        format!("'{}' is void and cannot be used in an expression.", name)
                    }
                    None => "void function call cannot be used in an expression.".to_string(),
                };
                self.shared.diags.type_error(line, message);
            }
        }

        if args.len() > u8::MAX as usize {
            self.shared.diags.error(line, "Too many arguments.");
            return;
        }

        let old_expr_stmt = self.in_expr_stmt;
        self.in_expr_stmt = false;
        self.compile_expr(callee);

        let is_user_func = callee
            .ident_name()
            .is_some_and(|name| !tantrums_core::builtins::is_builtin(name));

        for arg in args {
            // Ownership crosses the call boundary; the callee is trusted to
            // release pointer arguments.
            if is_user_func {
                if let Some(name) = arg.ident_name() {
                    if let Some(slot) = self.resolve_local(name) {
                        self.locals[slot].holds_alloc = false;
                    }
                }
            }
            self.compile_expr(arg);
        }
        self.in_expr_stmt = old_expr_stmt;

        self.emit(OpCode::Call(args.len() as u8), line);
    }

    fn compile_postfix(&mut self, increment: bool, name: &str, line: u32) {
        let slot = self.resolve_local(name);

        // Old value stays on the stack as the expression result.
        self.compile_name(name, line);
        self.compile_name(name, line);
        self.emit_constant(Value::Int(1), line);
        self.emit(if increment { OpCode::Add } else { OpCode::Sub }, line);

        match slot {
            Some(slot) => self.emit(OpCode::SetLocal(slot as u8), line),
            None => {
                let idx = self.name_constant(name, line);
                self.emit(OpCode::SetGlobal(idx), line);
            }
        }
        self.emit(OpCode::Pop, line);
    }

    fn compile_name(&mut self, name: &str, line: u32) {
        match self.resolve_local(name) {
            Some(slot) => self.emit(OpCode::GetLocal(slot as u8), line),
            None => {
                let idx = self.name_constant(name, line);
                self.emit(OpCode::GetGlobal(idx), line);
            }
        }
    }

    fn compile_assign(&mut self, name: &str, value: &Expr, line: u32) {
        if self.shared.opts.mode == CompileMode::Static && self.resolve_local(name).is_none() {
            self.shared.diags.type_error(
                line,
                format!(
                    "Static mode: variable '{}' must be declared with a type (e.g., int {} = ...).",
                    name, name
                ),
            );
        }

        // Type check assignment to a typed local.
        if self.shared.opts.mode != CompileMode::Dynamic {
            if let Some(declared) = self.local_type(name) {
                if !declared.is_dynamic() {
                    let value_ty = self.infer(value);
                    if !value_ty.is_dynamic() && !Ty::compatible(&declared, &value_ty) {
                        self.shared.diags.type_error(
                            line,
                            format!(
                                "Cannot assign '{}' value to '{}' variable '{}'.",
                                value_ty, declared, name
                            ),
                        );
                    }
                }
            }
        }

        self.compile_expr(value);
        let slot = self.resolve_local(name);

        if let Some(slot) = slot {
            if self.locals[slot].holds_alloc {
                self.leak_diagnostic(
                    line,
                    format!(
                        "Memory leak detected. Pointer '{}' reassigned without being freed.",
                        name
                    ),
                );
            }
            self.locals[slot].holds_alloc = self.value_holds_alloc(value);
        }

        match slot {
            Some(slot) => self.emit(OpCode::SetLocal(slot as u8), line),
            None if self.scope_depth > 0 => {
                // First assignment inside a function creates a new local;
                // its value already sits in the new slot, and the copy
                // pushed here is the expression result.
                if let Some(new_slot) = self.add_local(name, Ty::Dynamic, line) {
                    self.emit(OpCode::GetLocal(new_slot as u8), line);
                }
            }
            None => {
                let idx = self.name_constant(name, line);
                self.emit(OpCode::SetGlobal(idx), line);
            }
        }
    }

    /// Whether an initialiser transfers allocation ownership to a local.
    fn value_holds_alloc(&self, value: &Expr) -> bool {
        match &value.kind {
            ExprKind::Alloc { .. } => true,
            ExprKind::Call { callee, .. } => callee
                .ident_name()
                .and_then(|name| self.shared.sigs.find(name))
                .is_some_and(|sig| sig.ret.is_pointer()),
            _ => false,
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                // A discarded pointer return value is a likely leak.
                if let ExprKind::Call { callee, .. } = &expr.kind {
                    let ptr_ret = callee
                        .ident_name()
                        .and_then(|name| self.shared.sigs.find(name))
                        .is_some_and(|sig| sig.ret.is_pointer());
                    if ptr_ret {
                        self.shared.diags.warning(
                            line,
                            "pointer return value discarded (potential leak).",
                        );
                    }
                }

                let old = self.in_expr_stmt;
                self.in_expr_stmt = true;
                self.compile_expr(expr);
                self.in_expr_stmt = old;
                self.emit(OpCode::Pop, line);
            }

            StmtKind::VarDecl {
                type_name,
                name,
                init,
            } => self.compile_var_decl(type_name.as_deref(), name, init.as_ref(), line),

            StmtKind::Block(stmts) => {
                self.begin_scope(line);
                self.compile_block_body(stmts);
                self.end_scope(line);
            }

            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.compile_expr(cond);
                let then_jump = self.emit_jump(OpCode::JumpIfFalse(0), line);
                self.emit(OpCode::Pop, line);
                self.compile_stmt(then_block);
                let else_jump = self.emit_jump(OpCode::Jump(0), line);
                self.patch_jump(then_jump);
                self.emit(OpCode::Pop, line);
                if let Some(else_block) = else_block {
                    self.compile_stmt(else_block);
                }
                self.patch_jump(else_jump);
            }

            StmtKind::While { cond, body } => self.compile_while(cond, body, line),

            StmtKind::ForIn {
                var,
                iterable,
                body,
            } => self.compile_for_in(var, iterable, body, line),

            StmtKind::FuncDecl(decl) => self.compile_func_decl(decl, line),

            StmtKind::Return(value) => self.compile_return(value.as_ref(), line),

            StmtKind::Throw(expr) => {
                if self.func_name.is_none() {
                    self.shared
                        .diags
                        .type_error(line, "'throw' statement used outside of a function.");
                }
                self.compile_expr(expr);
                self.emit(OpCode::Throw, line);
            }

            StmtKind::Free(expr) => {
                if let Some(name) = expr.ident_name() {
                    if let Some(slot) = self.resolve_local(name) {
                        self.locals[slot].holds_alloc = false;
                    }
                }
                self.compile_expr(expr);
                self.emit(OpCode::Free, line);
            }

            StmtKind::TryCatch {
                try_block,
                err_var,
                catch_block,
            } => self.compile_try_catch(try_block, err_var.as_deref(), catch_block, line),

            StmtKind::Break => self.compile_break(line),
            StmtKind::Continue => self.compile_continue(line),

            StmtKind::Use(_) => {
                // Imports are resolved by the driver before compilation.
            }
        }
    }

    /// Compile the statements of a block, running escape analysis over the
    /// tail after every pointer-producing declaration, and warning about
    /// unreachable code after return/throw.
    fn compile_block_body(&mut self, stmts: &[Stmt]) {
        for (i, stmt) in stmts.iter().enumerate() {
            self.compile_stmt(stmt);

            if let StmtKind::VarDecl {
                name,
                init: Some(init),
                ..
            } = &stmt.kind
            {
                if matches!(init.kind, ExprKind::Alloc { .. }) {
                    if let Some(slot) = self.resolve_local(name) {
                        match analysis::classify_block_tail(&stmts[i + 1..], name) {
                            Disposition::Escaped | Disposition::ManualFreed => {
                                self.locals[slot].holds_alloc = false;
                            }
                            Disposition::AutoLocal => {
                                self.locals[slot].auto_free = true;
                                self.locals[slot].holds_alloc = false;
                            }
                            Disposition::Ambiguous => {
                                // Not provably local; the runtime reaper is
                                // the second line of defence.
                                self.locals[slot].holds_alloc = false;
                            }
                        }
                    }
                }
            }

            if matches!(stmt.kind, StmtKind::Return(_) | StmtKind::Throw(_)) {
                if let Some(next) = stmts.get(i + 1) {
                    self.shared
                        .diags
                        .warning(next.line, "Unreachable code after return/throw.");
                }
                break;
            }
        }
    }

    fn compile_var_decl(
        &mut self,
        type_name: Option<&str>,
        name: &str,
        init: Option<&Expr>,
        line: u32,
    ) {
        if tantrums_core::builtins::is_builtin(name) {
            self.shared.diags.warning(
                line,
                format!("Variable '{}' shadows a built-in function.", name),
            );
        }

        // Duplicate declarations in the same scope.
        if self.scope_depth == 0 {
            if self.shared.globals.iter().any(|g| g == name) {
                self.shared.diags.type_error(
                    line,
                    format!("Duplicate global variable declaration '{}'.", name),
                );
            }
        } else {
            let duplicate = self
                .locals
                .iter()
                .rev()
                .take_while(|l| l.depth >= self.scope_depth)
                .any(|l| l.name == name);
            if duplicate {
                self.shared.diags.type_error(
                    line,
                    format!("Duplicate variable declaration '{}' in the same scope.", name),
                );
            }
        }

        let declared_ty = Ty::parse_opt(type_name);
        let init_is_alloc = init.is_some_and(|e| matches!(e.kind, ExprKind::Alloc { .. }));

        // Declared type versus inferable initialiser type.
        if self.shared.opts.mode != CompileMode::Dynamic && type_name.is_some() && !init_is_alloc
        {
            if let Some(init) = init {
                let init_ty = self.infer(init);
                if !init_ty.is_dynamic() && !Ty::compatible(&declared_ty, &init_ty) {
                    self.shared.diags.type_error(
                        line,
                        format!(
                            "Cannot assign '{}' value to '{}' variable '{}'.",
                            init_ty, declared_ty, name
                        ),
                    );
                }
            }
        }

        match init {
            Some(init) => self.compile_expr(init),
            None => self.emit_default_value(&declared_ty, line),
        }

        // Annotated primitives are coerced to their declared type.
        if type_name.is_some() && !init_is_alloc {
            let cast = match &declared_ty {
                Ty::Int => Some(CastKind::Int),
                Ty::Float => Some(CastKind::Float),
                Ty::Str => Some(CastKind::Str),
                Ty::Bool => Some(CastKind::Bool),
                _ => None,
            };
            if let Some(kind) = cast {
                self.emit(OpCode::Cast(kind), line);
            }
        }

        if self.scope_depth > 0 {
            if let Some(slot) = self.add_local(name, declared_ty, line) {
                if let Some(init) = init {
                    if self.value_holds_alloc(init) {
                        self.locals[slot].holds_alloc = true;
                    }
                }
            }
        } else {
            self.shared.globals.push(name.to_string());
            let idx = self.name_constant(name, line);
            self.emit(OpCode::DefineGlobal(idx), line);
        }
    }

    fn emit_default_value(&mut self, ty: &Ty, line: u32) {
        match ty {
            Ty::List => self.emit(OpCode::ListNew(0), line),
            Ty::Map => self.emit(OpCode::MapNew(0), line),
            Ty::Int => self.emit_constant(Value::Int(0), line),
            Ty::Float => self.emit_constant(Value::Float(0.0), line),
            Ty::Bool => self.emit(OpCode::False, line),
            Ty::Str => self.emit_constant(Value::string(""), line),
            _ => self.emit(OpCode::Null, line),
        }
    }

    fn compile_while(&mut self, cond: &Expr, body: &Stmt, line: u32) {
        let start = self.chunk.current_offset();
        self.loops.push(LoopCtx {
            start,
            scope_depth: self.scope_depth,
            kind: LoopKind::While,
            breaks: Vec::new(),
            continues: Vec::new(),
        });

        self.compile_expr(cond);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse(0), line);
        self.emit(OpCode::Pop, line);
        self.compile_stmt(body);
        self.emit_loop(start, line);
        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop, line);

        let ctx = self.loops.pop().expect("loop context pushed above");
        for offset in ctx.breaks {
            self.patch_jump(offset);
        }
    }

    fn compile_for_in(&mut self, var: &str, iterable: &Expr, body: &Stmt, line: u32) {
        self.begin_scope(line);

        self.compile_expr(iterable);
        let iter_slot = self.add_local("$iter", Ty::Dynamic, line).unwrap_or(0);
        self.emit(OpCode::GetLocal(iter_slot as u8), line);
        self.emit(OpCode::Len, line);
        let len_slot = self.add_local("$len", Ty::Int, line).unwrap_or(0);
        self.emit_constant(Value::Int(0), line);
        let idx_slot = self.add_local("$idx", Ty::Int, line).unwrap_or(0);
        self.emit(OpCode::Null, line);
        let var_slot = self.add_local(var, Ty::Dynamic, line).unwrap_or(0);

        let start = self.chunk.current_offset();
        self.emit(
            OpCode::ForInStep {
                iter: iter_slot as u8,
                len: len_slot as u8,
                counter: idx_slot as u8,
            },
            line,
        );
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse(0), line);
        self.emit(OpCode::Pop, line);
        self.emit(OpCode::SetLocal(var_slot as u8), line);
        self.emit(OpCode::Pop, line);

        self.loops.push(LoopCtx {
            start,
            scope_depth: self.scope_depth,
            kind: LoopKind::ForIn,
            breaks: Vec::new(),
            continues: Vec::new(),
        });

        self.compile_stmt(body);

        let ctx = self.loops.pop().expect("loop context pushed above");
        for offset in ctx.continues {
            self.patch_jump(offset);
        }
        self.emit_loop(start, line);
        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop, line);
        for offset in ctx.breaks {
            self.patch_jump(offset);
        }

        self.end_scope(line);
    }

    fn compile_func_decl(&mut self, decl: &FuncDecl, line: u32) {
        if decl.params.len() > MAX_PARAMS {
            self.shared.diags.error(
                line,
                format!("Function '{}' has too many parameters.", decl.name),
            );
        }

        let ret_type = Ty::parse_opt(decl.ret_type.as_deref());
        let mut inner =
            FunctionCompiler::new(self.shared, Some(decl.name.clone()), ret_type.clone(), 1);
        inner.arity = decl.params.len().min(u8::MAX as usize) as u8;
        inner.reserve_slot_zero();
        for param in &decl.params {
            inner.add_local(&param.name, Ty::parse_opt(param.type_name.as_deref()), line);
        }

        let guaranteed = flow::has_guaranteed_return(&decl.body);
        inner.compile_stmt(&decl.body);

        // All-paths-return validation for declared return types.
        if inner.shared.opts.mode == CompileMode::Static
            && !ret_type.is_dynamic()
            && ret_type != Ty::Void
        {
            if !guaranteed {
                let message = if !flow::has_any_return(&decl.body) {
                    format!(
                        "function '{}' declared '{}' but has no return statement.",
                        decl.name, ret_type
                    )
                } else {
                    format!("function '{}' not all code paths return a value.", decl.name)
                };
                inner.shared.diags.type_error(line, message);
            }
        } else if !guaranteed && !ret_type.is_dynamic() && ret_type != Ty::Void && ret_type != Ty::Null
        {
            inner.shared.diags.warning(
                line,
                format!(
                    "Function '{}' is typed as '{}' but may lack a return statement.",
                    decl.name, ret_type
                ),
            );
        }

        // Implicit return null.
        inner.emit(OpCode::Null, line);
        inner.emit(OpCode::Return, line);
        let function = inner.finish();

        self.emit_constant(Value::function(function), line);
        if self.scope_depth > 0 {
            self.add_local(&decl.name, Ty::Dynamic, line);
        } else {
            let idx = self.name_constant(&decl.name, line);
            self.emit(OpCode::DefineGlobal(idx), line);
        }
    }

    fn compile_return(&mut self, value: Option<&Expr>, line: u32) {
        if self.func_name.is_none() {
            self.shared
                .diags
                .type_error(line, "'return' statement used outside of a function.");
        }

        // Returning a pointer local transfers ownership to the caller.
        if let Some(expr) = value {
            if let Some(name) = expr.ident_name() {
                if self.ret_type.is_pointer() {
                    if let Some(slot) = self.resolve_local(name) {
                        self.locals[slot].holds_alloc = false;
                    }
                }
            }
        }

        let func_label = self.func_name.clone().unwrap_or_default();
        if self.ret_type == Ty::Void {
            if value.is_some() {
                self.shared.diags.type_error(
                    line,
                    format!("void function '{}' must not return a value.", func_label),
                );
            }
        } else if !self.ret_type.is_dynamic() {
            let actual = value.map(|e| self.infer(e)).unwrap_or(Ty::Null);
            if self.ret_type.is_pointer() {
                if !actual.is_pointer() && actual != Ty::Null && !actual.is_dynamic() {
                    self.shared.diags.type_error(
                        line,
                        format!(
                            "function '{}' declared '{}' but returns non-pointer.",
                            func_label, self.ret_type
                        ),
                    );
                }
            } else if actual.is_pointer() {
                self.shared.diags.warning(
                    line,
                    "returning pointer from non-pointer return type; caller cannot free this pointer.",
                );
            } else if self.shared.opts.mode == CompileMode::Static
                && !actual.is_dynamic()
                && !Ty::compatible(&self.ret_type, &actual)
            {
                self.shared.diags.type_error(
                    line,
                    format!(
                        "return type mismatch in '{}': expected '{}' got '{}'.",
                        func_label, self.ret_type, actual
                    ),
                );
            }
        }

        match value {
            Some(expr) => self.compile_expr(expr),
            None => self.emit(OpCode::Null, line),
        }

        // Leak check: every live allocation must have been freed or escape
        // through the return expression.
        for i in 0..self.locals.len() {
            if !self.locals[i].holds_alloc {
                continue;
            }
            if let Some(expr) = value {
                let scan = analysis::scan_expression(expr, &self.locals[i].name.clone());
                if scan.direct_uses > 0 {
                    self.locals[i].holds_alloc = false;
                    continue;
                }
            }
            let name = self.locals[i].name.clone();
            self.leak_diagnostic(
                line,
                format!(
                    "Memory leak detected. Pointer '{}' goes out of scope without being freed.",
                    name
                ),
            );
            self.locals[i].holds_alloc = false;
        }

        self.emit(OpCode::Return, line);
    }

    fn compile_try_catch(
        &mut self,
        try_block: &Stmt,
        err_var: Option<&str>,
        catch_block: &Stmt,
        line: u32,
    ) {
        let try_begin = self.emit_jump(OpCode::TryBegin(0), line);
        self.compile_stmt(try_block);
        self.emit(OpCode::TryEnd, line);
        let skip_catch = self.emit_jump(OpCode::Jump(0), line);

        // Catch target: the thrown value is on the stack top. The normal
        // path jumps straight past the catch, so every scope opened here
        // must close before the join.
        self.patch_jump(try_begin);
        match err_var {
            Some(name) => {
                // The error value sits exactly where the new local's slot
                // is, so declaring it binds the value.
                self.begin_scope(line);
                self.add_local(name, Ty::Str, line);
                self.compile_stmt(catch_block);
                self.end_scope(line);
            }
            None => {
                self.emit(OpCode::Pop, line);
                self.compile_stmt(catch_block);
            }
        }
        self.patch_jump(skip_catch);
    }

    fn compile_break(&mut self, line: u32) {
        let Some(loop_depth) = self.loops.last().map(|l| l.scope_depth) else {
            self.shared
                .diags
                .type_error(line, "'break' used outside of loop.");
            return;
        };
        self.discard_loop_locals(loop_depth, line);
        let offset = self.emit_jump(OpCode::Jump(0), line);
        self.loops
            .last_mut()
            .expect("checked above")
            .breaks
            .push(offset);
    }

    fn compile_continue(&mut self, line: u32) {
        let Some((loop_depth, kind, start)) = self
            .loops
            .last()
            .map(|l| (l.scope_depth, l.kind, l.start))
        else {
            self.shared
                .diags
                .type_error(line, "'continue' used outside of loop.");
            return;
        };
        self.discard_loop_locals(loop_depth, line);
        match kind {
            LoopKind::While => self.emit_loop(start, line),
            LoopKind::ForIn => {
                let offset = self.emit_jump(OpCode::Jump(0), line);
                self.loops
                    .last_mut()
                    .expect("checked above")
                    .continues
                    .push(offset);
            }
        }
    }

    /// Pop the locals declared inside the loop body and rebalance the
    /// runtime scope depth for the scopes the jump will skip out of.
    fn discard_loop_locals(&mut self, loop_depth: u32, line: u32) {
        let pops = self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > loop_depth)
            .count();
        for _ in 0..pops {
            self.emit(OpCode::Pop, line);
        }
        let mut depth = self.scope_depth;
        while depth > loop_depth {
            self.emit(OpCode::ExitScope, line);
            depth -= 1;
        }
    }
}
