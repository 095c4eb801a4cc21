// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Call frames for the VM.

use tantrums_core::object::{Function, ObjBody, ObjRef};

/// A call frame on the VM's call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// The function object being executed.
    pub function: ObjRef,

    /// Instruction pointer (index into the function's chunk).
    pub ip: usize,

    /// Stack base: absolute index of slot 0 (the callee value).
    pub base: usize,

    /// Scope depth when the call was made; restored on return so scopes the
    /// callee left open are unwound by the reaper.
    pub saved_scope_depth: u32,
}

impl CallFrame {
    pub fn new(function: ObjRef, base: usize, saved_scope_depth: u32) -> Self {
        Self {
            function,
            ip: 0,
            base,
            saved_scope_depth,
        }
    }

    /// The compiled function behind this frame.
    pub fn function(&self) -> &Function {
        match &self.function.body {
            ObjBody::Function(f) => f,
            _ => unreachable!("call frames only hold function objects"),
        }
    }
}
