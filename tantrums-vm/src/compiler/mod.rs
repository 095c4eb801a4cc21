// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The bytecode compiler: single-pass lowering with type checking,
//! control-flow validation and escape analysis folded in.

pub mod analysis;
pub mod codegen;
pub mod diagnostics;
pub mod flow;
pub mod types;

pub use codegen::{compile, CompileMode, CompileOptions, CompileOutput};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
