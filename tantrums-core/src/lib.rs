// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Core runtime types for the Tantrums language.
//!
//! This crate holds everything the compiler and VM share: the tagged
//! [`Value`], the heap object model with its escape-tracking headers, the
//! per-VM [`Heap`] registry that stands in for the intrusive all-objects
//! list, bytecode [`Chunk`]s with their constant pools, and the built-in
//! natives exposed to programs.

pub mod builtins;
pub mod chunk;
pub mod hash;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod value;

pub use chunk::Chunk;
pub use heap::{Captured, FreeOutcome, Heap, ReapRecord};
pub use object::{
    EscapeState, Function, Native, NativeFn, Obj, ObjBody, ObjRef, PointerObj, Provenance, Range,
};
pub use opcode::{CastKind, OpCode};
pub use value::Value;
