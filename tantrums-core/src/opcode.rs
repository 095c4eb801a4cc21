// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode instruction definitions.
//!
//! Instructions operate on a value stack. Jump offsets are relative to the
//! instruction pointer after the jump instruction has been read. Constant
//! pool indices are 16-bit; local slots and argument counts are one byte.

/// Target of a `CAST` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Float,
    Str,
    Bool,
}

impl CastKind {
    pub fn from_byte(b: u8) -> Option<CastKind> {
        match b {
            0 => Some(CastKind::Int),
            1 => Some(CastKind::Float),
            2 => Some(CastKind::Str),
            3 => Some(CastKind::Bool),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            CastKind::Int => 0,
            CastKind::Float => 1,
            CastKind::Str => 2,
            CastKind::Bool => 3,
        }
    }
}

/// Bytecode instructions for the Tantrums VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    // =========================================================================
    // Constants & literals
    // =========================================================================
    /// Push constant from the constant pool.
    Constant(u16),

    /// Push null.
    Null,

    /// Push true.
    True,

    /// Push false.
    False,

    /// Pop the top value.
    Pop,

    // =========================================================================
    // Arithmetic
    // =========================================================================
    /// Overloaded addition: numbers, string concatenation (with auto
    /// stringification of the other side), list/range concatenation.
    Add,

    Sub,
    Mul,
    /// Division; division by zero is a runtime error.
    Div,
    /// Modulo; zero divisor is a runtime error, floats only when whole.
    Mod,
    /// Unary negation.
    Negate,

    // =========================================================================
    // Comparison & logic
    // =========================================================================
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    /// Boolean not; non-boolean operand is a runtime error.
    Not,

    // =========================================================================
    // Variables
    // =========================================================================
    /// Push stack[frame_base + n].
    GetLocal(u8),

    /// stack[frame_base + n] = peek(0); marks heap values escaped when the
    /// target slot sits below the current scope's base.
    SetLocal(u8),

    /// Look up a global by name (constants[n]).
    GetGlobal(u16),

    /// Assign an existing global; heap values stored globally escape.
    SetGlobal(u16),

    /// Define a global; heap values stored globally escape.
    DefineGlobal(u16),

    // =========================================================================
    // Control flow
    // =========================================================================
    /// Unconditional relative jump.
    Jump(i16),

    /// Jump if the top of stack is false. Requires a boolean; does not pop.
    JumpIfFalse(i16),

    /// Unconditional backward jump (loop closing).
    Loop(i16),

    // =========================================================================
    // Functions
    // =========================================================================
    /// Call with n arguments; callee sits below them. Natives are inlined,
    /// functions push a frame, and heap-typed arguments escape.
    Call(u8),

    /// Pop the return value, unwind scopes to the frame's saved depth,
    /// restore the caller and push the (escaped) result.
    Return,

    // =========================================================================
    // Collections
    // =========================================================================
    /// Build a list from the top n stack values.
    ListNew(u8),

    /// Build a map from the top n key/value pairs.
    MapNew(u8),

    /// Index read: list/string/map/range, plus the nth-occupied-entry query
    /// for maps used by for-in.
    IndexGet,

    /// Index write; the stored value escapes.
    IndexSet,

    /// Length of the top value (for-in lowering).
    Len,

    // =========================================================================
    // Memory / pointers
    // =========================================================================
    /// Wrap the top of stack in a fresh pointer cell. The operand names the
    /// allocation's type (constant index) and whether the pointer is
    /// auto-managed.
    Alloc { type_name: u16, auto_manage: bool },

    /// Release a pointer's cell; double free is a runtime error.
    Free,

    /// Address-of: wrap the top value in a pointer.
    PtrRef,

    /// Read through a pointer; invalid pointers raise.
    PtrDeref,

    /// Write through a pointer (value below pointer on the stack).
    PtrSet,

    // =========================================================================
    // Casting
    // =========================================================================
    Cast(CastKind),

    // =========================================================================
    // Exceptions
    // =========================================================================
    /// Pop a value and unwind to the innermost handler, or terminate.
    Throw,

    /// Push an exception handler whose catch block starts at the relative
    /// offset.
    TryBegin(i16),

    /// Pop the handler after normal try-block completion.
    TryEnd,

    // =========================================================================
    // Scopes & iteration
    // =========================================================================
    /// Enter a lexical scope: bump depth, snapshot stack top and heap
    /// allocation marker.
    EnterScope,

    /// Leave a lexical scope and run the reaper over its allocations.
    ExitScope,

    /// Fused for-in step over the locals (iterable, length, counter): pushes
    /// the next element plus true and advances the counter, or pushes false
    /// when exhausted.
    ForInStep { iter: u8, len: u8, counter: u8 },
}

impl OpCode {
    /// Returns true if this instruction transfers control.
    #[inline]
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            OpCode::Jump(_)
                | OpCode::JumpIfFalse(_)
                | OpCode::Loop(_)
                | OpCode::Call(_)
                | OpCode::Return
                | OpCode::Throw
        )
    }

    /// The stack effect of this instruction (positive = push), or None for
    /// instructions with variable effects.
    #[inline]
    pub fn stack_effect(&self) -> Option<i16> {
        Some(match self {
            OpCode::Constant(_)
            | OpCode::Null
            | OpCode::True
            | OpCode::False
            | OpCode::GetLocal(_)
            | OpCode::GetGlobal(_) => 1,

            OpCode::Pop | OpCode::DefineGlobal(_) => -1,

            OpCode::Negate
            | OpCode::Not
            | OpCode::SetLocal(_)
            | OpCode::SetGlobal(_)
            | OpCode::Len
            | OpCode::Alloc { .. }
            | OpCode::PtrRef
            | OpCode::PtrDeref
            | OpCode::Cast(_) => 0,

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Eq
            | OpCode::Neq
            | OpCode::Lt
            | OpCode::Gt
            | OpCode::Lte
            | OpCode::Gte
            | OpCode::IndexGet => -1,

            OpCode::IndexSet => -3,
            OpCode::Free | OpCode::Throw => -1,
            OpCode::PtrSet => -2,

            OpCode::Jump(_) | OpCode::JumpIfFalse(_) | OpCode::Loop(_) => 0,
            OpCode::TryBegin(_) | OpCode::TryEnd => 0,
            OpCode::EnterScope | OpCode::ExitScope => 0,

            OpCode::ListNew(n) => 1 - *n as i16,
            OpCode::MapNew(n) => 1 - 2 * *n as i16,

            // Variable effect: consumes argc + callee; ForInStep pushes one
            // or two values.
            OpCode::Call(_) | OpCode::Return | OpCode::ForInStep { .. } => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_kind_byte_roundtrip() {
        for kind in [CastKind::Int, CastKind::Float, CastKind::Str, CastKind::Bool] {
            assert_eq!(CastKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(CastKind::from_byte(9), None);
    }

    #[test]
    fn stack_effects() {
        assert_eq!(OpCode::Constant(0).stack_effect(), Some(1));
        assert_eq!(OpCode::Add.stack_effect(), Some(-1));
        assert_eq!(OpCode::ListNew(3).stack_effect(), Some(-2));
        assert_eq!(OpCode::MapNew(2).stack_effect(), Some(-3));
        assert_eq!(OpCode::Call(2).stack_effect(), None);
    }
}
