// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime errors for the VM.
//!
//! Every error first searches for an active exception handler; only an
//! unhandled one prints the `[Tantrums Runtime Error]` banner with a stack
//! trace. The `Display` text is what becomes the thrown string value when a
//! handler catches it.

/// Runtime error during VM execution.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// Operand stack exhausted.
    StackOverflow,
    /// Pop or peek past the bottom of the stack.
    StackUnderflow,
    /// Too many nested calls.
    CallDepthExceeded,
    /// Too many nested lexical scopes.
    ScopeDepthExceeded,
    /// Wrong operand type.
    TypeError { expected: String, got: String },
    /// Integer or float division by zero.
    DivisionByZero,
    /// Modulo by zero.
    ModuloByZero,
    /// Modulo on floats that are not whole numbers.
    NonIntegerModulo,
    /// Global lookup failed.
    UndefinedVariable(String),
    /// Callee is not a function or native.
    NotCallable(String),
    /// Argument count mismatch.
    ArityError {
        name: String,
        expected: usize,
        got: usize,
    },
    /// Unsupported container/index combination.
    BadIndex { container: String, index: String },
    /// A conditional jump or `!` saw a non-boolean.
    NonBooleanOperand(&'static str),
    /// Dereference of a value that is not a pointer.
    DerefNonPointer,
    /// Dereference of an invalid (freed or null) pointer.
    NullPointerDeref { type_name: String },
    /// Free of an already-invalid pointer.
    DoubleFree,
    /// Handler stack exhausted.
    TooManyHandlers,
    /// Invariant violation inside the VM.
    Internal(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::StackOverflow => write!(f, "Stack overflow!"),
            RuntimeError::StackUnderflow => write!(f, "Stack underflow."),
            RuntimeError::CallDepthExceeded => write!(f, "Stack overflow (too many calls)."),
            RuntimeError::ScopeDepthExceeded => write!(f, "Too many nested scopes."),
            RuntimeError::TypeError { expected, got } => {
                write!(f, "Expected {} but got {}.", expected, got)
            }
            RuntimeError::DivisionByZero => write!(f, "Division by zero."),
            RuntimeError::ModuloByZero => write!(f, "Modulo by zero."),
            RuntimeError::NonIntegerModulo => {
                write!(f, "Modulo requires whole numbers.")
            }
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeError::NotCallable(type_name) => {
                write!(f, "Can only call functions, got {}.", type_name)
            }
            RuntimeError::ArityError {
                name,
                expected,
                got,
            } => write!(f, "'{}' expected {} args but got {}.", name, expected, got),
            RuntimeError::BadIndex { container, index } => {
                write!(f, "Cannot index {} with {}.", container, index)
            }
            RuntimeError::NonBooleanOperand(context) => {
                write!(f, "Expected a boolean for {}.", context)
            }
            RuntimeError::DerefNonPointer => write!(f, "Cannot dereference a non-pointer."),
            RuntimeError::NullPointerDeref { type_name } => {
                write!(f, "Null pointer dereference of '{}' pointer!", type_name)
            }
            RuntimeError::DoubleFree => write!(f, "Double free detected."),
            RuntimeError::TooManyHandlers => write!(f, "Too many nested try blocks."),
            RuntimeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
