// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Compile diagnostics.
//!
//! The compiler never stops at the first problem: errors and warnings
//! accumulate here and the driver prints them in order. Notes carry the
//! auto-free stream, which is informational and already formatted.

use std::fmt;

/// Severity and printed prefix of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// `[Line N] Error: ...`
    Error,
    /// `[Line N] Type Error: ...`
    TypeError,
    /// `[Line N] Warning: ...`
    Warning,
}

/// A single compile diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "Error",
            Severity::TypeError => "Type Error",
            Severity::Warning => "Warning",
        };
        write!(f, "[Line {}] {}: {}", self.line, label, self.message)
    }
}

/// Accumulated diagnostics for one compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Informational lines (the auto-free note stream), pre-formatted.
    pub notes: Vec<String>,
}

impl Diagnostics {
    pub fn error(&mut self, line: u32, message: impl Into<String>) {
        self.errors.push(Diagnostic {
            severity: Severity::Error,
            line,
            message: message.into(),
        });
    }

    pub fn type_error(&mut self, line: u32, message: impl Into<String>) {
        self.errors.push(Diagnostic {
            severity: Severity::TypeError,
            line,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, line: u32, message: impl Into<String>) {
        self.warnings.push(Diagnostic {
            severity: Severity::Warning,
            line,
            message: message.into(),
        });
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// First error message, if any; handy in tests.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.errors.first()
    }
}
