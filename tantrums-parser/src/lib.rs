// tantrums-parser - Lexer, AST and parser for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Front end for the Tantrums language: tokens, lexer, AST and parser.
//!
//! The driver strips directives (`#mode` and friends) before handing source
//! text to [`Lexer`]; [`Parser`] turns the token stream into an
//! [`ast::Program`] which the compiler in `tantrums-vm` lowers to bytecode.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::Program;
pub use lexer::{Lexer, LexerError};
pub use parser::{ParseError, Parser};
pub use token::{Token, TokenKind};

/// Convenience: lex and parse a source string in one go.
pub fn parse_source(source: &str) -> Result<Program, String> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| e.to_string())?;
    Parser::new(tokens).parse().map_err(|e| e.to_string())
}
