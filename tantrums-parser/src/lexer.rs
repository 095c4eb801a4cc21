// tantrums-parser - Lexer, AST and parser for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Lexer (tokeniser) for Tantrums source code.
//!
//! Converts a source string into a stream of tokens. Directives (`#mode`,
//! `#autoFree`, `#allowMemoryLeaks`) are stripped by the driver before the
//! lexer runs; an unrecognised `#` directive reaching the lexer is an error.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::token::{Token, TokenKind};

/// Lexer error with position information.
#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub line: u32,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Line {}] Lexer error: {}", self.line, self.message)
    }
}

impl std::error::Error for LexerError {}

/// The lexer converts source code into tokens.
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over the given source string.
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    /// Scan the whole source into a token list, ending with `Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    /// Scan a single token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace_and_comments();

        let line = self.line;
        let c = match self.chars.next() {
            Some(c) => c,
            None => return Ok(Token::new(TokenKind::Eof, line)),
        };

        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(Token::new(self.identifier(c), line));
        }
        if c.is_ascii_digit() {
            return self.number(c, line);
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '+' => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusEqual
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    TokenKind::SlashEqual
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    TokenKind::PercentEqual
                } else {
                    TokenKind::Percent
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::And
                } else {
                    TokenKind::Ampersand
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::Or
                } else {
                    return Err(self.error("Expected '||'."));
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::EqualEqual
                } else if self.eat('>') {
                    // Reversed form `=>` accepted for `>=`.
                    TokenKind::GreaterEqual
                } else if self.eat('<') {
                    // Reversed form `=<` accepted for `<=`.
                    TokenKind::LessEqual
                } else {
                    TokenKind::Equal
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '"' => return self.string(line),
            '#' => return Err(self.error("Unknown directive.")),
            other => {
                return Err(self.error(&format!("Unexpected character '{}'.", other)));
            }
        };

        Ok(Token::new(kind, line))
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some(' ') | Some('\r') | Some('\t') => {
                    self.chars.next();
                }
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            // Line comment
                            while let Some(&c) = self.chars.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.chars.next();
                            }
                        }
                        Some('*') => {
                            // Block comment
                            self.chars.next();
                            self.chars.next();
                            loop {
                                match self.chars.next() {
                                    Some('\n') => self.line += 1,
                                    Some('*') => {
                                        if self.eat('/') {
                                            break;
                                        }
                                    }
                                    Some(_) => {}
                                    None => break,
                                }
                            }
                        }
                        _ => return,
                    }
                }
                _ => return,
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::new();
        name.push(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        keyword_kind(&name).unwrap_or(TokenKind::Ident(name))
    }

    fn number(&mut self, first: char, line: u32) -> Result<Token, LexerError> {
        let mut text = String::new();
        text.push(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        let mut is_float = false;
        if self.chars.peek() == Some(&'.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('.');
                self.chars.next();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
            }
        }

        let kind = if is_float {
            match text.parse::<f64>() {
                Ok(f) => TokenKind::Float(f),
                Err(_) => return Err(self.error("Invalid float literal.")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Int(n),
                Err(_) => return Err(self.error("Integer literal out of range.")),
            }
        };
        Ok(Token::new(kind, line))
    }

    fn string(&mut self, line: u32) -> Result<Token, LexerError> {
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some('"') => break,
                Some('\\') => {
                    let escape = self
                        .chars
                        .next()
                        .ok_or_else(|| self.error("Unterminated string."))?;
                    match escape {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        '\\' => text.push('\\'),
                        '"' => text.push('"'),
                        '0' => text.push('\0'),
                        _ => return Err(self.error("Invalid escape sequence.")),
                    }
                }
                Some('\n') => {
                    self.line += 1;
                    text.push('\n');
                }
                Some(c) => text.push(c),
                None => return Err(self.error("Unterminated string.")),
            }
        }
        Ok(Token::new(TokenKind::Str(text), line))
    }

    fn error(&self, message: &str) -> LexerError {
        LexerError {
            message: message.to_string(),
            line: self.line,
        }
    }
}

fn keyword_kind(name: &str) -> Option<TokenKind> {
    let kind = match name {
        "tantrum" => TokenKind::Tantrum,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "return" => TokenKind::Return,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "alloc" => TokenKind::Alloc,
        "free" => TokenKind::Free,
        "throw" => TokenKind::Throw,
        "null" => TokenKind::Null,
        "use" => TokenKind::Use,
        "try" => TokenKind::Try,
        "catch" => TokenKind::Catch,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "int" => TokenKind::TyInt,
        "float" => TokenKind::TyFloat,
        "string" => TokenKind::TyString,
        "bool" => TokenKind::TyBool,
        "list" => TokenKind::TyList,
        "map" => TokenKind::TyMap,
        "void" => TokenKind::Void,
        _ => return None,
    };
    Some(kind)
}
