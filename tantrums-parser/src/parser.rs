// tantrums-parser - Lexer, AST and parser for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Recursive-descent parser for Tantrums.
//!
//! Expressions use precedence climbing (`||` < `&&` < equality < comparison
//! < term < factor < unary < call). Compound assignments and `++`/`--` are
//! desugared here into plain assignments so the compiler only ever sees
//! `name = name <op> expr` (postfix forms keep their own node so the old
//! value can be left on the stack).

use std::fmt;

use crate::ast::{BinaryOp, Expr, ExprKind, FuncDecl, Param, Program, Stmt, StmtKind, UnaryOp};
use crate::token::{Token, TokenKind};

/// Parse error: what was expected, what was found, and where.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub found: String,
    pub line: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Line {}] Error: {} (got '{}')",
            self.line, self.message, self.found
        )
    }
}

impl std::error::Error for ParseError {}

type Result<T> = std::result::Result<T, ParseError>;

/// The parser consumes a token list and produces a [`Program`].
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse the whole token stream into a program.
    pub fn parse(mut self) -> Result<Program> {
        let mut program = Program::default();
        while !self.is_at_end() {
            program.decls.push(self.declaration()?);
        }
        Ok(program)
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        !self.is_at_end() && self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            Err(self.error(message))
        }
    }

    fn expect_ident(&mut self, message: &str) -> Result<(String, u32)> {
        if let TokenKind::Ident(name) = self.peek_kind() {
            let name = name.clone();
            let line = self.peek().line;
            self.advance();
            Ok((name, line))
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            found: self.peek_kind().to_string(),
            line: self.peek().line,
        }
    }

    /// Consume a type annotation: a type keyword plus any `*` suffixes.
    /// Returns the spelled type name (`"int"`, `"int*"`, ...).
    fn type_annotation(&mut self) -> String {
        let mut name = self
            .peek_kind()
            .type_name()
            .expect("caller checked for a type keyword")
            .to_string();
        self.advance();
        while self.eat(&TokenKind::Star) {
            name.push('*');
        }
        name
    }

    /// Whether the tokens at the cursor look like `Type ['*'...] ident`.
    fn at_typed_declaration(&self) -> bool {
        if !self.peek_kind().is_type_keyword() {
            return false;
        }
        let mut offset = 1;
        while self.peek_at(offset) == Some(&TokenKind::Star) {
            offset += 1;
        }
        matches!(self.peek_at(offset), Some(TokenKind::Ident(_)))
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn declaration(&mut self) -> Result<Stmt> {
        if self.eat(&TokenKind::Use) {
            return self.use_declaration();
        }
        if self.eat(&TokenKind::Tantrum) {
            return self.func_declaration();
        }
        if self.at_typed_declaration() {
            return self.var_declaration();
        }
        self.statement()
    }

    fn use_declaration(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        // The filename is whatever tokens sit before the semicolon.
        let mut file = String::new();
        while !self.check(&TokenKind::Semicolon) && !self.is_at_end() {
            let tok = self.advance();
            file.push_str(&tok.kind.to_string());
        }
        self.expect(&TokenKind::Semicolon, "Expected ';' after use statement.")?;
        Ok(Stmt::new(StmtKind::Use(file), line))
    }

    fn func_declaration(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        let ret_type = if self.peek_kind().is_type_keyword() {
            Some(self.type_annotation())
        } else {
            None
        };
        let (name, _) = self.expect_ident("Expected function name.")?;
        self.expect(&TokenKind::LParen, "Expected '(' after function name.")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let type_name = if self.peek_kind().is_type_keyword() {
                    Some(self.type_annotation())
                } else {
                    None
                };
                let (param_name, _) = self.expect_ident("Expected parameter name.")?;
                params.push(Param {
                    name: param_name,
                    type_name,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "Expected ')'.")?;
        self.expect(&TokenKind::LBrace, "Expected '{'.")?;
        let body = self.block()?;

        Ok(Stmt::new(
            StmtKind::FuncDecl(FuncDecl {
                name,
                ret_type,
                params,
                body: Box::new(body),
            }),
            line,
        ))
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        let type_name = self.type_annotation();
        let (name, _) = self.expect_ident("Expected variable name.")?;
        let init = if self.eat(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(
            &TokenKind::Semicolon,
            "Expected ';' after variable declaration.",
        )?;
        Ok(Stmt::new(
            StmtKind::VarDecl {
                type_name: Some(type_name),
                name,
                init,
            },
            line,
        ))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn statement(&mut self) -> Result<Stmt> {
        if self.eat(&TokenKind::If) {
            return self.if_statement();
        }
        if self.eat(&TokenKind::While) {
            return self.while_statement();
        }
        if self.eat(&TokenKind::For) {
            return self.for_statement();
        }
        if self.eat(&TokenKind::Try) {
            return self.try_statement();
        }
        if self.eat(&TokenKind::Return) {
            let line = self.previous().line;
            let value = if self.check(&TokenKind::Semicolon) {
                None
            } else {
                Some(self.expression()?)
            };
            self.expect(&TokenKind::Semicolon, "Expected ';' after return.")?;
            return Ok(Stmt::new(StmtKind::Return(value), line));
        }
        if self.eat(&TokenKind::Throw) {
            let line = self.previous().line;
            let value = self.expression()?;
            self.expect(&TokenKind::Semicolon, "Expected ';' after throw.")?;
            return Ok(Stmt::new(StmtKind::Throw(value), line));
        }
        if self.eat(&TokenKind::Free) {
            let line = self.previous().line;
            let value = self.expression()?;
            self.expect(&TokenKind::Semicolon, "Expected ';' after free.")?;
            return Ok(Stmt::new(StmtKind::Free(value), line));
        }
        if self.eat(&TokenKind::Break) {
            let line = self.previous().line;
            self.expect(&TokenKind::Semicolon, "Expected ';' after break.")?;
            return Ok(Stmt::new(StmtKind::Break, line));
        }
        if self.eat(&TokenKind::Continue) {
            let line = self.previous().line;
            self.expect(&TokenKind::Semicolon, "Expected ';' after continue.")?;
            return Ok(Stmt::new(StmtKind::Continue, line));
        }
        if self.eat(&TokenKind::LBrace) {
            return self.block();
        }

        self.expression_statement()
    }

    fn block(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            stmts.push(self.declaration()?);
        }
        self.expect(&TokenKind::RBrace, "Expected '}'.")?;
        Ok(Stmt::new(StmtKind::Block(stmts), line))
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        self.expect(&TokenKind::LParen, "Expected '(' after 'if'.")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "Expected ')'.")?;
        self.expect(&TokenKind::LBrace, "Expected '{'.")?;
        let then_block = self.block()?;
        let else_block = if self.eat(&TokenKind::Else) {
            if self.eat(&TokenKind::If) {
                Some(Box::new(self.if_statement()?))
            } else {
                self.expect(&TokenKind::LBrace, "Expected '{'.")?;
                Some(Box::new(self.block()?))
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_block: Box::new(then_block),
                else_block,
            },
            line,
        ))
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        self.expect(&TokenKind::LParen, "Expected '(' after 'while'.")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "Expected ')'.")?;
        self.expect(&TokenKind::LBrace, "Expected '{'.")?;
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::While {
                cond,
                body: Box::new(body),
            },
            line,
        ))
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        let (var, _) = self.expect_ident("Expected variable name after 'for'.")?;
        self.expect(&TokenKind::In, "Expected 'in' after variable in for loop.")?;
        let iterable = self.expression()?;
        self.expect(&TokenKind::LBrace, "Expected '{'.")?;
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::ForIn {
                var,
                iterable,
                body: Box::new(body),
            },
            line,
        ))
    }

    fn try_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        self.expect(&TokenKind::LBrace, "Expected '{' after 'try'.")?;
        let try_block = self.block()?;
        self.expect(&TokenKind::Catch, "Expected 'catch' after try block.")?;
        let err_var = if self.eat(&TokenKind::LParen) {
            let (name, _) = self.expect_ident("Expected error variable name.")?;
            self.expect(&TokenKind::RParen, "Expected ')'.")?;
            Some(name)
        } else {
            None
        };
        self.expect(&TokenKind::LBrace, "Expected '{' after 'catch'.")?;
        let catch_block = self.block()?;
        Ok(Stmt::new(
            StmtKind::TryCatch {
                try_block: Box::new(try_block),
                err_var,
                catch_block: Box::new(catch_block),
            },
            line,
        ))
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;
        let line = expr.line;

        // Compound assignment: `i += e` and friends desugar to `i = i op e`.
        if let Some(op) = self.compound_op() {
            if let Some(name) = expr.ident_name() {
                let name = name.to_string();
                self.advance();
                let rhs = self.expression()?;
                let desugared = Expr::new(
                    ExprKind::Assign {
                        name: name.clone(),
                        value: Box::new(Expr::new(
                            ExprKind::Binary {
                                op,
                                left: Box::new(Expr::new(ExprKind::Ident(name), line)),
                                right: Box::new(rhs),
                            },
                            line,
                        )),
                    },
                    line,
                );
                self.expect(&TokenKind::Semicolon, "Expected ';' after assignment.")?;
                return Ok(Stmt::new(StmtKind::Expr(desugared), line));
            }
            return Err(self.error("Invalid compound assignment target."));
        }

        // Plain assignment: identifier, index, or `*ptr` targets.
        if self.eat(&TokenKind::Equal) {
            let assign = self.assignment_target(expr)?;
            self.expect(&TokenKind::Semicolon, "Expected ';' after assignment.")?;
            return Ok(Stmt::new(StmtKind::Expr(assign), line));
        }

        self.expect(&TokenKind::Semicolon, "Expected ';' after expression.")?;
        Ok(Stmt::new(StmtKind::Expr(expr), line))
    }

    fn compound_op(&self) -> Option<BinaryOp> {
        match self.peek_kind() {
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Mod),
            _ => None,
        }
    }

    fn assignment_target(&mut self, target: Expr) -> Result<Expr> {
        let line = target.line;
        match target.kind {
            ExprKind::Ident(name) => {
                let value = self.expression()?;
                Ok(Expr::new(
                    ExprKind::Assign {
                        name,
                        value: Box::new(value),
                    },
                    line,
                ))
            }
            ExprKind::Index { object, index } => {
                let value = self.expression()?;
                Ok(Expr::new(
                    ExprKind::IndexAssign {
                        object,
                        index: Some(index),
                        value: Box::new(value),
                    },
                    line,
                ))
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let value = self.expression()?;
                Ok(Expr::new(
                    ExprKind::IndexAssign {
                        object: operand,
                        index: None,
                        value: Box::new(value),
                    },
                    line,
                ))
            }
            _ => Err(self.error("Invalid assignment target.")),
        }
    }

    // =========================================================================
    // Expressions (precedence climbing)
    // =========================================================================

    fn expression(&mut self) -> Result<Expr> {
        self.logic_or()
    }

    fn logic_or(&mut self) -> Result<Expr> {
        let mut left = self.logic_and()?;
        while self.eat(&TokenKind::Or) {
            let line = self.previous().line;
            let right = self.logic_and()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn logic_and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&TokenKind::And) {
            let line = self.previous().line;
            let right = self.equality()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::Neq,
                _ => break,
            };
            self.advance();
            let line = self.previous().line;
            let right = self.comparison()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::LessEqual => BinaryOp::Lte,
                TokenKind::GreaterEqual => BinaryOp::Gte,
                _ => break,
            };
            self.advance();
            let line = self.previous().line;
            let right = self.term()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let line = self.previous().line;
            let right = self.factor()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let line = self.previous().line;
            let right = self.unary()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Ampersand => Some(UnaryOp::AddrOf),
            TokenKind::Star => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let line = self.previous().line;
            let operand = self.unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                line,
            ));
        }

        // Prefix ++i / --i desugars to `i = i + 1` (value is the new value).
        if matches!(
            self.peek_kind(),
            TokenKind::PlusPlus | TokenKind::MinusMinus
        ) {
            let increment = self.peek_kind() == &TokenKind::PlusPlus;
            self.advance();
            let line = self.previous().line;
            let (name, _) = self.expect_ident("Expected variable after '++' / '--'.")?;
            let one = Expr::new(ExprKind::Int(1), line);
            let var_ref = Expr::new(ExprKind::Ident(name.clone()), line);
            return Ok(Expr::new(
                ExprKind::Assign {
                    name,
                    value: Box::new(Expr::new(
                        ExprKind::Binary {
                            op: if increment { BinaryOp::Add } else { BinaryOp::Sub },
                            left: Box::new(var_ref),
                            right: Box::new(one),
                        },
                        line,
                    )),
                },
                line,
            ));
        }

        self.call_expr()
    }

    fn call_expr(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::LParen) {
                let line = self.previous().line;
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "Expected ')'.")?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    line,
                );
            } else if self.eat(&TokenKind::LBracket) {
                let line = self.previous().line;
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "Expected ']'.")?;
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if matches!(
                self.peek_kind(),
                TokenKind::PlusPlus | TokenKind::MinusMinus
            ) {
                // Postfix i++ / i-- keeps the old value on the stack.
                if let Some(name) = expr.ident_name() {
                    let name = name.to_string();
                    let increment = self.peek_kind() == &TokenKind::PlusPlus;
                    self.advance();
                    expr = Expr::new(
                        ExprKind::Postfix { increment, name },
                        self.previous().line,
                    );
                } else {
                    return Err(self.error("Invalid operand for postfix operation."));
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.peek().line;
        let kind = match self.peek_kind().clone() {
            TokenKind::Int(n) => {
                self.advance();
                ExprKind::Int(n)
            }
            TokenKind::Float(f) => {
                self.advance();
                ExprKind::Float(f)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen, "Expected ')'.")?;
                return Ok(expr);
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "Expected ']'.")?;
                ExprKind::ListLit(items)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = self.expression()?;
                        self.expect(&TokenKind::Colon, "Expected ':' in map literal.")?;
                        let value = self.expression()?;
                        pairs.push((key, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace, "Expected '}'.")?;
                ExprKind::MapLit(pairs)
            }
            TokenKind::Alloc => {
                self.advance();
                let type_name = if self.peek_kind().is_type_keyword() {
                    self.type_annotation()
                } else {
                    let (name, _) = self.expect_ident("Expected type after 'alloc'.")?;
                    name
                };
                self.expect(&TokenKind::LParen, "Expected '(' after alloc type.")?;
                let init = self.expression()?;
                self.expect(&TokenKind::RParen, "Expected ')'.")?;
                ExprKind::Alloc {
                    type_name,
                    init: Box::new(init),
                }
            }
            _ => return Err(self.error("Unexpected token")),
        };
        Ok(Expr::new(kind, line))
    }
}
