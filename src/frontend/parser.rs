//! Parser for annotation bodies.
//!
//! This module implements a recursive descent parser with three entry
//! points: the tuning block of a `PerfTuning` annotation, the loop code
//! of a `Loop` annotation, and `int name = value` host declarations found
//! between annotations.

use crate::frontend::ast::{self, Item, Section, TransformArg, TuningBlock};
use crate::frontend::lexer::Lexer;
use crate::frontend::semantic;
use crate::frontend::token::{Token, TokenKind};
use crate::ir::expr::{Access, BinaryOp, Expr, UnaryOp};
use crate::ir::nest::{AssignOp, Decl, LValue, Loop, Stmt, TransformBlock};
use crate::utils::errors::AnnotationError;
use crate::utils::location::{SourceLocation, Span};

type Result<T> = std::result::Result<T, AnnotationError>;

/// A parser for annotation text.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
    /// Indices of the loops enclosing the statement being parsed
    loop_vars: Vec<String>,
}

impl<'a> Parser<'a> {
    /// Create a new parser from a lexer.
    pub fn new(mut lexer: Lexer<'a>) -> Result<Self> {
        let first_token = lexer.next_token()?;
        Ok(Self {
            lexer,
            current: first_token.clone(),
            previous: first_token,
            loop_vars: Vec::new(),
        })
    }

    /// Parser over a slice of a file starting at `origin`.
    pub fn with_origin(source: &'a str, origin: SourceLocation) -> Result<Self> {
        Self::new(Lexer::with_origin(source, origin))
    }

    /// Parse a standalone tuning-block expression.
    pub fn parse_expr_str(source: &str) -> Result<ast::Expr> {
        let mut parser = Parser::new(Lexer::new(source))?;
        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(expr)
    }

    // ----- tuning block -----

    /// Parse the body of a `PerfTuning` annotation.
    pub fn parse_tuning_block(&mut self) -> Result<TuningBlock> {
        let start = self.current.span;
        let mut sections = Vec::new();
        while !self.is_at_end() {
            sections.push(self.parse_section()?);
        }
        Ok(TuningBlock { sections, span: start.merge(&self.previous.span) })
    }

    fn parse_section(&mut self) -> Result<Section> {
        let start = self.current.span;
        self.consume(TokenKind::Def, "expected 'def' to start a section")?;
        let name = self.consume_identifier("expected a section name after 'def'")?;
        let span = start.merge(&self.previous.span);
        self.consume(TokenKind::LeftBrace, "expected '{' after the section name")?;

        let mut items = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            if self.match_token(TokenKind::Semicolon)? {
                continue;
            }
            items.push(self.parse_item()?);
        }
        self.consume(TokenKind::RightBrace, "expected '}' to close the section")?;
        Ok(Section { name, items, span })
    }

    fn parse_item(&mut self) -> Result<Item> {
        let start = self.current.span;
        let item = match self.current.kind {
            TokenKind::Param => {
                self.advance()?;
                let name = self.consume_identifier("expected a parameter name")?;
                let is_list = if self.match_token(TokenKind::LeftBracket)? {
                    self.consume(TokenKind::RightBracket, "expected ']' after '[' in a parameter declaration")?;
                    true
                } else {
                    false
                };
                self.consume(TokenKind::Equal, "expected '=' in a parameter declaration")?;
                let value = self.parse_expr()?;
                Item::Param { name, is_list, value, span: start }
            }
            TokenKind::Constraint => {
                self.advance()?;
                let name = self.consume_identifier("expected a constraint name")?;
                self.consume(TokenKind::Equal, "expected '=' in a constraint")?;
                let expr = self.parse_expr()?;
                Item::Constraint { name, expr, span: start }
            }
            TokenKind::Let => {
                self.advance()?;
                let name = self.consume_identifier("expected a name after 'let'")?;
                self.consume(TokenKind::Equal, "expected '=' after the 'let' name")?;
                let value = self.parse_expr()?;
                Item::Let { name, value, span: start }
            }
            TokenKind::Arg => {
                self.advance()?;
                let name = self.consume_identifier("expected an argument name")?;
                self.consume(TokenKind::Equal, "expected '=' after the argument name")?;
                let value = self.parse_expr()?;
                Item::Arg { name, value, span: start }
            }
            TokenKind::Decl => self.parse_decl_item()?,
            _ => return Err(self.error(&format!(
                "expected 'param', 'constraint', 'let', 'arg' or 'decl', found '{}'",
                self.current.lexeme
            ))),
        };
        self.match_token(TokenKind::Semicolon)?;
        let span = start.merge(&self.previous.span);
        Ok(match item {
            Item::Param { name, is_list, value, .. } => Item::Param { name, is_list, value, span },
            Item::Constraint { name, expr, .. } => Item::Constraint { name, expr, span },
            Item::Let { name, value, .. } => Item::Let { name, value, span },
            Item::Arg { name, value, .. } => Item::Arg { name, value, span },
            Item::Decl { is_static, ty, name, dims, init, .. } => Item::Decl { is_static, ty, name, dims, init, span },
        })
    }

    fn parse_decl_item(&mut self) -> Result<Item> {
        let start = self.current.span;
        self.consume(TokenKind::Decl, "expected 'decl'")?;
        let is_static = self.match_token(TokenKind::Static)?;
        let ty = match self.current.kind {
            TokenKind::Double | TokenKind::FloatType | TokenKind::Int | TokenKind::Identifier => {
                let ty = self.current.lexeme.clone();
                self.advance()?;
                ty
            }
            _ => return Err(self.error("expected a type in 'decl'")),
        };
        let name = self.consume_identifier("expected a variable name in 'decl'")?;
        let mut dims = Vec::new();
        while self.match_token(TokenKind::LeftBracket)? {
            dims.push(self.parse_expr()?);
            self.consume(TokenKind::RightBracket, "expected ']' after an array extent")?;
        }
        self.consume(TokenKind::Equal, "expected '=' and an initializer in 'decl'")?;
        let init = self.parse_expr()?;
        Ok(Item::Decl { is_static, ty, name, dims, init, span: start })
    }

    /// Parse a tuning-block expression.
    pub fn parse_expr(&mut self) -> Result<ast::Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ast::Expr> {
        let mut left = self.parse_and()?;
        while self.match_token(TokenKind::Or)? || self.match_token(TokenKind::PipePipe)? {
            let right = self.parse_and()?;
            left = binary(ast::BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ast::Expr> {
        let mut left = self.parse_not()?;
        while self.match_token(TokenKind::And)? || self.match_token(TokenKind::AmpAmp)? {
            let right = self.parse_not()?;
            left = binary(ast::BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ast::Expr> {
        let start = self.current.span;
        if self.match_token(TokenKind::Not)? || self.match_token(TokenKind::Bang)? {
            let operand = self.parse_not()?;
            let span = start.merge(&operand.span);
            return Ok(ast::Expr::new(
                ast::ExprKind::Unary { op: ast::UnaryOp::Not, operand: Box::new(operand) },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<ast::Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current.kind {
                TokenKind::EqualEqual => ast::BinaryOp::Eq,
                TokenKind::BangEqual => ast::BinaryOp::Ne,
                TokenKind::Less => ast::BinaryOp::Lt,
                TokenKind::LessEqual => ast::BinaryOp::Le,
                TokenKind::Greater => ast::BinaryOp::Gt,
                TokenKind::GreaterEqual => ast::BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<ast::Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => ast::BinaryOp::Add,
                TokenKind::Minus => ast::BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<ast::Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => ast::BinaryOp::Mul,
                TokenKind::Slash => ast::BinaryOp::Div,
                TokenKind::Percent => ast::BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<ast::Expr> {
        let start = self.current.span;
        if self.match_token(TokenKind::Minus)? {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(match operand.kind {
                ast::ExprKind::Int(v) => ast::Expr::new(ast::ExprKind::Int(-v), span),
                ast::ExprKind::Float(v) => ast::Expr::new(ast::ExprKind::Float(-v), span),
                kind => ast::Expr::new(
                    ast::ExprKind::Unary {
                        op: ast::UnaryOp::Neg,
                        operand: Box::new(ast::Expr::new(kind, operand.span)),
                    },
                    span,
                ),
            });
        }
        if self.match_token(TokenKind::Plus)? {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ast::Expr> {
        let start = self.current.span;
        let kind = match self.current.kind {
            TokenKind::Integer => {
                let value = self.int_value()?;
                self.advance()?;
                ast::ExprKind::Int(value)
            }
            TokenKind::Float => {
                let value = self.float_value()?;
                self.advance()?;
                ast::ExprKind::Float(value)
            }
            TokenKind::String => {
                let value = self.current.string_value().to_string();
                self.advance()?;
                ast::ExprKind::Str(value)
            }
            TokenKind::True => {
                self.advance()?;
                ast::ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance()?;
                ast::ExprKind::Bool(false)
            }
            TokenKind::Identifier => {
                let name = self.current.lexeme.clone();
                self.advance()?;
                if self.match_token(TokenKind::LeftParen)? {
                    let args = self.parse_expr_list(TokenKind::RightParen)?;
                    self.consume(TokenKind::RightParen, "expected ')' after call arguments")?;
                    ast::ExprKind::Call { func: name, args }
                } else {
                    ast::ExprKind::Name(name)
                }
            }
            TokenKind::LeftBracket => {
                self.advance()?;
                let items = self.parse_expr_list(TokenKind::RightBracket)?;
                self.consume(TokenKind::RightBracket, "expected ']' to close the list")?;
                ast::ExprKind::List(items)
            }
            TokenKind::LeftParen => {
                self.advance()?;
                if self.match_token(TokenKind::RightParen)? {
                    ast::ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.parse_expr()?;
                    if self.match_token(TokenKind::Comma)? {
                        let mut items = vec![first];
                        items.extend(self.parse_expr_list(TokenKind::RightParen)?);
                        self.consume(TokenKind::RightParen, "expected ')' to close the tuple")?;
                        ast::ExprKind::Tuple(items)
                    } else {
                        self.consume(TokenKind::RightParen, "expected ')'")?;
                        return Ok(ast::Expr::new(first.kind, start.merge(&self.previous.span)));
                    }
                }
            }
            _ => return Err(self.error(&format!("expected an expression, found '{}'", self.current.lexeme))),
        };
        Ok(ast::Expr::new(kind, start.merge(&self.previous.span)))
    }

    /// Comma-separated expressions up to (not including) `close`; a
    /// trailing comma is allowed.
    fn parse_expr_list(&mut self, close: TokenKind) -> Result<Vec<ast::Expr>> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expr()?);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        Ok(items)
    }

    // ----- loop code -----

    /// Parse the body of a `Loop` annotation.
    pub fn parse_loop_code(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.is_at_end() {
            stmts.extend(self.parse_statement()?);
        }
        Ok(stmts)
    }

    /// Parse one statement; declarations with several names yield several
    /// statements and `;` yields none.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>> {
        match self.current.kind {
            TokenKind::Transform => Ok(vec![self.parse_transform()?]),
            TokenKind::For => Ok(vec![self.parse_for()?]),
            TokenKind::If => Ok(vec![self.parse_if()?]),
            TokenKind::LeftBrace => Ok(vec![Stmt::Block(self.parse_block()?)]),
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(Vec::new())
            }
            TokenKind::Int | TokenKind::Double | TokenKind::FloatType => self.parse_declaration(),
            _ => Ok(vec![self.parse_assignment()?]),
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.consume(TokenKind::LeftBrace, "expected '{'")?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            stmts.extend(self.parse_statement()?);
        }
        self.consume(TokenKind::RightBrace, "expected '}' to close the block")?;
        Ok(stmts)
    }

    /// Body of a loop, branch or transform: a braced block or one statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>> {
        if self.check(TokenKind::LeftBrace) {
            self.parse_block()
        } else {
            self.parse_statement()
        }
    }

    fn parse_transform(&mut self) -> Result<Stmt> {
        let start = self.current.span;
        self.consume(TokenKind::Transform, "expected 'transform'")?;
        let name = self.consume_identifier("expected a transformation name after 'transform'")?;
        self.consume(TokenKind::LeftParen, "expected '(' after the transformation name")?;
        let mut args = Vec::new();
        while !self.check(TokenKind::RightParen) {
            let arg_start = self.current.span;
            let arg_name = self.consume_identifier("expected an argument name")?;
            self.consume(TokenKind::Equal, "expected '=' after the argument name")?;
            let value = self.parse_expr()?;
            args.push(TransformArg { name: arg_name, value, span: arg_start.merge(&self.previous.span) });
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::RightParen, "expected ')' to close the transformation arguments")?;
        let span = start.merge(&self.previous.span);
        let directives = semantic::lower_transform(&name, &args, span)?;
        let body = self.parse_body()?;
        if body.is_empty() {
            return Err(AnnotationError::malformed(
                format!("transform '{}' is not followed by a statement", name),
                span,
            ));
        }
        Ok(Stmt::Transform(Box::new(TransformBlock { name, directives, body, span })))
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let start = self.current.span;
        self.consume(TokenKind::For, "expected 'for'")?;
        self.consume(TokenKind::LeftParen, "expected '(' after 'for'")?;

        // init: [int] v = lower
        self.match_token(TokenKind::Int)?;
        let var = self.consume_identifier("expected the loop index")?;
        self.consume(TokenKind::Equal, "expected '=' in the loop initializer")?;
        let lower = self.parse_c_expr()?;
        self.consume(TokenKind::Semicolon, "expected ';' after the loop initializer")?;

        // test: v <= upper | v < upper
        let test_var = self.consume_identifier("expected the loop index in the loop test")?;
        if test_var != var {
            return Err(self.error(&format!("loop test must compare the index '{}'", var)));
        }
        let inclusive = match self.current.kind {
            TokenKind::LessEqual => true,
            TokenKind::Less => false,
            _ => return Err(self.error("only increasing loops with '<' or '<=' tests are supported")),
        };
        self.advance()?;
        let bound = self.parse_c_expr()?;
        let upper = if inclusive { bound } else { Expr::sub(bound, Expr::Int(1)).simplify() };
        self.consume(TokenKind::Semicolon, "expected ';' after the loop test")?;

        let step = self.parse_increment(&var)?;
        self.consume(TokenKind::RightParen, "expected ')' to close the loop header")?;

        if self.loop_vars.contains(&var) {
            return Err(AnnotationError::malformed(
                format!("loop index '{}' is already used by an enclosing loop", var),
                start.merge(&self.previous.span),
            ));
        }
        self.loop_vars.push(var.clone());
        let body = self.parse_body();
        self.loop_vars.pop();

        Ok(Stmt::Loop(Loop::new(var, lower.simplify(), upper.simplify(), step, body?)))
    }

    /// Increment clause: `v++`, `++v`, `v+=c` or `v=v+c` with constant `c > 0`.
    fn parse_increment(&mut self, var: &str) -> Result<i64> {
        if self.match_token(TokenKind::PlusPlus)? {
            let v = self.consume_identifier("expected the loop index after '++'")?;
            return if v == var { Ok(1) } else { Err(self.error("increment must update the loop index")) };
        }
        let v = self.consume_identifier("expected the loop increment")?;
        if v != var {
            return Err(self.error("increment must update the loop index"));
        }
        let step = if self.match_token(TokenKind::PlusPlus)? {
            Expr::Int(1)
        } else if self.match_token(TokenKind::PlusEqual)? {
            self.parse_c_expr()?
        } else if self.match_token(TokenKind::Equal)? {
            let rhs = self.parse_c_expr()?;
            Expr::sub(rhs, Expr::var(var)).simplify()
        } else {
            return Err(self.error("only increasing loops with a constant step are supported"));
        };
        match step.simplify().as_int() {
            Some(s) if s > 0 => Ok(s),
            _ => Err(self.error(&format!("loop step '{}' is not a positive constant", step))),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.consume(TokenKind::If, "expected 'if'")?;
        self.consume(TokenKind::LeftParen, "expected '(' after 'if'")?;
        let cond = self.parse_c_expr()?;
        self.consume(TokenKind::RightParen, "expected ')' after the condition")?;
        let then_branch = self.parse_body()?;
        let else_branch = if self.match_token(TokenKind::Else)? { self.parse_body()? } else { Vec::new() };
        Ok(Stmt::If { cond, then_branch, else_branch })
    }

    fn parse_declaration(&mut self) -> Result<Vec<Stmt>> {
        let ty = self.current.lexeme.clone();
        self.advance()?;
        let mut out = Vec::new();
        loop {
            let name = self.consume_identifier("expected a variable name in the declaration")?;
            let init = if self.match_token(TokenKind::Equal)? { Some(self.parse_c_expr()?) } else { None };
            out.push(Stmt::Decl(Decl { ty: ty.clone(), name, init }));
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::Semicolon, "expected ';' after the declaration")?;
        Ok(out)
    }

    fn parse_assignment(&mut self) -> Result<Stmt> {
        if self.match_token(TokenKind::PlusPlus)? || self.match_token(TokenKind::MinusMinus)? {
            let op = if self.previous.kind == TokenKind::PlusPlus { AssignOp::Add } else { AssignOp::Sub };
            let target = self.parse_lvalue()?;
            self.consume(TokenKind::Semicolon, "expected ';' after the statement")?;
            return Ok(Stmt::assign(target, op, Expr::Int(1)));
        }
        let target = self.parse_lvalue()?;
        let op = match self.current.kind {
            TokenKind::Equal => AssignOp::Set,
            TokenKind::PlusEqual => AssignOp::Add,
            TokenKind::MinusEqual => AssignOp::Sub,
            TokenKind::StarEqual => AssignOp::Mul,
            TokenKind::SlashEqual => AssignOp::Div,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.check(TokenKind::PlusPlus) { AssignOp::Add } else { AssignOp::Sub };
                self.advance()?;
                self.consume(TokenKind::Semicolon, "expected ';' after the statement")?;
                return Ok(Stmt::assign(target, op, Expr::Int(1)));
            }
            _ => return Err(self.error(&format!("expected an assignment operator, found '{}'", self.current.lexeme))),
        };
        self.advance()?;
        let value = self.parse_c_expr()?;
        self.consume(TokenKind::Semicolon, "expected ';' after the assignment")?;
        Ok(Stmt::assign(target, op, value))
    }

    fn parse_lvalue(&mut self) -> Result<LValue> {
        let name = self.consume_identifier("expected an assignment target")?;
        if self.check(TokenKind::LeftBracket) {
            Ok(LValue::Element(Access::new(name, self.parse_subscripts()?)))
        } else {
            Ok(LValue::Scalar(name))
        }
    }

    fn parse_subscripts(&mut self) -> Result<Vec<Expr>> {
        let mut indices = Vec::new();
        while self.match_token(TokenKind::LeftBracket)? {
            indices.push(self.parse_c_expr()?.simplify());
            self.consume(TokenKind::RightBracket, "expected ']' after the subscript")?;
        }
        Ok(indices)
    }

    /// Parse a C expression.
    pub fn parse_c_expr(&mut self) -> Result<Expr> {
        self.parse_c_binary(1)
    }

    /// Precedence climbing over C binary operators.
    fn parse_c_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_c_unary()?;
        loop {
            let (op, prec) = match self.current.kind {
                TokenKind::PipePipe => (BinaryOp::Or, 1),
                TokenKind::AmpAmp => (BinaryOp::And, 2),
                TokenKind::EqualEqual => (BinaryOp::Eq, 3),
                TokenKind::BangEqual => (BinaryOp::Ne, 3),
                TokenKind::Less => (BinaryOp::Lt, 4),
                TokenKind::LessEqual => (BinaryOp::Le, 4),
                TokenKind::Greater => (BinaryOp::Gt, 4),
                TokenKind::GreaterEqual => (BinaryOp::Ge, 4),
                TokenKind::Plus => (BinaryOp::Add, 5),
                TokenKind::Minus => (BinaryOp::Sub, 5),
                TokenKind::Star => (BinaryOp::Mul, 6),
                TokenKind::Slash => (BinaryOp::Div, 6),
                TokenKind::Percent => (BinaryOp::Mod, 6),
                _ => return Ok(left),
            };
            if prec < min_prec {
                return Ok(left);
            }
            self.advance()?;
            let right = self.parse_c_binary(prec + 1)?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_c_unary(&mut self) -> Result<Expr> {
        if self.match_token(TokenKind::Minus)? {
            return Ok(match self.parse_c_unary()? {
                Expr::Int(v) => Expr::Int(-v),
                Expr::Float(v) => Expr::Float(-v),
                e => Expr::Unary(UnaryOp::Neg, Box::new(e)),
            });
        }
        if self.match_token(TokenKind::Bang)? {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_c_unary()?)));
        }
        if self.match_token(TokenKind::Plus)? {
            return self.parse_c_unary();
        }
        self.parse_c_primary()
    }

    fn parse_c_primary(&mut self) -> Result<Expr> {
        match self.current.kind {
            TokenKind::Integer => {
                let value = self.int_value()?;
                self.advance()?;
                Ok(Expr::Int(value))
            }
            TokenKind::Float => {
                let value = self.float_value()?;
                self.advance()?;
                Ok(Expr::Float(value))
            }
            TokenKind::Identifier => {
                let name = self.current.lexeme.clone();
                self.advance()?;
                if self.match_token(TokenKind::LeftParen)? {
                    let mut args = Vec::new();
                    while !self.check(TokenKind::RightParen) {
                        args.push(self.parse_c_expr()?);
                        if !self.match_token(TokenKind::Comma)? {
                            break;
                        }
                    }
                    self.consume(TokenKind::RightParen, "expected ')' after call arguments")?;
                    Ok(match (name.as_str(), args.len()) {
                        ("min", 2) => {
                            let b = args.pop().unwrap_or(Expr::Int(0));
                            let a = args.pop().unwrap_or(Expr::Int(0));
                            Expr::min(a, b)
                        }
                        ("max", 2) => {
                            let b = args.pop().unwrap_or(Expr::Int(0));
                            let a = args.pop().unwrap_or(Expr::Int(0));
                            Expr::max(a, b)
                        }
                        _ => Expr::Call(name, args),
                    })
                } else if self.check(TokenKind::LeftBracket) {
                    Ok(Expr::Access(Access::new(name, self.parse_subscripts()?)))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            TokenKind::LeftParen => {
                self.advance()?;
                // (double) casts are dropped; arithmetic is in doubles already
                if matches!(self.current.kind, TokenKind::Double | TokenKind::FloatType | TokenKind::Int) {
                    self.advance()?;
                    self.consume(TokenKind::RightParen, "expected ')' after the cast type")?;
                    return self.parse_c_unary();
                }
                let inner = self.parse_c_expr()?;
                self.consume(TokenKind::RightParen, "expected ')'")?;
                Ok(inner)
            }
            _ => Err(self.error(&format!("expected an expression, found '{}'", self.current.lexeme))),
        }
    }

    // ----- host declarations -----

    /// Parse `int a = e1, b = e2, c;` and return the initialized names.
    pub fn parse_host_declaration(&mut self) -> Result<Vec<(String, Expr)>> {
        self.consume(TokenKind::Int, "expected 'int'")?;
        let mut out = Vec::new();
        loop {
            let name = self.consume_identifier("expected a variable name")?;
            if self.match_token(TokenKind::Equal)? {
                out.push((name, self.parse_c_expr()?));
            }
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.match_token(TokenKind::Semicolon)?;
        self.expect_end()?;
        Ok(out)
    }

    // ----- helpers -----

    fn int_value(&self) -> Result<i64> {
        self.current
            .lexeme
            .parse()
            .map_err(|_| self.error(&format!("integer literal '{}' is out of range", self.current.lexeme)))
    }

    fn float_value(&self) -> Result<f64> {
        self.current
            .lexeme
            .parse()
            .map_err(|_| self.error(&format!("invalid float literal '{}'", self.current.lexeme)))
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.current.kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Result<&Token> {
        let next = self.lexer.next_token()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(&self.previous)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error(&format!("{}, found '{}'", message, self.current_text())))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<String> {
        if self.check(TokenKind::Identifier) {
            let name = self.current.lexeme.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error(&format!("{}, found '{}'", message, self.current_text())))
        }
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error(&format!("unexpected '{}'", self.current.lexeme)))
        }
    }

    fn current_text(&self) -> &str {
        if self.is_at_end() { TokenKind::Eof.name() } else { &self.current.lexeme }
    }

    fn error(&self, message: &str) -> AnnotationError {
        AnnotationError::malformed(message, self.current.span)
    }
}

fn binary(op: ast::BinaryOp, left: ast::Expr, right: ast::Expr) -> ast::Expr {
    let span = left.span.merge(&right.span);
    ast::Expr::new(ast::ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::directive::Directive;
    use crate::utils::errors::AnnotationErrorKind;

    fn loop_code(src: &str) -> Result<Vec<Stmt>> {
        Parser::new(Lexer::new(src))?.parse_loop_code()
    }

    fn tuning(src: &str) -> Result<TuningBlock> {
        Parser::new(Lexer::new(src))?.parse_tuning_block()
    }

    #[test]
    fn test_tuning_sections() {
        let block = tuning(
            "def performance_params {
                param T1_I[] = [1,16,32];
                param U_I[] = [1]+range(2,17,2);
                constraint c1 = (T1_I == 1) or (T1_I % 16 == 0);
             }
             def input_vars { decl static double A[M][K] = random; decl double a0 = 32.12; }",
        )
        .unwrap();
        assert_eq!(block.sections.len(), 2);
        assert_eq!(block.sections[0].name, "performance_params");
        assert_eq!(block.sections[0].items.len(), 3);
        match &block.sections[1].items[0] {
            Item::Decl { is_static, name, dims, .. } => {
                assert!(*is_static);
                assert_eq!(name, "A");
                assert_eq!(dims.len(), 2);
            }
            other => panic!("expected decl, got {:?}", other),
        }
    }

    #[test]
    fn test_expr_precedence() {
        let e = Parser::parse_expr_str("a or b and not c == 1").unwrap();
        assert_eq!(e.to_string(), "(a or (b and not (c == 1)))");
        let e = Parser::parse_expr_str("-(2) + x * 3 % 2").unwrap();
        assert_eq!(e.to_string(), "(-2 + ((x * 3) % 2))");
        let e = Parser::parse_expr_str("(('ii','i'),T2,'iii')").unwrap();
        assert!(matches!(e.kind, ast::ExprKind::Tuple(ref items) if items.len() == 3));
    }

    #[test]
    fn test_loop_header_forms() {
        let stmts = loop_code("for (i=0; i<n; i+=2) a[i] = 0; for (int j=1; j<=n-1; j=j+1) { b[j]++; }").unwrap();
        assert_eq!(stmts.len(), 2);
        match &stmts[0] {
            Stmt::Loop(l) => {
                assert_eq!(l.upper.to_string(), "n-1");
                assert_eq!(l.step, 2);
            }
            other => panic!("expected loop, got {:?}", other),
        }
        match &stmts[1] {
            Stmt::Loop(l) => {
                assert_eq!(l.step, 1);
                assert_eq!(l.body.len(), 1);
            }
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_c_expression_precedence() {
        let stmts = loop_code("y[i] = y[i] + a1*x1[i] - (double)x2[i*n+j]/2;").unwrap();
        match &stmts[0] {
            Stmt::Assign(a) => assert_eq!(a.value.to_string(), "y[i]+a1*x1[i]-x2[i*n+j]/2"),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_statement() {
        let stmts = loop_code(
            "transform Composite(tile = [('i',T1,'ii')], unrolljam = (['i'],[U]), vector = (VEC, ['ivdep']))
             for (i=0; i<=n-1; i++) y[i] += x[i];",
        )
        .unwrap();
        match &stmts[0] {
            Stmt::Transform(t) => {
                assert_eq!(t.name, "Composite");
                assert_eq!(t.directives.len(), 3);
                assert!(matches!(t.directives[0], Directive::Tile(_)));
                assert_eq!(t.body.len(), 1);
            }
            other => panic!("expected transform, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_same_index_rejected() {
        let err = loop_code("for (i=0; i<=9; i++) for (i=0; i<=9; i++) a[i] = 0;").unwrap_err();
        assert_eq!(err.kind, AnnotationErrorKind::MalformedAnnotation);
        assert!(err.message.contains("'i'"));
    }

    #[test]
    fn test_decreasing_loop_rejected() {
        assert!(loop_code("for (i=9; i>=0; i--) a[i] = 0;").is_err());
        assert!(loop_code("for (i=0; i<=9; i+=0) a[i] = 0;").is_err());
    }

    #[test]
    fn test_host_declaration() {
        let mut p = Parser::new(Lexer::new("int m = M, p = K, n;")).unwrap();
        let bindings = p.parse_host_declaration().unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].0, "p");
    }

    #[test]
    fn test_error_span() {
        let err = tuning("def build {\n  arg = 3;\n}").unwrap_err();
        assert_eq!(err.span.start_line, 2);
    }
}
