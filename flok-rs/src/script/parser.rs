//! Flok parser: token stream → [`Program`].
//!
//! Statements are recognised by their leading token; expressions use
//! precedence climbing.  Operator precedence (lowest → highest):
//!   ternary  →  or  →  and  →  not  →  comparison  →  additive  →
//!   multiplicative  →  unary minus  →  power  →  postfix  →  primary
//!
//! The parser never recovers: the first error aborts the whole script.

use super::ast::*;
use super::lexer::{tokenize, Token, TokenKind};
use super::value::Value;
use crate::error::ParseError;

/// Script time advances in ticks; `wait N seconds` is converted at parse time.
pub const TICKS_PER_SECOND: f64 = 20.0;

/// Nesting limit for expressions and blocks, well below what would exhaust
/// the native stack.
const MAX_NESTING: usize = 64;

/// Command header keys accepted before the colon.
const COMMAND_METADATA: &[&str] = &["permission", "description", "aliases"];

/// Parse a complete script.  `file` labels diagnostics.
pub fn parse(src: &str, file: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(src, file)?;
    Parser::new(tokens, file).parse_program()
}

fn describe(tok: &Token) -> String {
    match &tok.kind {
        TokenKind::Eof => "end of file".to_owned(),
        TokenKind::Newline => "end of line".to_owned(),
        TokenKind::Indent => "indent".to_owned(),
        TokenKind::Dedent => "dedent".to_owned(),
        TokenKind::Str(s) => format!("\"{s}\""),
        _ => format!("'{}'", tok.lexeme),
    }
}

fn same_kind(a: &TokenKind, b: &TokenKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// A token usable as a bare name: identifiers and keywords.
fn name_of(tok: &Token) -> Option<&str> {
    match tok.kind {
        TokenKind::Str(_)
        | TokenKind::RuntimeVar(_)
        | TokenKind::PersistVar(_)
        | TokenKind::Number(_) => None,
        _ if tok.lexeme.starts_with(|c: char| c.is_alphabetic() || c == '_') => {
            Some(tok.lexeme.as_str())
        }
        _ => None,
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: &'a str,
    eof: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, file: &'a str) -> Self {
        let line = tokens.last().map_or(1, |t| t.line);
        let eof = Token { kind: TokenKind::Eof, lexeme: String::new(), line, spaced: true };
        Parser { tokens, pos: 0, file, eof, depth: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&self.eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: &TokenKind) -> bool {
        same_kind(self.peek_kind(), kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::grammar(message, self.file, self.peek().line)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("Expected {what} but got {}", describe(self.peek()))))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, ParseError> {
        match name_of(self.peek()) {
            Some(name) => {
                let name = name.to_owned();
                self.advance();
                Ok(name)
            }
            None => Err(self.error(format!("Expected {what} but got {}", describe(self.peek())))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof | TokenKind::Indent
        )
    }

    /// Simple statements must end at the end of their line.
    fn end_statement(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            _ => Err(self.error(format!("Expected end of line but got {}", describe(self.peek())))),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("Nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Whether `kind` occurs before the end of the current line.
    fn line_contains(&self, kind: &TokenKind) -> bool {
        self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .take_while(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Eof))
            .any(|t| same_kind(&t.kind, kind))
    }

    // ── Top level ─────────────────────────────────────────────────────────────

    fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&TokenKind::Eof) {
                break;
            }
            let item = match self.peek_kind() {
                TokenKind::On => Item::Event(self.parse_event()?),
                TokenKind::Command => Item::Command(self.parse_command()?),
                TokenKind::Function => Item::Function(self.parse_function()?),
                _ => Item::Stmt(self.parse_statement()?),
            };
            items.push(item);
        }
        Ok(Program { items })
    }

    fn parse_event(&mut self) -> Result<EventBlock, ParseError> {
        let line = self.advance().line;
        let mut words = Vec::new();
        while !matches!(
            self.peek_kind(),
            TokenKind::Colon | TokenKind::Newline | TokenKind::Eof
        ) {
            words.push(self.advance().lexeme);
        }
        if words.is_empty() {
            return Err(self.error("Expected event name after 'on'"));
        }
        self.eat(&TokenKind::Colon);
        let body = self.parse_block()?;
        Ok(EventBlock { event: words.join(" "), body, line })
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if !self.eat(&TokenKind::LParen) {
            return Ok(params);
        }
        while !self.eat(&TokenKind::RParen) {
            let tok = self.peek().clone();
            match &tok.kind {
                TokenKind::RuntimeVar(name) => {
                    params.push(name.clone());
                    self.advance();
                }
                _ => params.push(self.expect_name("parameter name")?),
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok(params)
    }

    fn metadata_key_ahead(&self) -> Option<String> {
        let key = name_of(self.peek())?.to_lowercase();
        let colon = same_kind(&self.peek_at(1).kind, &TokenKind::Colon);
        (colon && COMMAND_METADATA.contains(&key.as_str())).then_some(key)
    }

    fn parse_command(&mut self) -> Result<CommandBlock, ParseError> {
        let line = self.advance().line;
        let name = self.expect_name("command name")?.to_lowercase();
        let params = self.parse_params()?;
        let mut cmd = CommandBlock { name, params, line, ..Default::default() };

        while let Some(key) = self.metadata_key_ahead() {
            self.advance();
            self.advance();
            let mut value = String::new();
            loop {
                if self.at_line_end() || self.metadata_key_ahead().is_some() {
                    break;
                }
                // A colon at the end of the line closes the header.
                if self.check(&TokenKind::Colon)
                    && matches!(self.peek_at(1).kind, TokenKind::Newline | TokenKind::Eof)
                {
                    break;
                }
                let tok = self.advance();
                if tok.spaced && !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(&tok.lexeme);
            }
            match key.as_str() {
                "permission" => cmd.permission = Some(value),
                "description" => cmd.description = Some(value),
                _ => {
                    cmd.aliases = value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|a| !a.is_empty())
                        .map(str::to_lowercase)
                        .collect()
                }
            }
        }

        self.eat(&TokenKind::Colon);
        cmd.body = self.parse_block()?;
        Ok(cmd)
    }

    fn parse_function(&mut self) -> Result<FunctionDef, ParseError> {
        let line = self.advance().line;
        let name = self.expect_name("function name")?.to_lowercase();
        let params = self.parse_params()?;
        self.eat(&TokenKind::Colon);
        let body = self.parse_block()?;
        Ok(FunctionDef { name, params, body, line })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let line = self.peek().line;
        self.skip_newlines();
        if !self.eat(&TokenKind::Indent) {
            return Ok(Block::new(Vec::new(), line));
        }
        self.enter()?;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::Dedent | TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_statement()?);
        }
        self.eat(&TokenKind::Dedent);
        self.leave();
        Ok(Block::new(stmts, line))
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.peek().line;
        let kind = match self.peek_kind().clone() {
            TokenKind::If => return self.parse_if(),
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expression()?;
                self.eat(&TokenKind::Colon);
                let body = self.parse_block()?;
                return Ok(Stmt::new(StmtKind::While { cond, body }, line));
            }
            TokenKind::For => return self.parse_for(),
            TokenKind::Repeat
                if self.is_sugar(&TokenKind::Times) || self.line_contains(&TokenKind::Colon) =>
            {
                self.advance();
                let count = self.parse_expression()?;
                self.eat(&TokenKind::Times);
                self.eat(&TokenKind::Colon);
                let body = self.parse_block()?;
                return Ok(Stmt::new(StmtKind::Repeat { count, body }, line));
            }
            TokenKind::Wait => {
                self.advance();
                let amount = self.parse_expression()?;
                let ticks = if self.eat(&TokenKind::Seconds) {
                    let factor = Expr::literal(TICKS_PER_SECOND, line);
                    Expr::new(
                        ExprKind::Binary { op: BinOp::Mul, lhs: Box::new(amount), rhs: Box::new(factor) },
                        line,
                    )
                } else {
                    self.eat(&TokenKind::Ticks);
                    amount
                };
                StmtKind::Wait(ticks)
            }
            TokenKind::Return => {
                self.advance();
                if self.at_line_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expression()?))
                }
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Set => self.parse_set()?,
            TokenKind::Add if self.is_sugar(&TokenKind::To) => self.parse_sugar(BinOp::Add, &TokenKind::To)?,
            TokenKind::Remove if self.is_sugar(&TokenKind::From) => {
                self.parse_sugar(BinOp::Sub, &TokenKind::From)?
            }
            TokenKind::RuntimeVar(name) => self.parse_assignment(AssignTarget::Var(name))?,
            TokenKind::PersistVar(key) => self.parse_assignment(AssignTarget::Persist(key))?,
            TokenKind::Ident(name) if !same_kind(&self.peek_at(1).kind, &TokenKind::LParen) => {
                self.advance();
                let mut args = Vec::new();
                while !self.at_line_end() {
                    args.push(self.parse_expression()?);
                }
                StmtKind::Effect { name: name.to_lowercase(), args }
            }
            _ => StmtKind::Expr(self.parse_expression()?),
        };
        self.end_statement()?;
        Ok(Stmt::new(kind, line))
    }

    /// `add`/`remove`/`repeat` start a statement form unless they are a plain
    /// call like `remove(list, 0)`.
    fn is_sugar(&self, joiner: &TokenKind) -> bool {
        !same_kind(&self.peek_at(1).kind, &TokenKind::LParen) || self.line_contains(joiner)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let line = self.advance().line;
        let cond = self.parse_expression()?;
        self.eat(&TokenKind::Colon);
        let then = self.parse_block()?;
        let mut else_ifs = Vec::new();
        let mut otherwise = None;
        loop {
            self.skip_newlines();
            let chained_else_if = self.check(&TokenKind::Else)
                && same_kind(&self.peek_at(1).kind, &TokenKind::If);
            if self.check(&TokenKind::ElseIf) || chained_else_if {
                self.advance();
                if chained_else_if {
                    self.advance();
                }
                let c = self.parse_expression()?;
                self.eat(&TokenKind::Colon);
                else_ifs.push((c, self.parse_block()?));
            } else if self.eat(&TokenKind::Else) {
                self.eat(&TokenKind::Colon);
                otherwise = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::new(StmtKind::If { cond, then, else_ifs, otherwise }, line))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let line = self.advance().line;
        let var = match self.peek_kind().clone() {
            TokenKind::RuntimeVar(name) => {
                self.advance();
                name
            }
            _ => self.expect_name("loop variable")?,
        };
        self.expect(&TokenKind::In, "'in'")?;
        let iterable = self.parse_expression()?;
        self.eat(&TokenKind::Colon);
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::ForEach { var, iterable, body }, line))
    }

    fn parse_target(&mut self) -> Result<AssignTarget, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::RuntimeVar(name) => {
                self.advance();
                Ok(AssignTarget::Var(name))
            }
            TokenKind::PersistVar(key) => {
                self.advance();
                Ok(AssignTarget::Persist(key))
            }
            _ => Ok(AssignTarget::Var(self.expect_name("variable")?)),
        }
    }

    fn parse_set(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let target = self.parse_target()?;
        self.expect(&TokenKind::To, "'to'")?;
        let value = self.parse_expression()?;
        Ok(match target {
            AssignTarget::Var(name) => StmtKind::VarAssign { name, value },
            AssignTarget::Persist(key) => {
                let line = value.line;
                StmtKind::PersistAssign { key: self.persist_key(&key, line), value }
            }
        })
    }

    /// `add X to Y` / `remove X from Y`, desugared to `Y = Y op X`.
    fn parse_sugar(&mut self, op: BinOp, joiner: &TokenKind) -> Result<StmtKind, ParseError> {
        let line = self.advance().line;
        let amount = self.parse_expression()?;
        let joiner_text = if op == BinOp::Add { "'to'" } else { "'from'" };
        self.expect(joiner, joiner_text)?;
        let combine = |current: ExprKind| Self::binary(op, Expr::new(current, line), amount, line);
        Ok(match self.parse_target()? {
            AssignTarget::Var(name) => {
                let value = combine(ExprKind::VarRef(name.clone()));
                StmtKind::VarAssign { name, value }
            }
            AssignTarget::Persist(key) => {
                let key = self.persist_key(&key, line);
                let value = combine(ExprKind::PersistRef(Box::new(key.clone())));
                StmtKind::PersistAssign { key, value }
            }
        })
    }

    /// A statement led by a variable: plain or compound assignment, or an
    /// expression such as `%list%.push(1)`.
    fn parse_assignment(&mut self, target: AssignTarget) -> Result<StmtKind, ParseError> {
        let start = self.pos;
        let line = self.advance().line;
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(AugOp::Add),
            TokenKind::MinusAssign => Some(AugOp::Sub),
            TokenKind::StarAssign => Some(AugOp::Mul),
            TokenKind::SlashAssign => Some(AugOp::Div),
            _ => {
                self.pos = start;
                return Ok(StmtKind::Expr(self.parse_expression()?));
            }
        };
        self.advance();
        let value = self.parse_expression()?;
        Ok(match (target, op) {
            (AssignTarget::Var(name), None) => StmtKind::VarAssign { name, value },
            (AssignTarget::Var(name), Some(op)) => StmtKind::AugAssign { name, op, value },
            (AssignTarget::Persist(key), None) => {
                StmtKind::PersistAssign { key: self.persist_key(&key, line), value }
            }
            (AssignTarget::Persist(key), Some(op)) => {
                StmtKind::PersistAugAssign { key: self.persist_key(&key, line), op, value }
            }
        })
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_ternary();
        self.leave();
        result
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if !self.check(&TokenKind::Question) {
            return Ok(cond);
        }
        let line = self.advance().line;
        let then = self.parse_expression()?;
        self.expect(&TokenKind::Colon, "':' in conditional expression")?;
        let otherwise = self.parse_expression()?;
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            line,
        ))
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr, line: usize) -> Expr {
        Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, line)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let line = self.advance().line;
            let rhs = self.parse_and()?;
            lhs = Self::binary(BinOp::Or, lhs, rhs, line);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.check(&TokenKind::And) {
            let line = self.advance().line;
            let rhs = self.parse_not()?;
            lhs = Self::binary(BinOp::And, lhs, rhs, line);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek_kind(), TokenKind::Not | TokenKind::Bang) {
            let line = self.advance().line;
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand?) }, line));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne | TokenKind::Isnt => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                TokenKind::Contains => BinOp::Contains,
                TokenKind::Is => {
                    if same_kind(&self.peek_at(1).kind, &TokenKind::Not) {
                        self.advance();
                        BinOp::Ne
                    } else {
                        BinOp::Eq
                    }
                }
                _ => return Ok(lhs),
            };
            let line = self.advance().line;
            let rhs = self.parse_additive()?;
            lhs = Self::binary(op, lhs, rhs, line);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let line = self.advance().line;
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(op, lhs, rhs, line);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            let line = self.advance().line;
            let rhs = self.parse_unary()?;
            lhs = Self::binary(op, lhs, rhs, line);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Minus) {
            let line = self.advance().line;
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(operand?) }, line));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if !self.check(&TokenKind::Caret) {
            return Ok(base);
        }
        let line = self.advance().line;
        self.enter()?;
        // Right-associative: the exponent may itself be a power.
        let exponent = self.parse_unary();
        self.leave();
        Ok(Self::binary(BinOp::Pow, base, exponent?, line))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let spaced = self.peek().spaced;
            match self.peek_kind() {
                // `send "a" [1]` passes two arguments; only `x[1]` indexes.
                TokenKind::LBracket if !spaced => {
                    let line = self.advance().line;
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    expr = Expr::new(ExprKind::Index { target: Box::new(expr), index: Box::new(index) }, line);
                }
                TokenKind::Dot => {
                    let line = self.advance().line;
                    let name = self.expect_name("property name")?.to_lowercase();
                    if self.check(&TokenKind::LParen) {
                        let mut args = vec![expr];
                        args.extend(self.parse_args()?);
                        expr = Expr::new(ExprKind::Call { name, args }, line);
                    } else {
                        expr = Expr::new(ExprKind::Property { target: Box::new(expr), name }, line);
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            args.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance();
        let line = tok.line;
        let kind = match tok.kind {
            TokenKind::Number(n) => ExprKind::Literal(Value::Number(n)),
            TokenKind::Bool(b) => ExprKind::Literal(Value::Bool(b)),
            TokenKind::Null => ExprKind::Literal(Value::Null),
            TokenKind::Str(s) => return Ok(self.template(&s, line)),
            TokenKind::RuntimeVar(name) => ExprKind::VarRef(name),
            TokenKind::PersistVar(key) => ExprKind::PersistRef(Box::new(self.persist_key(&key, line))),
            TokenKind::Ident(name) => {
                if self.check(&TokenKind::LParen) {
                    ExprKind::Call { name: name.to_lowercase(), args: self.parse_args()? }
                } else {
                    // Bare words are string literals: `give-item diamond 5`.
                    ExprKind::Literal(Value::Str(name))
                }
            }
            TokenKind::Remove | TokenKind::Contains | TokenKind::Repeat | TokenKind::Add
                if self.check(&TokenKind::LParen) =>
            {
                ExprKind::Call { name: tok.lexeme.to_lowercase(), args: self.parse_args()? }
            }
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.eat(&TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBracket, "']'")?;
                        break;
                    }
                }
                ExprKind::List(items)
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                while !self.eat(&TokenKind::RBrace) {
                    let key = self.parse_expression()?;
                    self.expect(&TokenKind::Colon, "':' in map literal")?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBrace, "'}'")?;
                        break;
                    }
                }
                ExprKind::Map(entries)
            }
            _ => {
                return Err(ParseError::grammar(
                    format!("Unexpected token {}", describe(&tok)),
                    self.file,
                    line,
                ))
            }
        };
        Ok(Expr::new(kind, line))
    }

    // ── String templates ──────────────────────────────────────────────────────

    /// Build the expression for a string literal, interpolating `%var%` and
    /// `__key__` spans.
    fn template(&self, text: &str, line: usize) -> Expr {
        collapse(scan_template(text, line, true), line)
    }

    /// Expression for a persistent key; keys may embed `%var%` spans.
    fn persist_key(&self, key: &str, line: usize) -> Expr {
        if key.contains('%') {
            collapse(scan_template(key, line, false), line)
        } else {
            Expr::literal(key, line)
        }
    }
}

enum AssignTarget {
    Var(String),
    Persist(String),
}

fn collapse(mut parts: Vec<TemplatePart>, line: usize) -> Expr {
    match parts.len() {
        0 => Expr::literal("", line),
        1 if matches!(parts[0], TemplatePart::Text(_)) => match parts.remove(0) {
            TemplatePart::Text(s) => Expr::literal(s, line),
            TemplatePart::Expr(e) => e,
        },
        _ => Expr::new(ExprKind::Template(parts), line),
    }
}

/// Split string contents into literal text and variable references.
///
/// `%name%` becomes a runtime variable read when the name is non-empty and
/// contains no whitespace (so `"50% off"` stays literal).  `__key__` becomes a
/// persistent read when `with_persist` is set.
fn scan_template(text: &str, line: usize, with_persist: bool) -> Vec<TemplatePart> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut i = 0;

    let find = |from: usize, pat: &[char]| -> Option<usize> {
        (from..chars.len().saturating_sub(pat.len() - 1)).find(|&j| chars[j..].starts_with(pat))
    };

    while i < chars.len() {
        if with_persist && chars[i..].starts_with(&['_', '_']) {
            if let Some(end) = find(i + 2, &['_', '_']) {
                if end > i + 2 {
                    let key: String = chars[i + 2..end].iter().collect();
                    if !buf.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut buf)));
                    }
                    let key_expr = if key.contains('%') {
                        collapse(scan_template(&key, line, false), line)
                    } else {
                        Expr::literal(key, line)
                    };
                    parts.push(TemplatePart::Expr(Expr::new(ExprKind::PersistRef(Box::new(key_expr)), line)));
                    i = end + 2;
                    continue;
                }
            }
        }
        if chars[i] == '%' && !chars[i + 1..].starts_with(&['_', '_']) {
            if let Some(end) = find(i + 1, &['%']) {
                let name: String = chars[i + 1..end].iter().collect();
                if !name.is_empty() && !name.chars().any(char::is_whitespace) {
                    if !buf.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut buf)));
                    }
                    parts.push(TemplatePart::Expr(Expr::new(ExprKind::VarRef(name), line)));
                    i = end + 1;
                    continue;
                }
            }
        }
        buf.push(chars[i]);
        i += 1;
    }
    if !buf.is_empty() {
        parts.push(TemplatePart::Text(buf));
    }
    parts
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyntaxErrorKind;

    fn program(src: &str) -> Program {
        parse(src, "test.fk").unwrap()
    }

    fn err(src: &str) -> ParseError {
        parse(src, "test.fk").unwrap_err()
    }

    fn event_body(src: &str) -> Vec<Stmt> {
        match &program(src).items[0] {
            Item::Event(e) => e.body.stmts.to_vec(),
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn expr(src: &str) -> Expr {
        match &program(&format!("return {src}")).items[0] {
            Item::Stmt(Stmt { kind: StmtKind::Return(Some(e)), .. }) => e.clone(),
            other => panic!("expected return, got {other:?}"),
        }
    }

    fn bin(e: &Expr) -> (BinOp, &Expr, &Expr) {
        match &e.kind {
            ExprKind::Binary { op, lhs, rhs } => (*op, lhs, rhs),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn event_block_with_free_form_name() {
        let p = program("on player join:\n    send \"hi\"\n");
        match &p.items[0] {
            Item::Event(e) => {
                assert_eq!(e.event, "player join");
                assert_eq!(e.body.stmts.len(), 1);
                assert_eq!(e.line, 1);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn header_colon_is_optional() {
        let body = event_body("on tick\n    send 1\n");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn block_without_indent_is_empty() {
        let p = program("on quiet:\nsend 1\n");
        match &p.items[0] {
            Item::Event(e) => assert!(e.body.is_empty()),
            other => panic!("{other:?}"),
        }
        assert!(matches!(p.items[1], Item::Stmt(_)));
    }

    #[test]
    fn bad_dedent_is_an_indentation_error() {
        let e = err("on x:\n        send 1\n    send 2\n");
        assert_eq!(e.kind, SyntaxErrorKind::Indentation);
        assert_eq!(e.line, 3);
    }

    #[test]
    fn command_with_params_and_metadata() {
        let src = "command heal(target, amount) permission: flok.heal description: Heal a friend aliases: h, mend:\n    send %target%\n";
        match &program(src).items[0] {
            Item::Command(c) => {
                assert_eq!(c.name, "heal");
                assert_eq!(c.params, vec!["target", "amount"]);
                assert_eq!(c.permission.as_deref(), Some("flok.heal"));
                assert_eq!(c.description.as_deref(), Some("Heal a friend"));
                assert_eq!(c.aliases, vec!["h", "mend"]);
                assert_eq!(c.body.stmts.len(), 1);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn parameter_names_keep_their_case() {
        match &program("function scale(Count, %Factor%):\n    return %Count% * %Factor%\n").items[0] {
            Item::Function(f) => assert_eq!(f.params, vec!["Count", "Factor"]),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn function_definition() {
        match &program("function Double(x):\n    return %x% * 2\n").items[0] {
            Item::Function(f) => {
                assert_eq!(f.name, "double");
                assert_eq!(f.params, vec!["x"]);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn effect_arguments_are_whitespace_separated() {
        let body = event_body("on x:\n    give-item diamond 5 %player-name%\n");
        match &body[0].kind {
            StmtKind::Effect { name, args } => {
                assert_eq!(name, "give-item");
                assert_eq!(args.len(), 3);
                assert_eq!(args[0].kind, ExprKind::Literal(Value::from("diamond")));
                assert_eq!(args[2].kind, ExprKind::VarRef("player-name".into()));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn identifier_with_paren_is_a_call() {
        let body = event_body("on x:\n    Announce(\"hi\", 2)\n");
        match &body[0].kind {
            StmtKind::Expr(Expr { kind: ExprKind::Call { name, args }, .. }) => {
                assert_eq!(name, "announce");
                assert_eq!(args.len(), 2);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn set_add_remove_sugar() {
        let body = event_body("on x:\n    set %a% to 1\n    add 2 to %a%\n    remove 3 from __score__\n");
        assert!(matches!(&body[0].kind, StmtKind::VarAssign { name, .. } if name == "a"));
        match &body[1].kind {
            StmtKind::VarAssign { name, value } => {
                assert_eq!(name, "a");
                let (op, lhs, _) = bin(value);
                assert_eq!(op, BinOp::Add);
                assert_eq!(lhs.kind, ExprKind::VarRef("a".into()));
            }
            other => panic!("{other:?}"),
        }
        match &body[2].kind {
            StmtKind::PersistAssign { key, value } => {
                assert_eq!(key.kind, ExprKind::Literal(Value::from("score")));
                assert_eq!(bin(value).0, BinOp::Sub);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn compound_assignments() {
        let body = event_body("on x:\n    %n% += 1\n    __total__ += %n%\n    %n% = 0\n    %n% /= 2\n");
        assert!(matches!(body[0].kind, StmtKind::AugAssign { op: AugOp::Add, .. }));
        assert!(matches!(body[1].kind, StmtKind::PersistAugAssign { op: AugOp::Add, .. }));
        assert!(matches!(body[2].kind, StmtKind::VarAssign { .. }));
        assert!(matches!(body[3].kind, StmtKind::AugAssign { op: AugOp::Div, .. }));
    }

    #[test]
    fn variable_led_expression_statement() {
        let body = event_body("on x:\n    %list%.push(1)\n");
        match &body[0].kind {
            StmtKind::Expr(Expr { kind: ExprKind::Call { name, args }, .. }) => {
                assert_eq!(name, "push");
                assert_eq!(args.len(), 2);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn keyword_named_builtins_can_be_called() {
        let body = event_body("on x:\n    remove(%l%, 0)\n    set %y% to contains(%l%, 2)\n");
        assert!(matches!(&body[0].kind, StmtKind::Expr(Expr { kind: ExprKind::Call { name, .. }, .. }) if name == "remove"));
    }

    #[test]
    fn if_elseif_else_chain() {
        let src = "on x:\n    if %a% > 1:\n        send 1\n    else if %a% > 0:\n        send 2\n    elseif true:\n        send 3\n    else:\n        send 4\n";
        match &event_body(src)[0].kind {
            StmtKind::If { else_ifs, otherwise, .. } => {
                assert_eq!(else_ifs.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn loops() {
        let src = "on x:\n    for %i% in range(0, 3):\n        send %i%\n    while %a% < 3:\n        %a% += 1\n    repeat 3 times:\n        send 1\n";
        let body = event_body(src);
        assert!(matches!(&body[0].kind, StmtKind::ForEach { var, .. } if var == "i"));
        assert!(matches!(body[1].kind, StmtKind::While { .. }));
        assert!(matches!(body[2].kind, StmtKind::Repeat { .. }));
    }

    #[test]
    fn wait_seconds_converts_to_ticks() {
        let body = event_body("on x:\n    wait 2 seconds\n    wait 5 ticks\n    wait 1\n");
        match &body[0].kind {
            StmtKind::Wait(e) => {
                let (op, _, rhs) = bin(e);
                assert_eq!(op, BinOp::Mul);
                assert_eq!(rhs.kind, ExprKind::Literal(Value::from(20)));
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(&body[1].kind, StmtKind::Wait(Expr { kind: ExprKind::Literal(_), .. })));
        assert!(matches!(&body[2].kind, StmtKind::Wait(_)));
    }

    #[test]
    fn bare_return_has_no_value() {
        let body = event_body("on x:\n    return\n");
        assert_eq!(body[0].kind, StmtKind::Return(None));
    }

    #[test]
    fn precedence_or_and_not_comparison() {
        // not binds looser than comparison.
        let e = expr("not 1 is 2 and true or false");
        let (op, lhs, _) = bin(&e);
        assert_eq!(op, BinOp::Or);
        let (op, lhs, _) = bin(lhs);
        assert_eq!(op, BinOp::And);
        match &lhs.kind {
            ExprKind::Unary { op: UnaryOp::Not, operand } => assert_eq!(bin(operand).0, BinOp::Eq),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn precedence_arithmetic() {
        let e = expr("1 + 2 * 3");
        let (op, _, rhs) = bin(&e);
        assert_eq!(op, BinOp::Add);
        assert_eq!(bin(rhs).0, BinOp::Mul);
    }

    #[test]
    fn power_is_right_associative() {
        let e = expr("2 ^ 3 ^ 2");
        let (op, lhs, rhs) = bin(&e);
        assert_eq!(op, BinOp::Pow);
        assert_eq!(lhs.kind, ExprKind::Literal(Value::from(2)));
        assert_eq!(bin(rhs).0, BinOp::Pow);
    }

    #[test]
    fn is_not_and_isnt() {
        assert_eq!(bin(&expr("%a% is not 3")).0, BinOp::Ne);
        assert_eq!(bin(&expr("%a% isnt 3")).0, BinOp::Ne);
        assert_eq!(bin(&expr("%a% contains 3")).0, BinOp::Contains);
    }

    #[test]
    fn ternary() {
        assert!(matches!(expr("%a% > 1 ? \"big\" : \"small\"").kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn postfix_chain() {
        let e = expr("%p%.items[0].name");
        match &e.kind {
            ExprKind::Property { target, name } => {
                assert_eq!(name, "name");
                assert!(matches!(target.kind, ExprKind::Index { .. }));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn list_and_map_literals() {
        assert!(matches!(&expr("[1, 2, 3]").kind, ExprKind::List(items) if items.len() == 3));
        assert!(matches!(&expr("[]").kind, ExprKind::List(items) if items.is_empty()));
        assert!(matches!(&expr("{a: 1, \"b\": 2}").kind, ExprKind::Map(e) if e.len() == 2));
    }

    #[test]
    fn string_templates() {
        assert_eq!(expr("\"plain\"").kind, ExprKind::Literal(Value::from("plain")));
        assert_eq!(expr("\"50% off\"").kind, ExprKind::Literal(Value::from("50% off")));
        match expr("\"Hi %player-name%, kills: __kills_%player-name%__!\"").kind {
            ExprKind::Template(parts) => {
                assert_eq!(parts.len(), 5);
                assert_eq!(parts[0], TemplatePart::Text("Hi ".into()));
                assert!(matches!(&parts[1], TemplatePart::Expr(Expr { kind: ExprKind::VarRef(n), .. }) if n == "player-name"));
                match &parts[3] {
                    TemplatePart::Expr(Expr { kind: ExprKind::PersistRef(key), .. }) => {
                        assert!(matches!(key.kind, ExprKind::Template(_)));
                    }
                    other => panic!("{other:?}"),
                }
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn single_variable_template_is_still_a_string() {
        match expr("\"%x%\"").kind {
            ExprKind::Template(parts) => assert_eq!(parts.len(), 1),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn dynamic_persist_key() {
        match expr("__coins_%player-uuid%__").kind {
            ExprKind::PersistRef(key) => assert!(matches!(key.kind, ExprKind::Template(_))),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn grammar_errors_carry_file_and_line() {
        let e = err("on x:\n    set %a% 5\n");
        assert_eq!(e.line, 2);
        assert_eq!(e.file, "test.fk");
        assert!(e.message().contains("Expected 'to'"), "{}", e.message());
        let e = err("on x:\n    send (1\n");
        assert!(e.message().contains("')'"), "{}", e.message());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let e = err("on x:\n    set %a% to 1 )\n");
        assert!(e.message().starts_with("Expected end of line"), "{}", e.message());
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let src = format!("return {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse(&src, "deep.fk").is_err());
    }
}
