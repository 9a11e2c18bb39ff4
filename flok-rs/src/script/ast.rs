//! Syntax tree produced by [`super::parser`].
//!
//! The tree is immutable once built.  Statement lists are stored as
//! `Arc<[Stmt]>` so a suspended invocation can hold on to the statements it
//! still has to run without copying them.

use std::sync::Arc;

use super::value::Value;

// ── Expressions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Contains,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Operator of a compound assignment (`+=`, `-=`, `*=`, `/=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl AugOp {
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Value {
        match self {
            AugOp::Add => lhs.add(rhs),
            AugOp::Sub => lhs.sub(rhs),
            AugOp::Mul => lhs.mul(rhs),
            AugOp::Div => lhs.div(rhs),
        }
    }
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    /// `%name%`
    VarRef(String),
    /// `__key__`; the key may itself be interpolated.
    PersistRef(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `name(args)`, or `target.name(args)` with the target as first arg.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Template(Vec<TemplatePart>),
    /// `cond ? then : otherwise`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Expr { kind, line }
    }

    pub fn literal(value: impl Into<Value>, line: usize) -> Self {
        Expr::new(ExprKind::Literal(value.into()), line)
    }
}

// ── Statements ────────────────────────────────────────────────────────────────

/// An indented statement sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Arc<[Stmt]>,
    pub line: usize,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, line: usize) -> Self {
        Block { stmts: stmts.into(), line }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    If {
        cond: Expr,
        then: Block,
        else_ifs: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    ForEach {
        var: String,
        iterable: Expr,
        body: Block,
    },
    Repeat {
        count: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    VarAssign {
        name: String,
        value: Expr,
    },
    AugAssign {
        name: String,
        op: AugOp,
        value: Expr,
    },
    PersistAssign {
        key: Expr,
        value: Expr,
    },
    PersistAugAssign {
        key: Expr,
        op: AugOp,
        value: Expr,
    },
    /// A call to a host-registered effect.
    Effect {
        name: String,
        args: Vec<Expr>,
    },
    Expr(Expr),
    Block(Block),
    /// Delay, already converted to ticks.
    Wait(Expr),
}

impl Stmt {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Stmt { kind, line }
    }

    /// Short name for diagnostics.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            StmtKind::If { .. } => "if",
            StmtKind::While { .. } => "while",
            StmtKind::ForEach { .. } => "for",
            StmtKind::Repeat { .. } => "repeat",
            StmtKind::Return(_) => "return",
            StmtKind::Break => "break",
            StmtKind::Continue => "continue",
            StmtKind::VarAssign { .. } => "assignment",
            StmtKind::AugAssign { .. } => "compound assignment",
            StmtKind::PersistAssign { .. } => "persistent assignment",
            StmtKind::PersistAugAssign { .. } => "persistent compound assignment",
            StmtKind::Effect { .. } => "effect",
            StmtKind::Expr(_) => "expression",
            StmtKind::Block(_) => "block",
            StmtKind::Wait(_) => "wait",
        }
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

/// `on <event>:` handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBlock {
    /// Event name as written.
    pub event: String,
    pub body: Block,
    pub line: usize,
}

/// `command <name>(<params>) [metadata]:` handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandBlock {
    pub name: String,
    pub params: Vec<String>,
    pub permission: Option<String>,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub body: Block,
    pub line: usize,
}

/// `function <name>(<params>):` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Event(EventBlock),
    Command(CommandBlock),
    Function(FunctionDef),
    /// A statement outside any block.  Kept in the tree but never run.
    Stmt(Stmt),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Default for Block {
    fn default() -> Self {
        Block::new(Vec::new(), 0)
    }
}
