//! Flok tree-walking interpreter.
//!
//! [`Interpreter`] executes statements of one [`CompiledScript`] against a
//! [`Frame`].  Execution returns a [`Flow`]: either the block ran to
//! completion, or a `wait` suspended it.  A suspension carries the pending
//! work innermost-first (the rest of each enclosing block, plus any loop that
//! still has iterations to run) so [`Interpreter::resume`] can pick up exactly
//! where the invocation stopped.

use std::sync::Arc;

use super::ast::{AugOp, BinOp, Block, Expr, ExprKind, FunctionDef, Stmt, StmtKind, TemplatePart, UnaryOp};
use super::builtins::call_builtin;
use super::compiled::CompiledScript;
use super::frame::Frame;
use super::value::{lock, Value};
use crate::effects::EffectRegistry;
use crate::error::RuntimeError;
use crate::store::PersistentStore;

// ── Limits ────────────────────────────────────────────────────────────────────

/// Per-invocation safety limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Operation budget of a top-level invocation.
    pub max_ops: u64,
    /// Deepest allowed nesting of user-function calls.
    pub max_call_depth: usize,
    /// Prefix under which actor attributes appear as variables.
    pub actor_prefix: String,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { max_ops: 50_000, max_call_depth: 64, actor_prefix: "player-".to_owned() }
    }
}

// ── Flow ──────────────────────────────────────────────────────────────────────

/// Outcome of executing statements.
#[derive(Debug)]
pub enum Flow {
    Completed,
    Suspended(Suspension),
}

/// A `wait` in progress.
#[derive(Debug)]
pub struct Suspension {
    /// Delay requested by the `wait`, in ticks (at least 1).
    pub delay_ticks: u64,
    /// Work left to do, innermost first.
    pub pending: Vec<Pending>,
}

/// One level of unfinished work.
#[derive(Debug, Clone)]
pub enum Pending {
    /// Statements `stmts[next..]` of a block.
    Block { stmts: Arc<[Stmt]>, next: usize },
    /// The loop statement `stmts[index]`, whose current iteration is the
    /// work just before this entry.
    Loop { stmts: Arc<[Stmt]>, index: usize, state: LoopState },
}

/// Iteration state of a suspended loop.
#[derive(Debug, Clone)]
pub enum LoopState {
    While,
    Repeat { remaining: u64 },
    ForEach { items: Vec<Value>, next: usize },
}

/// A suspended invocation, ready to hand to a scheduler.
#[derive(Debug)]
pub struct Continuation {
    pub script: Arc<CompiledScript>,
    pub pending: Vec<Pending>,
    /// Detached copy of the invocation's frame.
    pub frame: Frame,
    pub delay_ticks: u64,
}

impl Continuation {
    pub fn new(script: Arc<CompiledScript>, suspension: Suspension, frame: Frame) -> Self {
        Continuation {
            script,
            pending: suspension.pending,
            frame,
            delay_ticks: suspension.delay_ticks,
        }
    }
}

/// Close out a loop iteration.  Consumes `break`/`continue`; returns whether
/// the loop should keep going.
fn after_iteration(frame: &mut Frame) -> bool {
    if frame.breaking {
        frame.breaking = false;
        return false;
    }
    frame.continuing = false;
    !frame.returning
}

/// Items a `for` loop visits: list elements, map keys, or the characters of
/// anything else.
fn iteration_items(v: &Value) -> Vec<Value> {
    match v {
        Value::List(l) => lock(l).clone(),
        Value::Map(m) => lock(m).keys().map(|k| Value::Str(k.clone())).collect(),
        other => other.as_string().chars().map(|c| Value::Str(c.to_string())).collect(),
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter<'a> {
    script: &'a CompiledScript,
    store: &'a PersistentStore,
    effects: &'a EffectRegistry,
    limits: &'a Limits,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        script: &'a CompiledScript,
        store: &'a PersistentStore,
        effects: &'a EffectRegistry,
        limits: &'a Limits,
    ) -> Self {
        Interpreter { script, store, effects, limits }
    }

    /// Spend one unit of the frame's operation budget.
    fn charge(&self, frame: &mut Frame) -> Result<(), RuntimeError> {
        frame.ops_remaining = frame.ops_remaining.saturating_sub(1);
        if frame.ops_remaining == 0 {
            return Err(RuntimeError::OperationLimitExceeded { limit: self.limits.max_ops });
        }
        Ok(())
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Execute a block from the top.
    pub fn exec_block(&self, block: &Block, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        self.exec_from(&block.stmts, 0, frame)
    }

    /// Continue a suspended invocation.
    pub fn resume(&self, pending: Vec<Pending>, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        let mut rest = pending.into_iter();
        while let Some(entry) = rest.next() {
            let flow = match entry {
                Pending::Block { stmts, next } => self.exec_from(&stmts, next, frame)?,
                Pending::Loop { stmts, index, state } => {
                    if after_iteration(frame) {
                        self.run_loop(&stmts, index, state, frame)?
                    } else {
                        Flow::Completed
                    }
                }
            };
            if let Flow::Suspended(mut s) = flow {
                s.pending.extend(rest);
                return Ok(Flow::Suspended(s));
            }
        }
        Ok(Flow::Completed)
    }

    fn exec_from(&self, stmts: &Arc<[Stmt]>, start: usize, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        for i in start..stmts.len() {
            if frame.interrupted() {
                break;
            }
            if let Flow::Suspended(mut s) = self.exec_stmt(stmts, i, frame)? {
                if i + 1 < stmts.len() {
                    s.pending.push(Pending::Block { stmts: Arc::clone(stmts), next: i + 1 });
                }
                return Ok(Flow::Suspended(s));
            }
        }
        Ok(Flow::Completed)
    }

    fn exec_stmt(&self, stmts: &Arc<[Stmt]>, index: usize, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        let stmt = &stmts[index];
        self.charge(frame)?;
        match &stmt.kind {
            StmtKind::VarAssign { name, value } => {
                let v = self.eval(value, frame)?;
                frame.set_local(name.clone(), v);
            }
            StmtKind::AugAssign { name, op, value } => {
                let current = self.resolve_var(name, frame);
                let delta = self.eval(value, frame)?;
                frame.set_local(name.clone(), op.apply(&current, &delta));
            }
            StmtKind::PersistAssign { key, value } => {
                let key = self.eval(key, frame)?.as_string();
                let v = self.eval(value, frame)?;
                self.store.set(&key, v);
            }
            StmtKind::PersistAugAssign { key, op, value } => {
                let key = self.eval(key, frame)?.as_string();
                let delta = self.eval(value, frame)?;
                if *op == AugOp::Add {
                    self.store.increment(&key, delta.as_number());
                } else {
                    let current = self.store.get(&key);
                    self.store.set(&key, op.apply(&current, &delta));
                }
            }
            StmtKind::Effect { name, args } => self.exec_effect(name, args, stmt.line, frame)?,
            StmtKind::If { cond, then, else_ifs, otherwise } => {
                if self.eval(cond, frame)?.as_bool() {
                    return self.exec_block(then, frame);
                }
                for (c, body) in else_ifs {
                    if self.eval(c, frame)?.as_bool() {
                        return self.exec_block(body, frame);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body, frame);
                }
            }
            StmtKind::While { .. } => return self.run_loop(stmts, index, LoopState::While, frame),
            StmtKind::Repeat { count, .. } => {
                let remaining = self.eval(count, frame)?.as_int().max(0) as u64;
                return self.run_loop(stmts, index, LoopState::Repeat { remaining }, frame);
            }
            StmtKind::ForEach { iterable, .. } => {
                let items = iteration_items(&self.eval(iterable, frame)?);
                return self.run_loop(stmts, index, LoopState::ForEach { items, next: 0 }, frame);
            }
            StmtKind::Return(value) => {
                frame.return_value = match value {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::Null,
                };
                frame.returning = true;
            }
            StmtKind::Break => frame.breaking = true,
            StmtKind::Continue => frame.continuing = true,
            StmtKind::Expr(e) => {
                self.eval(e, frame)?;
            }
            StmtKind::Block(b) => return self.exec_block(b, frame),
            StmtKind::Wait(ticks) => {
                let delay_ticks = self.eval(ticks, frame)?.as_int().max(1) as u64;
                return Ok(Flow::Suspended(Suspension { delay_ticks, pending: Vec::new() }));
            }
        }
        Ok(Flow::Completed)
    }

    /// Run the loop at `stmts[index]` from `state` until it finishes or a
    /// `wait` in its body suspends it.
    fn run_loop(
        &self,
        stmts: &Arc<[Stmt]>,
        index: usize,
        mut state: LoopState,
        frame: &mut Frame,
    ) -> Result<Flow, RuntimeError> {
        let stmt = &stmts[index];
        loop {
            self.charge(frame)?;
            let body = match (&stmt.kind, &mut state) {
                (StmtKind::While { cond, body }, LoopState::While) => {
                    if !self.eval(cond, frame)?.as_bool() {
                        break;
                    }
                    body
                }
                (StmtKind::Repeat { body, .. }, LoopState::Repeat { remaining }) => {
                    if *remaining == 0 {
                        break;
                    }
                    *remaining -= 1;
                    body
                }
                (StmtKind::ForEach { var, body, .. }, LoopState::ForEach { items, next }) => {
                    let Some(item) = items.get(*next).cloned() else { break };
                    *next += 1;
                    frame.set_local(var.clone(), item);
                    body
                }
                _ => {
                    return Err(RuntimeError::script(
                        format!("cannot resume {} as a loop", stmt.describe()),
                        stmt.line,
                    ))
                }
            };
            if let Flow::Suspended(mut s) = self.exec_block(body, frame)? {
                s.pending.push(Pending::Loop { stmts: Arc::clone(stmts), index, state });
                return Ok(Flow::Suspended(s));
            }
            if !after_iteration(frame) {
                break;
            }
        }
        Ok(Flow::Completed)
    }

    fn exec_effect(&self, name: &str, args: &[Expr], line: usize, frame: &mut Frame) -> Result<(), RuntimeError> {
        let Some(handler) = self.effects.get(name) else {
            return Err(RuntimeError::script(format!("Unknown effect: {name}"), line));
        };
        let values = args
            .iter()
            .map(|a| self.eval(a, frame))
            .collect::<Result<Vec<_>, _>>()?;
        let actor = frame.actor.clone();
        handler(actor.as_ref(), &values, frame)
            .map_err(|e| RuntimeError::script(format!("Effect '{name}' failed: {e}"), line))
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    pub fn eval(&self, expr: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        self.charge(frame)?;
        Ok(match &expr.kind {
            ExprKind::Literal(v) => v.clone(),
            ExprKind::VarRef(name) => self.resolve_var(name, frame),
            ExprKind::PersistRef(key) => {
                let key = self.eval(key, frame)?.as_string();
                self.store.get(&key)
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, frame)?,
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand, frame)?;
                match op {
                    UnaryOp::Neg => v.negate(),
                    UnaryOp::Not => Value::Bool(!v.as_bool()),
                }
            }
            ExprKind::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, frame))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_function(name, values, expr.line, frame)?
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?;
                match &target {
                    Value::List(l) => {
                        let i = index.as_int();
                        let items = lock(l);
                        usize::try_from(i).ok().and_then(|i| items.get(i).cloned()).unwrap_or_default()
                    }
                    Value::Map(m) => lock(m).get(&index.as_string()).cloned().unwrap_or_default(),
                    _ => Value::Null,
                }
            }
            ExprKind::Property { target, name } => match self.eval(target, frame)? {
                Value::Map(m) => lock(&m).get(name).cloned().unwrap_or_default(),
                _ => Value::Null,
            },
            ExprKind::List(items) => Value::list(
                items
                    .iter()
                    .map(|e| self.eval(e, frame))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ExprKind::Map(entries) => {
                let mut map = indexmap::IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = self.eval(k, frame)?.as_string();
                    let value = self.eval(v, frame)?;
                    map.insert(key, value);
                }
                Value::map(map)
            }
            ExprKind::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => out.push_str(t),
                        TemplatePart::Expr(e) => out.push_str(&self.eval(e, frame)?.as_string()),
                    }
                }
                Value::Str(out)
            }
            ExprKind::Conditional { cond, then, otherwise } => {
                if self.eval(cond, frame)?.as_bool() {
                    self.eval(then, frame)?
                } else {
                    self.eval(otherwise, frame)?
                }
            }
        })
    }

    fn eval_binary(&self, op: BinOp, lhs: &Expr, rhs: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        let l = self.eval(lhs, frame)?;
        // `and`/`or` short-circuit and yield an operand, not a boolean.
        match op {
            BinOp::And if !l.as_bool() => return Ok(l),
            BinOp::Or if l.as_bool() => return Ok(l),
            _ => {}
        }
        let r = self.eval(rhs, frame)?;
        Ok(match op {
            BinOp::Add => l.add(&r),
            BinOp::Sub => l.sub(&r),
            BinOp::Mul => l.mul(&r),
            BinOp::Div => l.div(&r),
            BinOp::Mod => l.modulo(&r),
            BinOp::Pow => l.pow(&r),
            BinOp::Eq => Value::Bool(l.equals(&r)),
            BinOp::Ne => Value::Bool(!l.equals(&r)),
            BinOp::Lt => Value::Bool(l.compare(&r).is_lt()),
            BinOp::Le => Value::Bool(l.compare(&r).is_le()),
            BinOp::Gt => Value::Bool(l.compare(&r).is_gt()),
            BinOp::Ge => Value::Bool(l.compare(&r).is_ge()),
            BinOp::Contains => Value::Bool(l.contains(&r)),
            BinOp::And | BinOp::Or => r,
        })
    }

    // ── Functions ─────────────────────────────────────────────────────────────

    /// Call a user function of this script, or a builtin.
    pub fn call_function(
        &self,
        name: &str,
        args: Vec<Value>,
        line: usize,
        frame: &mut Frame,
    ) -> Result<Value, RuntimeError> {
        if let Some(def) = self.script.function(name) {
            return self.call_user(def, args, line, frame);
        }
        match call_builtin(name, args) {
            Some(result) => result.map_err(|e| RuntimeError::script(e, line)),
            None => Err(RuntimeError::script(format!("Unknown function: {name}()"), line)),
        }
    }

    fn call_user(
        &self,
        def: &FunctionDef,
        args: Vec<Value>,
        line: usize,
        frame: &mut Frame,
    ) -> Result<Value, RuntimeError> {
        if frame.call_depth >= self.limits.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded { max: self.limits.max_call_depth });
        }
        let mut child = frame.child();
        let mut args = args.into_iter();
        for param in &def.params {
            child.set_local(param.clone(), args.next().unwrap_or_default());
        }
        let flow = self.exec_block(&def.body, &mut child);
        frame.ops_remaining = frame.ops_remaining.min(child.ops_remaining);
        if let Flow::Suspended(_) = flow? {
            return Err(RuntimeError::script("wait is not supported inside functions", line));
        }
        Ok(if child.returning { child.return_value } else { Value::Null })
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    /// Read a local.  The first read of an unset actor-prefixed name pulls in
    /// every actor attribute.
    fn resolve_var(&self, name: &str, frame: &mut Frame) -> Value {
        match frame.get_local(name) {
            Some(v) if !v.is_null() => v.clone(),
            _ if !frame.actor_injected && name.starts_with(&self.limits.actor_prefix) => {
                self.inject_actor(frame);
                frame.get_local(name).cloned().unwrap_or_default()
            }
            _ => Value::Null,
        }
    }

    fn inject_actor(&self, frame: &mut Frame) {
        frame.actor_injected = true;
        let Some(actor) = frame.actor.clone() else { return };
        for (attr, value) in actor.attributes() {
            // Values the script already assigned win, as they would had the
            // attributes been injected up front.
            frame
                .locals
                .entry(format!("{}{attr}", self.limits.actor_prefix))
                .or_insert(value);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
