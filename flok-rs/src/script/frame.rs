//! Per-invocation execution state.

use std::collections::HashMap;

use super::value::Value;
use crate::actor::{ActorRef, CancellableRef};

/// Mutable state of one script invocation.
///
/// A top-level dispatch gets a fresh (or reset) frame; user-function calls
/// get a nested frame seeded with their parameters.  When a `wait`
/// suspends, the frame is detached with [`Frame::snapshot`] and travels with
/// the continuation.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub locals: HashMap<String, Value>,
    pub actor: Option<ActorRef>,
    pub cancellable: Option<CancellableRef>,
    pub ops_remaining: u64,
    pub call_depth: usize,
    pub returning: bool,
    pub breaking: bool,
    pub continuing: bool,
    pub return_value: Value,
    /// Whether actor attributes have been copied into `locals`.
    pub actor_injected: bool,
}

impl Frame {
    pub fn new(ops: u64) -> Self {
        Frame { ops_remaining: ops, ..Self::default() }
    }

    /// Clear everything and start over with a fresh budget.
    pub fn reset(&mut self, ops: u64) {
        self.locals.clear();
        self.actor = None;
        self.cancellable = None;
        self.ops_remaining = ops;
        self.call_depth = 0;
        self.returning = false;
        self.breaking = false;
        self.continuing = false;
        self.return_value = Value::Null;
        self.actor_injected = false;
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    /// Whether any control signal is pending.
    pub fn interrupted(&self) -> bool {
        self.returning || self.breaking || self.continuing
    }

    /// Independent copy that outlives this invocation.  Containers inside
    /// locals stay shared, as they would be for any other holder.
    pub fn snapshot(&self) -> Frame {
        self.clone()
    }

    /// Mark the triggering host event cancelled (no-op without one).
    pub fn cancel_event(&self, cancelled: bool) {
        if let Some(c) = &self.cancellable {
            c.set_cancelled(cancelled);
        }
    }

    pub fn is_event_cancelled(&self) -> bool {
        self.cancellable.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// A child frame for a user-function call.
    pub fn child(&self) -> Frame {
        Frame {
            actor: self.actor.clone(),
            cancellable: self.cancellable.clone(),
            ops_remaining: self.ops_remaining,
            call_depth: self.call_depth + 1,
            ..Frame::default()
        }
    }
}

// ── FramePool ─────────────────────────────────────────────────────────────────

/// Single-slot frame reuse for the logic thread.
///
/// Dispatch acquires the frame, runs a handler, and releases it.  A frame
/// that must outlive the dispatch (because it suspended) is detached instead
/// and the slot refills lazily.
#[derive(Debug, Default)]
pub struct FramePool {
    slot: Option<Frame>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reset frame with budget `ops`, reusing the pooled allocation.
    pub fn acquire(&mut self, ops: u64) -> Frame {
        match self.slot.take() {
            Some(mut frame) => {
                frame.reset(ops);
                frame
            }
            None => Frame::new(ops),
        }
    }

    pub fn release(&mut self, frame: Frame) {
        self.slot = Some(frame);
    }

    /// Hand the frame over to a continuation, keeping a snapshot.
    pub fn detach(&mut self, frame: Frame) -> Frame {
        let detached = frame.snapshot();
        self.release(frame);
        detached
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
