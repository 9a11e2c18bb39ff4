//! Host-side collaborators seen by a script invocation.
//!
//! An [`Actor`] is the entity an invocation runs on behalf of (usually a
//! connected player).  A [`Cancellable`] is the host event that triggered
//! the invocation, when the host lets scripts veto it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::script::Value;

/// Source of actor attributes.
///
/// Attribute names are given without the actor prefix; the interpreter
/// exposes `name` as `%player-name%` when the prefix is `player-`.
pub trait Actor: Send + Sync + fmt::Debug {
    /// Stable identity, used to key the event throttle.
    fn id(&self) -> String;

    /// All attributes, fetched together on first use.
    fn attributes(&self) -> Vec<(String, Value)>;
}

pub type ActorRef = Arc<dyn Actor>;

/// A host event that scripts may cancel.
pub trait Cancellable: Send + Sync + fmt::Debug {
    fn set_cancelled(&self, cancelled: bool);
    fn is_cancelled(&self) -> bool;
}

pub type CancellableRef = Arc<dyn Cancellable>;

/// Simple cancellation flag for hosts without their own event objects.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Cancellable for CancelFlag {
    fn set_cancelled(&self, cancelled: bool) {
        self.0.store(cancelled, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An actor with a fixed attribute list, for consoles and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticActor {
    pub id: String,
    pub attributes: Vec<(String, Value)>,
}

impl StaticActor {
    pub fn new(id: impl Into<String>) -> Self {
        StaticActor { id: id.into(), attributes: Vec::new() }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.push((name.to_owned(), value.into()));
        self
    }

    pub fn into_ref(self) -> ActorRef {
        Arc::new(self)
    }
}

impl Actor for StaticActor {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn attributes(&self) -> Vec<(String, Value)> {
        self.attributes.clone()
    }
}
