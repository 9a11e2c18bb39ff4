//! Effect handler registry.
//!
//! Effects are the side-effecting verbs of the language (`send`, `give-item`,
//! `cancel`...).  Hosts register them by name; the interpreter looks them up
//! when it executes an effect statement.  Names are case-insensitive and the
//! last registration for a name wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::actor::ActorRef;
use crate::script::{Frame, Value};

/// A registered effect.  Receives the invoking actor (if any), the evaluated
/// arguments and the invocation's frame.  An `Err` aborts the invocation
/// with a script error naming the effect.
pub type EffectHandler =
    Arc<dyn Fn(Option<&ActorRef>, &[Value], &mut Frame) -> Result<(), String> + Send + Sync>;

#[derive(Default, Clone)]
pub struct EffectRegistry {
    handlers: HashMap<String, EffectHandler>,
}

impl fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRegistry").field("names", &self.names()).finish()
    }
}

impl EffectRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the engine-level effects: `cancel`,
    /// `uncancel`, `log` and `set-local`.
    pub fn with_core_effects() -> Self {
        let mut r = Self::new();
        r.register("cancel", |_, _, frame| {
            frame.cancel_event(true);
            Ok(())
        });
        r.register("uncancel", |_, _, frame| {
            frame.cancel_event(false);
            Ok(())
        });
        r.register("log", |actor, args, _| {
            let parts: Vec<String> = args.iter().map(Value::as_string).collect();
            match actor {
                Some(a) => info!(target: "flok", "[{}] {}", a.id(), parts.join(" ")),
                None => info!(target: "flok", "{}", parts.join(" ")),
            }
            Ok(())
        });
        r.register("set-local", |_, args, frame| {
            let name = args.first().map(Value::as_string).unwrap_or_default();
            if name.is_empty() {
                return Err("expected a variable name".to_owned());
            }
            frame.set_local(name, args.get(1).cloned().unwrap_or_default());
            Ok(())
        });
        r
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(Option<&ActorRef>, &[Value], &mut Frame) -> Result<(), String> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        debug!(target: "flok", "registered effect '{key}'");
        self.handlers.insert(key, Arc::new(handler));
    }

    /// Remove a handler.  Returns `true` if one was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.handlers.remove(&name.to_lowercase()).is_some();
        if removed {
            debug!(target: "flok", "unregistered effect '{name}'");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<EffectHandler> {
        self.handlers
            .get(name)
            .or_else(|| self.handlers.get(&name.to_lowercase()))
            .cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
