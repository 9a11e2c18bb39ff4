//! Flok: an event-driven scripting language engine.
//!
//! Scripts declare `on <event>:` handlers, `command` handlers and helper
//! `function`s.  An [`Engine`] loads a directory of scripts, routes host
//! events and commands to them, and resumes handlers that `wait`.
//!
//! The host supplies the collaborators: effect handlers
//! ([`EffectRegistry`]), actors ([`actor::Actor`]), a [`Scheduler`] for
//! delayed resumption, and the [`PersistentStore`] backing `__variables__`.

pub mod actor;
pub mod cli;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod scheduler;
pub mod script;
pub mod store;

pub use config::EngineConfig;
pub use effects::EffectRegistry;
pub use engine::{CommandInfo, DispatchReport, Engine, HandlerFailure, LoadResult, LoadStatus};
pub use error::{ParseError, RuntimeError, StoreError};
pub use scheduler::{Scheduler, TickScheduler, TokioScheduler};
pub use script::{CompiledScript, Value};
pub use store::PersistentStore;
