//! The Flok language: values, lexer, parser, and interpreter.
//!
//! Source goes through [`lexer`] (tokens with INDENT/DEDENT), [`parser`]
//! (an immutable [`ast::Program`]) and [`compiled`] (name indices); the
//! [`Interpreter`] then runs handler bodies against a [`Frame`].
//!
//! ```rust
//! use flok::script::{CompiledScript, Flow, Frame, Interpreter, Limits};
//! use flok::{EffectRegistry, PersistentStore};
//!
//! let script = CompiledScript::compile("demo.fk", "on demo:\n    %x% = 6 * 7\n").unwrap();
//! let store = PersistentStore::in_memory();
//! let effects = EffectRegistry::with_core_effects();
//! let limits = Limits::default();
//! let interp = Interpreter::new(&script, &store, &effects, &limits);
//! let mut frame = Frame::new(limits.max_ops);
//! let body = &script.event_handlers("demo")[0].body;
//! assert!(matches!(interp.exec_block(body, &mut frame), Ok(Flow::Completed)));
//! assert_eq!(frame.get_local("x").unwrap().as_int(), 42);
//! ```

pub mod ast;
pub mod builtins;
pub mod compiled;
pub mod frame;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use compiled::CompiledScript;
pub use frame::{Frame, FramePool};
pub use interp::{Continuation, Flow, Interpreter, Limits, LoopState, Pending, Suspension};
pub use value::Value;
