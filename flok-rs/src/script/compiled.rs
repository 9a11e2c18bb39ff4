//! A parsed script plus its name indices.

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{CommandBlock, EventBlock, FunctionDef, Item, Program};
use super::parser;
use crate::error::ParseError;
use crate::event::normalize_event;

/// One loaded script file.
///
/// Built once; the indices map normalized names to handlers so lookups are
/// exact matches.  Within a script, several `on` blocks may share an event
/// (run in source order) while a repeated command or function name keeps the
/// last definition.
#[derive(Debug)]
pub struct CompiledScript {
    name: String,
    program: Program,
    events: HashMap<String, Vec<EventBlock>>,
    commands: HashMap<String, CommandBlock>,
    functions: HashMap<String, Arc<FunctionDef>>,
}

impl CompiledScript {
    /// Parse `src` and build the indices.  `name` identifies the script in
    /// diagnostics (normally its file name).
    pub fn compile(name: &str, src: &str) -> Result<Self, ParseError> {
        let program = parser::parse(src, name)?;
        Ok(Self::from_program(name, program))
    }

    pub fn from_program(name: &str, program: Program) -> Self {
        let mut events: HashMap<String, Vec<EventBlock>> = HashMap::new();
        let mut commands = HashMap::new();
        let mut functions = HashMap::new();
        for item in &program.items {
            match item {
                Item::Event(e) => events.entry(normalize_event(&e.event)).or_default().push(e.clone()),
                Item::Command(c) => {
                    commands.insert(c.name.to_lowercase(), c.clone());
                }
                Item::Function(f) => {
                    functions.insert(f.name.to_lowercase(), Arc::new(f.clone()));
                }
                Item::Stmt(_) => {}
            }
        }
        CompiledScript { name: name.to_owned(), program, events, commands, functions }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Handlers for a normalized event name, in source order.
    pub fn event_handlers(&self, event: &str) -> &[EventBlock] {
        self.events.get(event).map_or(&[], Vec::as_slice)
    }

    pub fn command(&self, name: &str) -> Option<&CommandBlock> {
        self.commands.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<FunctionDef>> {
        self.functions.get(name)
    }

    pub fn events(&self) -> impl Iterator<Item = (&str, &[EventBlock])> {
        self.events.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandBlock> {
        self.commands.values()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Top-level statements outside any block; these never run.
    pub fn stray_statements(&self) -> usize {
        self.program.items.iter().filter(|i| matches!(i, Item::Stmt(_))).count()
    }
}
