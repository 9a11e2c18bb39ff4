//! Dispatch engine.
//!
//! [`Engine`] owns the loaded scripts and two merged indices built from them:
//!
//! - normalized event name → every `(script, handler)` pair listening to it,
//!   in script load order (sorted file names);
//! - command name or alias → the single handler that serves it (the
//!   last-loaded script wins a collision).
//!
//! Dispatch runs each matching handler in its own frame.  A failing handler
//! is logged and reported but never stops the others.  A handler that hits
//! a `wait` is handed to the [`Scheduler`] as a [`Continuation`]; the host
//! gives it back through [`Engine::resume`] once it is due.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::actor::{ActorRef, CancellableRef};
use crate::config::EngineConfig;
use crate::effects::EffectRegistry;
use crate::error::{RuntimeError, StoreError};
use crate::event::{normalize_event, Throttle};
use crate::scheduler::{Scheduler, TickScheduler};
use crate::script::ast::{Block, CommandBlock};
use crate::script::{CompiledScript, Continuation, Flow, Frame, FramePool, Interpreter, Limits, Suspension, Value};
use crate::store::PersistentStore;

// ── Load results ──────────────────────────────────────────────────────────────

/// Outcome of loading one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Ok,
    Parse { message: String, line: usize },
    Io { message: String },
    Unexpected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub file_name: String,
    pub status: LoadStatus,
}

impl LoadResult {
    fn new(file_name: &str, status: LoadStatus) -> Self {
        LoadResult { file_name: file_name.to_owned(), status }
    }

    fn io(file_name: &str, message: impl Into<String>) -> Self {
        Self::new(file_name, LoadStatus::Io { message: message.into() })
    }

    pub fn is_ok(&self) -> bool {
        self.status == LoadStatus::Ok
    }

    /// Source line of a parse error.
    pub fn error_line(&self) -> Option<usize> {
        match self.status {
            LoadStatus::Parse { line, .. } => Some(line),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            LoadStatus::Ok => None,
            LoadStatus::Parse { message, .. }
            | LoadStatus::Io { message }
            | LoadStatus::Unexpected { message } => Some(message),
        }
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            LoadStatus::Ok => write!(f, "{}: ok", self.file_name),
            LoadStatus::Parse { message, line } => write!(f, "{} (line {line}): {message}", self.file_name),
            LoadStatus::Io { message } => write!(f, "{}: {message}", self.file_name),
            LoadStatus::Unexpected { message } => write!(f, "{}: unexpected error: {message}", self.file_name),
        }
    }
}

// ── Dispatch results ──────────────────────────────────────────────────────────

/// A handler that halted with an error.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    pub script: String,
    pub error: RuntimeError,
}

/// What one dispatch (or resumption) did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Handlers entered, including ones that failed or suspended.
    pub handlers_run: usize,
    /// Handlers that stopped at a `wait` and were scheduled.
    pub suspended: usize,
    pub failures: Vec<HandlerFailure>,
    /// The throttle dropped this firing.
    pub throttled: bool,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Declared shape of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub script: String,
    pub params: Vec<String>,
    pub permission: Option<String>,
    pub description: Option<String>,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
struct EventEntry {
    script: Arc<CompiledScript>,
    body: Block,
}

#[derive(Debug, Clone)]
struct CommandEntry {
    script: Arc<CompiledScript>,
    block: CommandBlock,
}

/// Inputs bound into a fresh frame.
struct Invocation {
    actor: Option<ActorRef>,
    cancellable: Option<CancellableRef>,
    params: Vec<(String, Value)>,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    /// Keyed by file name, so iteration is load order.
    scripts: BTreeMap<String, Arc<CompiledScript>>,
    event_index: HashMap<String, Vec<EventEntry>>,
    command_index: HashMap<String, CommandEntry>,
    throttle: Throttle,
    store: Arc<PersistentStore>,
    effects: EffectRegistry,
    limits: Limits,
    extension: String,
    pool: FramePool,
    scheduler: Box<dyn Scheduler>,
    closed: bool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("scripts", &self.scripts.keys().collect::<Vec<_>>())
            .field("events", &self.event_index.len())
            .field("commands", &self.command_index.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine with no scripts, scheduling waits on a private
    /// [`TickScheduler`] until [`Engine::set_scheduler`] replaces it.
    pub fn new(store: Arc<PersistentStore>, effects: EffectRegistry, limits: Limits) -> Self {
        Engine {
            scripts: BTreeMap::new(),
            event_index: HashMap::new(),
            command_index: HashMap::new(),
            throttle: Throttle::new(),
            store,
            effects,
            limits,
            extension: "fk".to_owned(),
            pool: FramePool::new(),
            scheduler: Box::new(TickScheduler::new()),
            closed: false,
        }
    }

    pub fn from_config(config: &EngineConfig, store: Arc<PersistentStore>, effects: EffectRegistry) -> Self {
        let mut engine = Self::new(store, effects, config.limits());
        engine.extension = config.script_extension.trim_start_matches('.').to_owned();
        engine
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn set_scheduler(&mut self, scheduler: Box<dyn Scheduler>) {
        self.scheduler = scheduler;
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    /// Replace every loaded script with the script files in `dir`, loaded in
    /// file-name order.  A script that fails to load is reported and skipped.
    pub fn load_all(&mut self, dir: &Path) -> Vec<LoadResult> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target: "flok", "scripts folder {} not readable: {e}", dir.display());
                return Vec::new();
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == self.extension.as_str()))
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        self.scripts.clear();
        let results: Vec<LoadResult> = files.iter().map(|p| self.load_path(p)).collect();
        for r in &results {
            if r.is_ok() {
                debug!(target: "flok", "loaded {}", r.file_name);
            } else {
                warn!(target: "flok", "{r}");
            }
        }
        self.rebuild_indices();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        info!(target: "flok", "Loaded {ok}/{} script(s)", results.len());
        results
    }

    /// Load or reload one file from `dir`; the extension is optional.
    pub fn load_single(&mut self, dir: &Path, file_name: &str) -> LoadResult {
        let suffix = format!(".{}", self.extension);
        let name = if file_name.ends_with(&suffix) { file_name.to_owned() } else { format!("{file_name}{suffix}") };
        let path = dir.join(&name);
        if !path.is_file() {
            return LoadResult::io(&name, "File not found");
        }
        let result = self.load_path(&path);
        if !result.is_ok() {
            warn!(target: "flok", "{result}");
        }
        self.rebuild_indices();
        result
    }

    /// Compile in-memory source under `name`, replacing any script of that name.
    pub fn load_source(&mut self, name: &str, src: &str) -> LoadResult {
        let result = self.install(name, src);
        if !result.is_ok() {
            warn!(target: "flok", "{result}");
        }
        self.rebuild_indices();
        result
    }

    fn load_path(&mut self, path: &Path) -> LoadResult {
        let name = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => return LoadResult::io(&name, e.to_string()),
        };
        match String::from_utf8(bytes) {
            Ok(src) => self.install(&name, &src),
            Err(_) => LoadResult::new(&name, LoadStatus::Unexpected { message: "not valid UTF-8".to_owned() }),
        }
    }

    fn install(&mut self, name: &str, src: &str) -> LoadResult {
        match CompiledScript::compile(name, src) {
            Ok(script) => {
                let stray = script.stray_statements();
                if stray > 0 {
                    debug!(target: "flok", "{name}: {stray} top-level statement(s) outside any block are ignored");
                }
                self.scripts.insert(name.to_owned(), Arc::new(script));
                LoadResult::new(name, LoadStatus::Ok)
            }
            Err(e) => LoadResult::new(name, LoadStatus::Parse { message: e.message(), line: e.line }),
        }
    }

    fn rebuild_indices(&mut self) {
        self.event_index.clear();
        self.command_index.clear();
        self.throttle.clear();
        for script in self.scripts.values() {
            for (event, blocks) in script.events() {
                let handlers = self.event_index.entry(event.to_owned()).or_default();
                handlers.extend(blocks.iter().map(|b| EventEntry { script: Arc::clone(script), body: b.body.clone() }));
            }
            let mut commands: Vec<&CommandBlock> = script.commands().collect();
            commands.sort_by_key(|c| c.line);
            // Aliases first so a real name in the same script is never shadowed.
            for cmd in &commands {
                for alias in &cmd.aliases {
                    self.command_index.insert(
                        alias.to_lowercase(),
                        CommandEntry { script: Arc::clone(script), block: (*cmd).clone() },
                    );
                }
            }
            for cmd in commands {
                self.command_index
                    .insert(cmd.name.to_lowercase(), CommandEntry { script: Arc::clone(script), block: cmd.clone() });
            }
        }
        self.closed = false;
        debug!(
            target: "flok",
            "indexed {} event(s) and {} command name(s)",
            self.event_index.len(),
            self.command_index.len()
        );
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Fire `event` for `actor`, binding `params` as locals in each handler.
    pub fn dispatch_event(&mut self, event: &str, actor: Option<ActorRef>, params: &[(&str, Value)]) -> DispatchReport {
        self.dispatch_event_at(event, actor, params, None, Instant::now())
    }

    /// Like [`Engine::dispatch_event`], letting handlers cancel the host event.
    pub fn dispatch_cancellable(
        &mut self,
        event: &str,
        actor: Option<ActorRef>,
        params: &[(&str, Value)],
        cancellable: CancellableRef,
    ) -> DispatchReport {
        self.dispatch_event_at(event, actor, params, Some(cancellable), Instant::now())
    }

    /// Dispatch with an explicit clock reading for the throttle.
    pub fn dispatch_event_at(
        &mut self,
        event: &str,
        actor: Option<ActorRef>,
        params: &[(&str, Value)],
        cancellable: Option<CancellableRef>,
        now: Instant,
    ) -> DispatchReport {
        let key = normalize_event(event);
        let mut report = DispatchReport::default();
        if let Some(a) = &actor {
            if !self.throttle.allow(&key, &a.id(), now) {
                trace!(target: "flok", "throttled {key} for {}", a.id());
                report.throttled = true;
                return report;
            }
        }
        let Some(handlers) = self.event_index.get(&key).cloned() else {
            return report;
        };
        for entry in handlers {
            let invocation = Invocation {
                actor: actor.clone(),
                cancellable: cancellable.clone(),
                params: params.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect(),
            };
            self.run(&entry.script, &entry.body, invocation, &mut report);
        }
        report
    }

    /// Run the command named `name` (or aliased to it).  `None` when no
    /// script defines it.
    ///
    /// The handler sees `%args%` (every argument, as strings), `%args-count%`,
    /// and one local per declared parameter; parameters past the end of
    /// `argv` are the empty string.
    pub fn dispatch_command<S: AsRef<str>>(
        &mut self,
        name: &str,
        actor: Option<ActorRef>,
        argv: &[S],
    ) -> Option<DispatchReport> {
        let entry = self.command_index.get(&name.to_lowercase())?.clone();
        let mut params = Vec::with_capacity(entry.block.params.len() + 2);
        params.push(("args".to_owned(), Value::list(argv.iter().map(|a| Value::from(a.as_ref())).collect())));
        params.push(("args-count".to_owned(), Value::from(argv.len())));
        for (i, param) in entry.block.params.iter().enumerate() {
            let value = argv.get(i).map_or_else(|| Value::from(""), |a| Value::from(a.as_ref()));
            params.push((param.clone(), value));
        }
        let mut report = DispatchReport::default();
        let invocation = Invocation { actor, cancellable: None, params };
        self.run(&entry.script, &entry.block.body, invocation, &mut report);
        Some(report)
    }

    /// Continue a suspended invocation handed back by the scheduler.
    pub fn resume(&mut self, continuation: Continuation) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Continuation { script, pending, mut frame, .. } = continuation;
        if self.closed {
            debug!(target: "flok", "engine shut down; dropping continuation of {}", script.name());
            return report;
        }
        let result = Interpreter::new(&script, &self.store, &self.effects, &self.limits).resume(pending, &mut frame);
        report.handlers_run += 1;
        match result {
            Ok(Flow::Completed) => {}
            Ok(Flow::Suspended(s)) => self.suspend(&script, s, frame, &mut report),
            Err(e) => self.fail(&script, e, &mut report),
        }
        report
    }

    fn run(&mut self, script: &Arc<CompiledScript>, body: &Block, invocation: Invocation, report: &mut DispatchReport) {
        let mut frame = self.pool.acquire(self.limits.max_ops);
        frame.actor = invocation.actor;
        frame.cancellable = invocation.cancellable;
        for (name, value) in invocation.params {
            frame.set_local(name, value);
        }
        let result = Interpreter::new(script, &self.store, &self.effects, &self.limits).exec_block(body, &mut frame);
        report.handlers_run += 1;
        match result {
            Ok(Flow::Suspended(s)) => {
                let detached = self.pool.detach(frame);
                self.suspend(script, s, detached, report);
            }
            Ok(Flow::Completed) => self.pool.release(frame),
            Err(e) => {
                self.pool.release(frame);
                self.fail(script, e, report);
            }
        }
    }

    fn suspend(&mut self, script: &Arc<CompiledScript>, s: Suspension, frame: Frame, report: &mut DispatchReport) {
        trace!(target: "flok", "[{}] waiting {} tick(s)", script.name(), s.delay_ticks);
        report.suspended += 1;
        let delay = s.delay_ticks;
        self.scheduler.schedule(delay, Continuation::new(Arc::clone(script), s, frame));
    }

    fn fail(&self, script: &CompiledScript, error: RuntimeError, report: &mut DispatchReport) {
        let name = script.name();
        match &error {
            RuntimeError::Script { message, line } => {
                warn!(target: "flok", "[{name}] script (line {line}): {message}");
            }
            RuntimeError::OperationLimitExceeded { limit } => {
                warn!(target: "flok", "[{name}] script exceeded the operation limit ({limit}) and was halted");
            }
            RuntimeError::CallDepthExceeded { max } => {
                warn!(target: "flok", "[{name}] script exceeded the maximum call depth ({max}); infinite recursion?");
            }
        }
        report.failures.push(HandlerFailure { script: name.to_owned(), error });
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn has_event_handler(&self, event: &str) -> bool {
        self.event_index.get(&normalize_event(event)).is_some_and(|h| !h.is_empty())
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.command_index.contains_key(&name.to_lowercase())
    }

    pub fn command_info(&self, name: &str) -> Option<CommandInfo> {
        let entry = self.command_index.get(&name.to_lowercase())?;
        let b = &entry.block;
        Some(CommandInfo {
            name: b.name.clone(),
            script: entry.script.name().to_owned(),
            params: b.params.clone(),
            permission: b.permission.clone(),
            description: b.description.clone(),
            aliases: b.aliases.clone(),
        })
    }

    pub fn loaded_script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Loaded scripts in load order.
    pub fn scripts(&self) -> impl Iterator<Item = &Arc<CompiledScript>> {
        self.scripts.values()
    }

    /// Normalized names of every event with a handler, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.event_index.keys().cloned().collect();
        names.sort();
        names
    }

    /// Primary command names (not aliases), sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.command_index.values().map(|e| e.block.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectRegistry {
        &mut self.effects
    }

    /// Save the store, then drop every script.  Continuations still in
    /// flight are discarded when they come back.
    pub fn shutdown(&mut self) -> Result<(), StoreError> {
        let saved = self.store.force_save();
        self.scripts.clear();
        self.event_index.clear();
        self.command_index.clear();
        self.throttle.clear();
        self.closed = true;
        info!(target: "flok", "engine shut down");
        saved
    }
}
