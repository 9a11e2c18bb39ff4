//! The `flok` command line.
//!
//! ```text
//! flok [--config FILE] check <FILES>...
//! flok [--config FILE] run [--scripts DIR] (--event NAME | --command NAME [ARGS]...) [--ticks N]
//! flok [--config FILE] storage (list | get KEY | set KEY VALUE | reset)
//! flok [--config FILE] info [--scripts DIR]
//! ```
//!
//! `run` fires one event or command as a console actor.  Effects named
//! `send` and `broadcast` print to stdout; pending `wait`s are driven by the
//! tokio timer for at most `--ticks` ticks before the store is saved.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::time::{interval_at, sleep, Instant as TokioInstant};
use tracing::debug;

use crate::actor::StaticActor;
use crate::config::{ConfigError, EngineConfig};
use crate::effects::EffectRegistry;
use crate::engine::{DispatchReport, Engine};
use crate::error::StoreError;
use crate::scheduler::TokioScheduler;
use crate::script::{CompiledScript, Value};
use crate::store::PersistentStore;

// ── Arguments ─────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "flok", version, about = "Flok script engine")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile script files and report the result of each
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Load the scripts folder and fire one event or command
    Run {
        /// Scripts folder (defaults to the configured one)
        #[arg(long, value_name = "DIR")]
        scripts: Option<PathBuf>,
        /// Event to fire
        #[arg(long, required_unless_present = "command", conflicts_with = "command")]
        event: Option<String>,
        /// Command to run, followed by its arguments
        #[arg(long, num_args = 1.., value_name = "NAME [ARGS]")]
        command: Vec<String>,
        /// Longest time to keep resuming waiting handlers, in ticks
        #[arg(long, default_value_t = 200)]
        ticks: u64,
    },
    /// Inspect or edit persistent variables
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },
    /// Summarize the scripts folder
    Info {
        #[arg(long, value_name = "DIR")]
        scripts: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum StorageAction {
    /// Print every variable
    List,
    /// Print one variable
    Get { key: String },
    /// Set a variable; VALUE is read as JSON when it parses, else as text
    Set { key: String, value: String },
    /// Delete every variable
    Reset,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0} script(s) failed to compile")]
    CheckFailed(usize),
    #[error("no such command: {0}")]
    UnknownCommand(String),
}

// ── Console ───────────────────────────────────────────────────────────────────

/// Output collected from the console effects.
#[derive(Debug, Clone, Default)]
pub struct Console {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Console {
    fn push(&self, line: String) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(line);
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn flush_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        for line in self.drain() {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

/// Core effects plus `send` and `broadcast` writing to `console`.
pub fn console_effects(console: &Console) -> EffectRegistry {
    let mut effects = EffectRegistry::with_core_effects();
    let c = console.clone();
    effects.register("send", move |actor, args, _| {
        let text = joined(args);
        match actor {
            Some(a) => c.push(format!("[to {}] {text}", a.id())),
            None => c.push(text),
        }
        Ok(())
    });
    let c = console.clone();
    effects.register("broadcast", move |_, args, _| {
        c.push(format!("[all] {}", joined(args)));
        Ok(())
    });
    effects
}

fn joined(args: &[Value]) -> String {
    args.iter().map(Value::as_string).collect::<Vec<_>>().join(" ")
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn execute(cli: Cli, config: &EngineConfig, out: &mut impl Write) -> Result<(), CliError> {
    match cli.command {
        Command::Check { files } => check(&files, out),
        Command::Run { scripts, event, command, ticks } => {
            let dir = scripts.unwrap_or_else(|| config.scripts_dir.clone());
            let target = match event {
                Some(name) => Target::Event(name),
                None => {
                    let mut words = command.into_iter();
                    let name = words.next().unwrap_or_default();
                    Target::Command(name, words.collect())
                }
            };
            run(config, &dir, &target, ticks, out).await.map(|_| ())
        }
        Command::Storage { action } => storage(config, action, out),
        Command::Info { scripts } => {
            let dir = scripts.unwrap_or_else(|| config.scripts_dir.clone());
            info(config, &dir, out)
        }
    }
}

/// Compile each file; fails if any did not compile.
pub fn check(files: &[PathBuf], out: &mut impl Write) -> Result<(), CliError> {
    let mut failed = 0;
    for path in files {
        let name = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let outcome = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|src| CompiledScript::compile(&name, &src).map_err(|e| format!("line {}: {}", e.line, e.message())));
        match outcome {
            Ok(s) => writeln!(
                out,
                "  ok  {name}: {} event(s), {} command(s), {} function(s)",
                s.event_count(),
                s.command_count(),
                s.function_count()
            )?,
            Err(msg) => {
                failed += 1;
                writeln!(out, "  ERR {name}: {msg}")?;
            }
        }
    }
    if failed > 0 {
        return Err(CliError::CheckFailed(failed));
    }
    Ok(())
}

/// What `run` fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Event(String),
    Command(String, Vec<String>),
}

/// Totals over the initial dispatch and every resumption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub handlers_run: usize,
    pub failures: usize,
    /// Handlers still waiting when the tick allowance ran out.
    pub abandoned: usize,
}

impl RunSummary {
    fn absorb(&mut self, report: &DispatchReport) {
        self.handlers_run += report.handlers_run;
        self.failures += report.failures.len();
    }
}

pub async fn run(
    config: &EngineConfig,
    dir: &Path,
    target: &Target,
    max_ticks: u64,
    out: &mut impl Write,
) -> Result<RunSummary, CliError> {
    let store = Arc::new(PersistentStore::open(&config.data_file)?);
    let console = Console::default();
    let mut engine = Engine::from_config(config, Arc::clone(&store), console_effects(&console));
    let (scheduler, mut due) = TokioScheduler::new(config.tick_duration());
    engine.set_scheduler(Box::new(scheduler));

    for r in engine.load_all(dir) {
        if !r.is_ok() {
            writeln!(out, "  ERR {r}")?;
        }
    }

    let actor = StaticActor::new("console").with("name", "Console").into_ref();
    let first = match target {
        Target::Event(name) => engine.dispatch_event(name, Some(actor), &[]),
        Target::Command(name, args) => engine
            .dispatch_command(name, Some(actor), args.as_slice())
            .ok_or_else(|| CliError::UnknownCommand(name.clone()))?,
    };
    let mut summary = RunSummary::default();
    summary.absorb(&first);
    let mut waiting = first.suspended;
    console.flush_to(out)?;

    let deadline = sleep(config.tick_duration().saturating_mul(u32::try_from(max_ticks).unwrap_or(u32::MAX)));
    tokio::pin!(deadline);
    let mut autosave = config.autosave_interval().map(|period| interval_at(TokioInstant::now() + period, period));
    while waiting > 0 {
        tokio::select! {
            Some(c) = due.recv() => {
                waiting -= 1;
                let report = engine.resume(c);
                waiting += report.suspended;
                summary.absorb(&report);
                console.flush_to(out)?;
            }
            _ = async {
                match autosave.as_mut() {
                    Some(timer) => { timer.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                store.save()?;
                debug!(target: "flok", "autosaved persistent store");
            }
            _ = &mut deadline => {
                summary.abandoned = waiting;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                summary.abandoned = waiting;
                break;
            }
        }
    }
    if summary.abandoned > 0 {
        writeln!(out, "  {} handler(s) still waiting after {max_ticks} tick(s)", summary.abandoned)?;
    }
    engine.shutdown()?;
    Ok(summary)
}

fn storage(config: &EngineConfig, action: StorageAction, out: &mut impl Write) -> Result<(), CliError> {
    let store = PersistentStore::open(&config.data_file)?;
    match action {
        StorageAction::List => {
            let mut keys = store.keys();
            keys.sort();
            for k in &keys {
                writeln!(out, "{k} = {}", store.get(k).as_string())?;
            }
            writeln!(out, "{} variable(s)", keys.len())?;
        }
        StorageAction::Get { key } => {
            let value = store.get(&key);
            writeln!(out, "{}", if value.is_null() { "null".to_owned() } else { value.as_string() })?;
        }
        StorageAction::Set { key, value } => {
            let parsed = serde_json::from_str::<serde_json::Value>(&value)
                .map_or_else(|_| Value::from(value.as_str()), |json| Value::from_serializable(&json));
            store.set(&key, parsed);
            store.save()?;
        }
        StorageAction::Reset => {
            store.reset();
            store.save()?;
            writeln!(out, "storage cleared")?;
        }
    }
    Ok(())
}

fn info(config: &EngineConfig, dir: &Path, out: &mut impl Write) -> Result<(), CliError> {
    let mut engine = Engine::from_config(config, Arc::new(PersistentStore::in_memory()), EffectRegistry::new());
    let results = engine.load_all(dir);
    let ok = results.iter().filter(|r| r.is_ok()).count();
    writeln!(out, "scripts:  {ok}/{} loaded from {}", results.len(), dir.display())?;
    let events = engine.event_names();
    writeln!(out, "events:   {} ({})", events.len(), events.join(", "))?;
    let commands = engine.command_names();
    writeln!(out, "commands: {} ({})", commands.len(), commands.join(", "))?;
    let functions: usize = engine.scripts().map(|s| s.function_count()).sum();
    writeln!(out, "functions: {functions}")?;
    Ok(())
}
