//! End-to-end scripts through the dispatch engine.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flok::actor::StaticActor;
use flok::script::Limits;
use flok::{Engine, EffectRegistry, PersistentStore, RuntimeError, TickScheduler, Value};

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Host {
    engine: Engine,
    ticks: TickScheduler,
    out: Arc<Mutex<Vec<String>>>,
}

impl Host {
    fn new(limits: Limits) -> Self {
        Self::with_store(limits, Arc::new(PersistentStore::in_memory()))
    }

    fn with_store(limits: Limits, store: Arc<PersistentStore>) -> Self {
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut effects = EffectRegistry::with_core_effects();
        for name in ["send", "broadcast"] {
            let sink = Arc::clone(&out);
            effects.register(name, move |_, args, _| {
                let parts: Vec<String> = args.iter().map(Value::as_string).collect();
                sink.lock().unwrap().push(parts.join(" "));
                Ok(())
            });
        }
        let ticks = TickScheduler::new();
        let engine = Engine::new(store, effects, limits).with_scheduler(ticks.clone());
        Host { engine, ticks, out }
    }

    fn load(&mut self, name: &str, src: &str) -> &mut Self {
        let r = self.engine.load_source(name, src);
        assert!(r.is_ok(), "{r}");
        self
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.out.lock().unwrap())
    }

    /// Advance the clock one tick at a time, resuming whatever comes due.
    fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            for c in self.ticks.advance(1) {
                self.engine.resume(c);
            }
        }
    }
}

fn sample_scripts() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts"))
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

#[test]
fn both_handlers_run_in_sort_order_despite_an_error() {
    let mut host = Host::new(Limits::default());
    host.load("b.fk", "on example-event:\n    send \"from b\"\n");
    host.load("a.fk", "on example-event:\n    send \"from a\"\n    explode\n");
    let report = host.engine.dispatch_event("example-event", None, &[]);
    assert_eq!(report.handlers_run, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].error,
        RuntimeError::Script { message: "Unknown effect: explode".into(), line: 3 }
    );
    assert_eq!(host.take(), vec!["from a", "from b"]);
}

#[test]
fn throttled_event_fires_once_per_interval() {
    let mut host = Host::new(Limits::default());
    host.load("m.fk", "on player move:\n    send \"step\"\n");
    let actor = StaticActor::new("p1").into_ref();
    let other = StaticActor::new("p2").into_ref();
    let t0 = Instant::now();
    host.engine.dispatch_event_at("Player Move", Some(actor.clone()), &[], None, t0);
    host.engine.dispatch_event_at("player-move", Some(actor.clone()), &[], None, t0 + Duration::from_millis(200));
    host.engine.dispatch_event_at("player-move", Some(other), &[], None, t0 + Duration::from_millis(300));
    assert_eq!(host.take().len(), 2);
    host.engine.dispatch_event_at("player-move", Some(actor), &[], None, t0 + Duration::from_secs(1));
    assert_eq!(host.take().len(), 1);
}

#[test]
fn reload_clears_the_throttle() {
    let mut host = Host::new(Limits::default());
    host.load("m.fk", "on player tick:\n    send \"t\"\n");
    let actor = StaticActor::new("p1").into_ref();
    let t0 = Instant::now();
    host.engine.dispatch_event_at("player-tick", Some(actor.clone()), &[], None, t0);
    host.load("m.fk", "on player tick:\n    send \"t2\"\n");
    host.engine.dispatch_event_at("player-tick", Some(actor), &[], None, t0);
    assert_eq!(host.take(), vec!["t", "t2"]);
}

#[test]
fn mixed_case_parameters_bind_for_functions_and_commands() {
    let mut host = Host::new(Limits::default());
    host.load(
        "case.fk",
        "function twice(Count):\n    return %Count% * 2\n\non go:\n    send twice(4)\n\ncommand greet(Name):\n    send \"hi\" %Name%\n",
    );
    host.engine.dispatch_event("go", None, &[]);
    host.engine.dispatch_command("greet", None, &["Alex"]).unwrap();
    assert_eq!(host.take(), vec!["8", "hi Alex"]);
    assert_eq!(host.engine.command_info("greet").unwrap().params, vec!["Name"]);
}

#[test]
fn list_builtins_read_a_missing_list_as_empty() {
    let mut host = Host::new(Limits::default());
    host.load("sum.fk", "on go:\n    send sum(%nothing%)\n    send size(reverse(%nothing%))\n    send \"after\"\n");
    let report = host.engine.dispatch_event("go", None, &[]);
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(host.take(), vec!["0", "0", "after"]);
}

// ── Wait / resume ─────────────────────────────────────────────────────────────

#[test]
fn wait_defers_the_rest_and_keeps_locals() {
    let mut host = Host::new(Limits::default());
    host.load("w.fk", "on go:\n    %greeting% = \"hello\"\n    send \"A\"\n    wait 1 tick\n    send %greeting% \"B\"\n");
    host.engine.dispatch_event("go", None, &[]);
    assert_eq!(host.take(), vec!["A"]);
    host.run_ticks(1);
    assert_eq!(host.take(), vec!["hello B"]);
}

#[test]
fn wait_in_seconds_uses_twenty_ticks_per_second() {
    let mut host = Host::new(Limits::default());
    host.load("w.fk", "on go:\n    wait 1 second\n    send \"late\"\n");
    host.engine.dispatch_event("go", None, &[]);
    host.run_ticks(19);
    assert!(host.take().is_empty());
    host.run_ticks(1);
    assert_eq!(host.take(), vec!["late"]);
}

#[test]
fn countdown_sample_loops_across_waits() {
    let mut host = Host::new(Limits::default());
    let results = host.engine.load_all(sample_scripts());
    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
    let report = host.engine.dispatch_command("cd", None, &["2"]).unwrap();
    assert_eq!(report.suspended, 1);
    assert_eq!(host.take(), vec!["2"]);
    host.run_ticks(20);
    assert_eq!(host.take(), vec!["1"]);
    host.run_ticks(20);
    assert_eq!(host.take(), vec!["Go!"]);
    assert!(host.ticks.is_empty());
}

#[test]
fn persistent_counter_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.json");
    let actor = StaticActor::new("p1").with("name", "Sam").into_ref();
    {
        let store = Arc::new(PersistentStore::open(&data).unwrap());
        let mut host = Host::with_store(Limits::default(), store);
        host.engine.load_all(sample_scripts());
        host.engine.dispatch_event("player join", Some(actor.clone()), &[]);
        assert_eq!(host.take(), vec!["Welcome, Sam!", "Sam joined"]);
        host.engine.shutdown().unwrap();
    }
    let store = Arc::new(PersistentStore::open(&data).unwrap());
    assert_eq!(store.get("visits-Sam"), Value::from(1));
    let mut host = Host::with_store(Limits::default(), store);
    host.engine.load_all(sample_scripts());
    host.engine.dispatch_event("player join", Some(actor), &[]);
    assert_eq!(host.take(), vec!["Welcome back, Sam. Visit number 2.", "Sam joined"]);
}

#[test]
fn stats_sample_uses_functions_and_builtins() {
    let mut host = Host::new(Limits::default());
    host.engine.load_all(sample_scripts());
    let info = host.engine.command_info("stats").unwrap();
    assert_eq!(info.permission.as_deref(), Some("flok.stats"));
    let report = host.engine.dispatch_command("stats", None, &[] as &[&str]).unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(host.take(), vec!["scores: 0, 42, 100", "total: 142"]);
}

// ── Safety limits ─────────────────────────────────────────────────────────────

#[test]
fn infinite_loop_hits_the_operation_limit_for_any_budget() {
    for budget in [1, 10, 1_000, 50_000] {
        let mut host = Host::new(Limits { max_ops: budget, ..Limits::default() });
        host.load("spin.fk", "on spin:\n    while true:\n        %i% += 1\n");
        let report = host.engine.dispatch_event("spin", None, &[]);
        assert_eq!(report.failures[0].error, RuntimeError::OperationLimitExceeded { limit: budget });
    }
}

#[test]
fn runaway_recursion_stops_at_exactly_the_maximum_depth() {
    // Deep recursion needs more stack than a default test thread has.
    let handle = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let mut host = Host::new(Limits::default());
            host.load(
                "r.fk",
                "function dive(n):\n    __deepest__ = %n%\n    return dive(%n% + 1)\n\non go:\n    dive(1)\n",
            );
            let report = host.engine.dispatch_event("go", None, &[]);
            let deepest = host.engine.store().get("deepest");
            (report.failures[0].error.clone(), deepest)
        })
        .unwrap();
    let (error, deepest) = handle.join().unwrap();
    assert_eq!(error, RuntimeError::CallDepthExceeded { max: 64 });
    assert_eq!(deepest, Value::from(64));
}

#[test]
fn a_halted_handler_does_not_poison_the_next_dispatch() {
    let mut host = Host::new(Limits { max_ops: 200, ..Limits::default() });
    host.load("spin.fk", "on spin:\n    while true:\n        %i% += 1\n\non ping:\n    send \"pong\"\n");
    host.engine.dispatch_event("spin", None, &[]);
    let report = host.engine.dispatch_event("ping", None, &[]);
    assert!(report.is_clean());
    assert_eq!(host.take(), vec!["pong"]);
}
