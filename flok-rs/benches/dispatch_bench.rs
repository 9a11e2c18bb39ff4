use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flok::actor::StaticActor;
use flok::script::{CompiledScript, Limits};
use flok::{Engine, EffectRegistry, PersistentStore, Value};

const SCRIPT: &str = "\
on player chat:
    %words% = split(%message%, \" \")
    %total% = 0
    for %w% in %words%:
        %total% += length(%w%)
    if %total% > 40:
        noop \"long message from %player-name%\"

on player join:
    __joins__ += 1

function fib(n):
    if %n% < 2:
        return %n%
    return fib(%n% - 1) + fib(%n% - 2)

command fib(n):
    noop fib(num(%n%))
";

fn engine() -> Engine {
    let mut effects = EffectRegistry::with_core_effects();
    effects.register("noop", |_, args, _| {
        black_box(args);
        Ok(())
    });
    let mut engine = Engine::new(Arc::new(PersistentStore::in_memory()), effects, Limits::default());
    engine.load_source("bench.fk", SCRIPT);
    engine
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile", |b| b.iter(|| CompiledScript::compile("bench.fk", black_box(SCRIPT))));
}

fn bench_dispatch(c: &mut Criterion) {
    let mut engine = engine();
    let actor = StaticActor::new("p1").with("name", "Bench").into_ref();
    let message = Value::from("the quick brown fox jumps over the lazy dog again and again");

    let mut g = c.benchmark_group("dispatch");
    g.bench_function("event_with_loop", |b| {
        b.iter(|| engine.dispatch_event("player chat", Some(actor.clone()), &[("message", message.clone())]))
    });
    g.bench_function("persistent_increment", |b| b.iter(|| engine.dispatch_event("player join", None, &[])));
    g.bench_function("unmatched_event", |b| b.iter(|| engine.dispatch_event("nobody listens", None, &[])));
    g.bench_function("recursive_command", |b| b.iter(|| engine.dispatch_command("fib", None, &["12"])));
    g.finish();
}

criterion_group!(benches, bench_compile, bench_dispatch);
criterion_main!(benches);
