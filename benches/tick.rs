use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use tickwork::blackboard::{AddEntryRequest, GetEntryRequest};
use tickwork::{
    Blackboard, CapabilitySpec, Command, EntityConfig, Registry, Session, SessionConfig, SimTime,
    TelemetryAgent, Version,
};

const ENTITIES: usize = 64;

fn make_session(config: SessionConfig) -> Session {
    let entities = (0..ENTITIES).map(|i| {
        EntityConfig::new(&format!("BLUE:Unit {i}"))
            .unwrap()
            .capability(CapabilitySpec::at_least(TelemetryAgent::NAME, Version::new(1, 0, 0)))
            .capability(CapabilitySpec::at_least(Blackboard::NAME, Version::new(1, 0, 0)))
            .setting(TelemetryAgent::NAME, serde_json::json!({ "keys": ["speed"] }))
    });
    let mut session = Session::start(Arc::new(Registry::with_builtins()), entities, config).unwrap();
    for i in 0..ENTITIES {
        let add = AddEntryRequest::new("speed", 10_i64, SimTime::ZERO);
        session.submit(Command::new(format!("BLUE:Unit {i}"), add)).unwrap();
    }
    session.tick(SimTime::ZERO).unwrap();
    session
}

fn bench_tick_with_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.throughput(Throughput::Elements(ENTITIES as u64));
    group.bench_function("sync/get_per_entity", |b| {
        b.iter_batched_ref(
            || make_session(SessionConfig::default()),
            |session| {
                for i in 0..ENTITIES {
                    session
                        .submit(Command::new(format!("BLUE:Unit {i}"), GetEntryRequest::new("speed")))
                        .unwrap();
                }
                session.tick_again().unwrap()
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_idle_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for (name, config) in [
        ("sync/idle", SessionConfig::default()),
        ("async/idle", SessionConfig::asynchronous()),
    ] {
        let mut session = make_session(config);
        let mut now = 0;
        group.bench_function(name, |b| {
            b.iter(|| {
                now += 1;
                session.tick(SimTime::from_millis(now)).unwrap()
            });
        });
        session.close().unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_tick_with_commands, bench_idle_ticks);
criterion_main!(benches);
