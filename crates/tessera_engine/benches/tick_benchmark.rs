//! # Tick Pipeline Benchmark
//!
//! Measures a full `Engine::update` (admission, update pass, commit) over
//! growing entity counts, plus the cost of the verification hash.
//!
//! Run with: `cargo bench --package tessera_engine`

// Benchmarks don't need strict docs
#![allow(missing_docs)]

use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_core::{Component, ComponentRegistry, DataAccessor, Entity, Filter};
use tessera_engine::{Capabilities, Engine, EngineConfig, System, SystemOrdering, SystemResult, TickContext};

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

impl Component for Position {
    fn name() -> &'static str {
        "Position"
    }
}

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

impl Component for Velocity {
    fn name() -> &'static str {
        "Velocity"
    }
}

struct Movement {
    position: DataAccessor<Position>,
    velocity: DataAccessor<Velocity>,
}

impl System for Movement {
    fn name(&self) -> &str {
        "Movement"
    }

    fn filter(&self) -> Filter {
        Filter::empty().with(self.position).with(self.velocity)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ON_UPDATE
    }

    fn on_update(&self, _ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
        let velocity = *entity.current(self.velocity)?;
        let position = entity.modify(self.position)?;
        position.x += velocity.x;
        position.y += velocity.y;
        position.z += velocity.z;
        Ok(())
    }
}

/// Reads positions after `Movement`; forces a two-level group.
struct Bounds {
    position: DataAccessor<Position>,
}

impl System for Bounds {
    fn name(&self) -> &str {
        "Bounds"
    }

    fn filter(&self) -> Filter {
        Filter::empty().with(self.position)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ON_MODIFIED | Capabilities::ON_UPDATE
    }

    fn ordering(&self, other: &dyn System) -> SystemOrdering {
        if other.name() == "Movement" {
            SystemOrdering::After
        } else {
            SystemOrdering::Concurrent
        }
    }

    fn on_update(&self, _ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
        if entity.current(self.position)?.y < 0.0 {
            entity.modify(self.position)?.y = 0.0;
        }
        Ok(())
    }
}

fn populated_engine(count: usize, config: EngineConfig) -> Engine {
    let mut registry = ComponentRegistry::new();
    let position = registry.register::<Position>();
    let velocity = registry.register::<Velocity>();

    let mut engine = Engine::builder(registry)
        .with_config(config)
        .with_system(Movement { position, velocity })
        .with_system(Bounds { position })
        .build()
        .unwrap();

    for i in 0..count {
        let handle = engine.create_entity(format!("particle-{i}"));
        let mut entity = handle.write();
        entity.add_data(position).unwrap();
        entity.add_data(velocity).unwrap().y = -((i % 7) as f32);
    }
    engine.update(Vec::new()).unwrap();
    engine
}

/// Benchmark: one tick over N entities on the global rayon pool.
fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");

    for count in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let config = EngineConfig {
                tick_budget_ms: 0,
                ..EngineConfig::default()
            };
            let mut engine = populated_engine(count, config);
            b.iter(|| black_box(engine.update(Vec::new()).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark: one tick with a dedicated pool and contention detection.
fn bench_update_dedicated_pool(c: &mut Criterion) {
    let config = EngineConfig {
        worker_threads: Some(4),
        tick_budget_ms: 0,
        detect_write_contention: true,
        ..EngineConfig::default()
    };
    let mut engine = populated_engine(10_000, config);

    c.bench_function("update_10k_dedicated_pool", |b| {
        b.iter(|| black_box(engine.update(Vec::new()).unwrap()));
    });
}

/// Benchmark: snapshot and verification hash.
fn bench_verification_hash(c: &mut Criterion) {
    let engine = populated_engine(10_000, EngineConfig::default());

    c.bench_function("verification_hash_10k", |b| {
        b.iter(|| black_box(engine.verification_hash()));
    });
}

criterion_group!(
    benches,
    bench_update,
    bench_update_dedicated_pool,
    bench_verification_hash,
);

criterion_main!(benches);
