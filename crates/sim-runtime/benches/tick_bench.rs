use criterion::{criterion_group, criterion_main, Criterion};
use persistence::MemoryStorage;
use sim_core::{NullNotifier, Stage};
use sim_runtime::{GameWorld, SessionConfig};

fn bench_ticks(c: &mut Criterion) {
    let mut world = GameWorld::new_game(
        SessionConfig {
            rng_seed: 42,
            // Keep autosave out of the hot path.
            autosave_interval: f64::MAX,
        },
        Box::new(NullNotifier),
    );
    for stage in Stage::ALL {
        world.production.steps.get_mut(&stage).unwrap().automated = true;
    }
    let mut storage = MemoryStorage::new();

    c.bench_function("world_tick", |b| {
        b.iter(|| {
            world.tick(0.1, &mut storage);
        })
    });

    c.bench_function("world_hour", |b| {
        b.iter(|| {
            for _ in 0..36_000 {
                world.tick(0.1, &mut storage);
            }
        })
    });
}

criterion_group!(benches, bench_ticks);
criterion_main!(benches);
