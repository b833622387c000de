#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use std::sync::Arc;

use loam_ecs::{
    AsyncSystemsManager, Component, ComponentFilter, ComponentRegistry, EntityStore, Read, System,
    SystemDependencies, Write,
};

// ---------------------------------------------------------------------------
// Helper component types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Kind {
    Position,
    Velocity,
    Health,
}

#[derive(Default, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Default, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Default, Clone, Copy)]
struct Health(f32);

impl Component<Kind> for Position {
    fn type_id() -> Kind {
        Kind::Position
    }
}
impl Component<Kind> for Velocity {
    fn type_id() -> Kind {
        Kind::Velocity
    }
}
impl Component<Kind> for Health {
    fn type_id() -> Kind {
        Kind::Health
    }
}

fn registry() -> Arc<ComponentRegistry<Kind>> {
    let mut registry = ComponentRegistry::new();
    registry.register::<Position>();
    registry.register::<Velocity>();
    registry.register::<Health>();
    Arc::new(registry)
}

// ---------------------------------------------------------------------------
// Entity spawning
// ---------------------------------------------------------------------------

fn bench_spawn_entities_10k(c: &mut Criterion) {
    c.bench_function("spawn_10k_entities", |b| {
        b.iter_batched(
            || EntityStore::new(registry()),
            |mut store| {
                for _ in 0..10_000 {
                    black_box(store.spawn());
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_spawn_and_despawn_recycling(c: &mut Criterion) {
    c.bench_function("spawn_despawn_recycle_1k", |b| {
        b.iter_batched(
            || {
                let mut store = EntityStore::new(registry());
                let entities: Vec<_> = (0..1_000).map(|_| store.spawn()).collect();
                for entity in &entities {
                    store.despawn(*entity);
                }
                store
            },
            |mut store| {
                // Re-spawning reuses recycled slots with bumped versions.
                for _ in 0..1_000 {
                    black_box(store.spawn());
                }
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Component insert / remove
// ---------------------------------------------------------------------------

fn bench_insert_component_1k(c: &mut Criterion) {
    c.bench_function("insert_component_1k", |b| {
        b.iter_batched(
            || {
                let mut store = EntityStore::new(registry());
                let entities: Vec<_> = (0..1_000).map(|_| store.spawn()).collect();
                (store, entities)
            },
            |(mut store, entities)| {
                for (i, entity) in entities.iter().enumerate() {
                    store.insert(
                        *entity,
                        Position {
                            x: i as f32,
                            y: 0.0,
                            z: 0.0,
                        },
                    );
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_despawn_with_components_1k(c: &mut Criterion) {
    c.bench_function("despawn_with_components_1k", |b| {
        b.iter_batched(
            || {
                let mut store = EntityStore::new(registry());
                let entities: Vec<_> = (0..1_000)
                    .map(|i| {
                        let entity = store.spawn();
                        store.insert(
                            entity,
                            Position {
                                x: i as f32,
                                y: 0.0,
                                z: 0.0,
                            },
                        );
                        store.insert(entity, Health(100.0));
                        entity
                    })
                    .collect();
                (store, entities)
            },
            |(mut store, entities)| {
                for entity in entities {
                    store.despawn(entity);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

fn populated_store(entities: usize, with_velocity_every: usize) -> EntityStore<Kind> {
    let mut store = EntityStore::new(registry());
    for i in 0..entities {
        let entity = store.spawn();
        store.insert(
            entity,
            Position {
                x: i as f32,
                y: 0.0,
                z: 0.0,
            },
        );
        if i % with_velocity_every == 0 {
            store.insert(
                entity,
                Velocity {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                },
            );
        }
    }
    store
}

fn bench_iterate_pair_10k(c: &mut Criterion) {
    let store = populated_store(10_000, 1);
    c.bench_function("iterate_pos_vel_10k_dense", |b| {
        b.iter(|| {
            let mut sum = 0.0f32;
            store.for_each::<(Write<Position>, Read<Velocity>)>(|(position, velocity)| {
                position.x += velocity.x;
                sum += position.x;
            });
            black_box(sum)
        });
    });
}

fn bench_iterate_pair_sparse(c: &mut Criterion) {
    // One matching entity in ten; the velocity storage drives.
    let store = populated_store(10_000, 10);
    c.bench_function("iterate_pos_vel_10k_sparse", |b| {
        b.iter(|| {
            let mut sum = 0.0f32;
            store.for_each::<(Write<Position>, Read<Velocity>)>(|(position, velocity)| {
                position.x += velocity.x;
                sum += position.x;
            });
            black_box(sum)
        });
    });
}

fn bench_deep_copy_10k(c: &mut Criterion) {
    let store = populated_store(10_000, 1);
    c.bench_function("deep_copy_10k", |b| {
        b.iter(|| black_box(store.clone()));
    });
}

// ---------------------------------------------------------------------------
// Scheduler tick
// ---------------------------------------------------------------------------

struct IntegrateSystem {
    filter: ComponentFilter<Kind, (Write<Position>, Read<Velocity>)>,
    store: Arc<EntityStore<Kind>>,
}

impl System for IntegrateSystem {
    fn update(&mut self) {
        self.filter.for_each(&self.store, |(position, velocity)| {
            position.x += velocity.x;
            position.y += velocity.y;
            position.z += velocity.z;
        });
    }
}

struct DecaySystem {
    filter: ComponentFilter<Kind, (Write<Health>,)>,
    store: Arc<EntityStore<Kind>>,
}

impl System for DecaySystem {
    fn update(&mut self) {
        self.filter.for_each(&self.store, |(health,)| {
            health.0 *= 0.999;
        });
    }
}

fn bench_scheduler_tick(c: &mut Criterion) {
    let mut store = populated_store(10_000, 1);
    let entities: Vec<_> = store.entities().to_vec();
    for entity in entities {
        store.insert(entity, Health(100.0));
    }
    let store = Arc::new(store);

    let mut manager = AsyncSystemsManager::<Kind>::new();
    let captured = Arc::clone(&store);
    manager.register_system(SystemDependencies::new(), |filter| IntegrateSystem {
        filter,
        store: captured,
    });
    let captured = Arc::clone(&store);
    manager.register_system(SystemDependencies::new(), |filter| DecaySystem {
        filter,
        store: captured,
    });
    manager.init(4).unwrap();

    c.bench_function("scheduler_tick_2_systems_10k", |b| {
        b.iter(|| manager.update());
    });
}

criterion_group!(
    benches,
    bench_spawn_entities_10k,
    bench_spawn_and_despawn_recycling,
    bench_insert_component_1k,
    bench_despawn_with_components_1k,
    bench_iterate_pair_10k,
    bench_iterate_pair_sparse,
    bench_deep_copy_10k,
    bench_scheduler_tick,
);
criterion_main!(benches);
