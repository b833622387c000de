//! Cross-module scenarios: dense-index bookkeeping under churn, the
//! concurrent stack under contention, a full scheduler pipeline, and
//! cross-thread store construction.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use loam_ecs::{
    AsyncSystemsManager, Component, ComponentFilter, ComponentRegistry, ConcurrentStack, Entity,
    EntityStore, Read, System, SystemDependencies, ThreadPool, Write,
};

// ---- Index permutation and removal ----

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum IndexKind {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

macro_rules! index_component {
    ($name:ident, $variant:ident) => {
        #[derive(Default, Clone, Debug, PartialEq)]
        struct $name(i64);

        impl Component<IndexKind> for $name {
            fn type_id() -> IndexKind {
                IndexKind::$variant
            }
        }
    };
}

index_component!(CompA, A);
index_component!(CompB, B);
index_component!(CompC, C);
index_component!(CompD, D);
index_component!(CompE, E);
index_component!(CompF, F);
index_component!(CompG, G);
index_component!(CompH, H);

fn index_registry() -> Arc<ComponentRegistry<IndexKind>> {
    let mut registry = ComponentRegistry::new();
    registry.register::<CompA>();
    registry.register::<CompB>();
    registry.register::<CompC>();
    registry.register::<CompD>();
    registry.register::<CompE>();
    registry.register::<CompF>();
    registry.register::<CompG>();
    registry.register::<CompH>();
    Arc::new(registry)
}

fn collect_index<T: Component<IndexKind> + Clone>(
    store: &EntityStore<IndexKind>,
) -> HashSet<(Entity, i64)>
where
    for<'a> &'a T: Into<i64>,
{
    let mut out = HashSet::new();
    store.for_each_with_entity::<(Read<T>,)>(|entity, (value,)| {
        out.insert((entity, value.into()));
    });
    out
}

macro_rules! index_value {
    ($name:ident) => {
        impl<'a> From<&'a $name> for i64 {
            fn from(component: &'a $name) -> i64 {
                component.0
            }
        }
    };
}

index_value!(CompA);
index_value!(CompB);
index_value!(CompC);
index_value!(CompD);
index_value!(CompE);
index_value!(CompF);
index_value!(CompG);
index_value!(CompH);

#[test]
fn indexes_survive_removal_and_extension() {
    let mut store = EntityStore::new(index_registry());

    let e1 = store.spawn();
    store.insert(e1, CompA(1));
    store.insert(e1, CompC(3));
    store.insert(e1, CompE(5));
    store.insert(e1, CompG(7));

    let e2 = store.spawn();
    store.insert(e2, CompB(20));
    store.insert(e2, CompC(30));
    store.insert(e2, CompF(60));
    store.insert(e2, CompG(70));

    let e3 = store.spawn();
    store.insert(e3, CompD(400));
    store.insert(e3, CompE(500));
    store.insert(e3, CompF(600));
    store.insert(e3, CompG(700));

    store.despawn(e1);

    assert!(collect_index::<CompA>(&store).is_empty());
    assert_eq!(
        collect_index::<CompB>(&store),
        HashSet::from([(e2, 20)])
    );
    assert_eq!(
        collect_index::<CompC>(&store),
        HashSet::from([(e2, 30)])
    );
    assert_eq!(
        collect_index::<CompE>(&store),
        HashSet::from([(e3, 500)])
    );
    assert_eq!(
        collect_index::<CompF>(&store),
        HashSet::from([(e2, 60), (e3, 600)])
    );
    assert_eq!(
        collect_index::<CompG>(&store),
        HashSet::from([(e2, 70), (e3, 700)])
    );

    let e4 = store.spawn();
    store.insert(e4, CompA(10000));
    store.insert(e4, CompB(20000));
    store.insert(e4, CompC(30000));
    store.insert(e4, CompD(40000));
    store.insert(e4, CompE(50000));
    store.insert(e4, CompF(60000));
    store.insert(e4, CompG(70000));
    store.insert(e4, CompH(80000));

    assert_eq!(
        collect_index::<CompA>(&store),
        HashSet::from([(e4, 10000)])
    );
    assert_eq!(
        collect_index::<CompB>(&store),
        HashSet::from([(e2, 20), (e4, 20000)])
    );
    assert_eq!(
        collect_index::<CompD>(&store),
        HashSet::from([(e3, 400), (e4, 40000)])
    );
    assert_eq!(
        collect_index::<CompF>(&store),
        HashSet::from([(e2, 60), (e3, 600), (e4, 60000)])
    );
    assert_eq!(
        collect_index::<CompG>(&store),
        HashSet::from([(e2, 70), (e3, 700), (e4, 70000)])
    );
    assert_eq!(
        collect_index::<CompH>(&store),
        HashSet::from([(e4, 80000)])
    );
}

// ---- Concurrent stack under producer/consumer contention ----

#[test]
fn stack_producer_consumer_round_trip() {
    const ITEMS: i64 = 20_000;
    let stack = Arc::new(ConcurrentStack::new());

    let consumer = {
        let stack = Arc::clone(&stack);
        std::thread::spawn(move || {
            let mut results = Vec::with_capacity(ITEMS as usize);
            while (results.len() as i64) < ITEMS {
                match stack.try_pop_front() {
                    Some(value) => results.push(value),
                    None => std::thread::yield_now(),
                }
            }
            results
        })
    };

    let producer = {
        let stack = Arc::clone(&stack);
        std::thread::spawn(move || {
            for i in 0..ITEMS {
                stack.push_front(i * 10);
            }
        })
    };

    producer.join().unwrap();
    let mut results = consumer.join().unwrap();
    assert_eq!(results.len() as i64, ITEMS);

    // Interleaving order is unspecified; the multiset must be exact.
    results.sort_unstable();
    for (i, value) in results.iter().enumerate() {
        assert_eq!(*value, (i as i64) * 10);
    }
}

// ---- Scheduler pipeline ----

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum PipeKind {
    SourceA,
    SourceB,
    SinkC,
    SinkD,
}

#[derive(Default, Clone)]
struct SourceA {
    data: i32,
}
#[derive(Default, Clone)]
struct SourceB {
    data: i32,
}
#[derive(Default, Clone)]
struct SinkC {
    data: f32,
}
#[derive(Default, Clone)]
struct SinkD {
    data: f32,
}

impl Component<PipeKind> for SourceA {
    fn type_id() -> PipeKind {
        PipeKind::SourceA
    }
}
impl Component<PipeKind> for SourceB {
    fn type_id() -> PipeKind {
        PipeKind::SourceB
    }
}
impl Component<PipeKind> for SinkC {
    fn type_id() -> PipeKind {
        PipeKind::SinkC
    }
}
impl Component<PipeKind> for SinkD {
    fn type_id() -> PipeKind {
        PipeKind::SinkD
    }
}

type PipeStore = Arc<EntityStore<PipeKind>>;

struct ProducerSystem {
    filter: ComponentFilter<PipeKind, (Write<SourceA>, Write<SourceB>)>,
    store: PipeStore,
}

impl System for ProducerSystem {
    fn update(&mut self) {
        self.filter.for_each(&self.store, |(a, b)| {
            a.data += 10;
            b.data += 20;
        });
    }
}

struct AtoCSystem {
    filter: ComponentFilter<PipeKind, (Read<SourceA>, Write<SinkC>)>,
    store: PipeStore,
}

impl System for AtoCSystem {
    fn update(&mut self) {
        self.filter.for_each(&self.store, |(a, c)| {
            c.data += a.data as f32;
        });
    }
}

struct BtoDSystem {
    filter: ComponentFilter<PipeKind, (Read<SourceB>, Write<SinkD>)>,
    store: PipeStore,
}

impl System for BtoDSystem {
    fn update(&mut self) {
        self.filter.for_each(&self.store, |(b, d)| {
            d.data += b.data as f32;
        });
    }
}

struct ConsumerSystem {
    filter: ComponentFilter<PipeKind, (Read<SinkC>, Read<SinkD>)>,
    store: PipeStore,
    observed: Arc<Mutex<f32>>,
}

impl System for ConsumerSystem {
    fn update(&mut self) {
        let mut sum = 0.0;
        self.filter.for_each(&self.store, |(c, d)| {
            sum += c.data + d.data;
        });
        *self.observed.lock().unwrap() = sum;
    }
}

#[test]
fn pipeline_systems_observe_complete_tick() {
    let mut registry = ComponentRegistry::new();
    registry.register::<SourceA>();
    registry.register::<SourceB>();
    registry.register::<SinkC>();
    registry.register::<SinkD>();

    let mut store = EntityStore::new(Arc::new(registry));
    for (a, b) in [(10, 20), (1, 2)] {
        let entity = store.spawn();
        store.insert(entity, SourceA { data: a });
        store.insert(entity, SourceB { data: b });
        store.insert(entity, SinkC::default());
        store.insert(entity, SinkD::default());
    }
    let store: PipeStore = Arc::new(store);
    let observed = Arc::new(Mutex::new(0.0f32));

    let mut manager = AsyncSystemsManager::<PipeKind>::new();
    let captured = Arc::clone(&store);
    manager.register_system(SystemDependencies::new(), |filter| ProducerSystem {
        filter,
        store: captured,
    });
    let captured = Arc::clone(&store);
    manager.register_system(
        SystemDependencies::new().goes_after::<ProducerSystem>(),
        |filter| AtoCSystem {
            filter,
            store: captured,
        },
    );
    let captured = Arc::clone(&store);
    manager.register_system(
        SystemDependencies::new().goes_after::<ProducerSystem>(),
        |filter| BtoDSystem {
            filter,
            store: captured,
        },
    );
    let captured = Arc::clone(&store);
    let result = Arc::clone(&observed);
    manager.register_system(
        SystemDependencies::new()
            .goes_after::<AtoCSystem>()
            .goes_after::<BtoDSystem>(),
        |filter| ConsumerSystem {
            filter,
            store: captured,
            observed: result,
        },
    );

    manager.init(2).unwrap();
    manager.update();

    // (10+10 → C) + (20+20 → D) + (1+10 → C) + (2+20 → D) = 93
    assert_eq!(*observed.lock().unwrap(), 93.0);
}

// ---- Thread pool groups, end to end ----

#[test]
fn finalizers_extend_their_own_group() {
    let pool = ThreadPool::new(3);
    let tasks = Arc::new(AtomicI32::new(0));
    let finalizers = Arc::new(AtomicI32::new(0));
    let handle = pool.handle();

    for _ in 0..5 {
        let tasks_outer = Arc::clone(&tasks);
        let finalizers = Arc::clone(&finalizers);
        let handle = handle.clone();
        pool.submit(
            0,
            {
                let tasks = Arc::clone(&tasks_outer);
                move || {
                    tasks.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |()| {
                finalizers.fetch_add(1, Ordering::Relaxed);
                for _ in 0..2 {
                    let tasks = Arc::clone(&tasks_outer);
                    handle.submit_detached(0, move || {
                        tasks.fetch_add(1, Ordering::Relaxed);
                    });
                }
            },
        );
    }
    pool.finalize_tasks(0);

    assert_eq!(tasks.load(Ordering::Relaxed), 15);
    assert_eq!(finalizers.load(Ordering::Relaxed), 5);
}

// ---- Scheduled structural swap through iteration ----

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum SwapKind {
    Transform,
    Movement,
}

#[derive(Default, Clone, Debug, PartialEq)]
struct Transform {
    pos: (i32, i32),
}
#[derive(Default, Clone, Debug, PartialEq)]
struct Movement {
    velocity: (i32, i32),
}

impl Component<SwapKind> for Transform {
    fn type_id() -> SwapKind {
        SwapKind::Transform
    }
}
impl Component<SwapKind> for Movement {
    fn type_id() -> SwapKind {
        SwapKind::Movement
    }
}

#[test]
fn component_swap_scheduled_from_iteration() {
    let mut registry = ComponentRegistry::new();
    registry.register::<Transform>();
    registry.register::<Movement>();
    let mut store = EntityStore::new(Arc::new(registry));

    let entity = store.spawn();
    store.insert(entity, Transform::default());

    store.for_each_with_entity::<(Read<Transform>,)>(|owner, (_,)| {
        store.schedule_remove::<Transform>(owner);
        store.schedule_insert(
            owner,
            Movement {
                velocity: (2, 3),
            },
        );
    });
    store.execute_scheduled_actions();

    assert!(!store.contains_component::<Transform>(entity));
    assert_eq!(
        store.get::<Movement>(entity),
        Some(&Movement {
            velocity: (2, 3)
        })
    );
}

// ---- Independent stores built on independent threads ----

#[test]
fn two_stores_construct_in_parallel() {
    let registry = index_registry();

    for _ in 0..1_000 {
        let first = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let mut store = EntityStore::new(registry);
                store.init_storage::<CompA>();
                store.init_storage::<CompB>();
                let entity = store.spawn();
                store.insert(entity, CompA(1));
                store
            })
        };
        let second = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let mut store = EntityStore::new(registry);
                store.init_storage::<CompA>();
                store.init_storage::<CompC>();
                let entity = store.spawn();
                store.insert(entity, CompC(3));
                store
            })
        };

        let first = first.join().unwrap();
        let second = second.join().unwrap();
        assert_eq!(first.matching_count::<CompA>(), 1);
        assert_eq!(second.matching_count::<CompC>(), 1);
    }
}

// ---- A store stays usable after moving to another thread ----

#[test]
fn store_remains_usable_after_thread_handoff() {
    let mut store = EntityStore::new(index_registry());
    let entity = store.spawn();
    store.insert(entity, CompA(11));

    let handle = std::thread::spawn(move || {
        assert_eq!(store.get::<CompA>(entity), Some(&CompA(11)));
        let second = store.spawn();
        store.insert(second, CompB(22));
        store.despawn(entity);
        store
    });

    let store = handle.join().unwrap();
    assert!(!store.contains(entity));
    assert_eq!(store.matching_count::<CompB>(), 1);
}

// ---- Key-type genericity ----

#[test]
fn stores_keyed_by_strings_and_integers() {
    #[derive(Default, Clone)]
    struct Named;
    impl Component<String> for Named {
        fn type_id() -> String {
            String::from("named")
        }
    }

    let mut registry = ComponentRegistry::<String>::new();
    registry.register::<Named>();
    let mut store = EntityStore::new(Arc::new(registry));
    let entity = store.spawn();
    store.insert(entity, Named);
    assert!(store.contains_component::<Named>(entity));

    #[derive(Default, Clone)]
    struct Static;
    impl Component<&'static str> for Static {
        fn type_id() -> &'static str {
            "static"
        }
    }

    let mut registry = ComponentRegistry::<&'static str>::new();
    registry.register::<Static>();
    let mut store = EntityStore::new(Arc::new(registry));
    let entity = store.spawn();
    store.insert(entity, Static);
    assert!(store.contains_component_key(entity, &"static"));

    #[derive(Default, Clone)]
    struct Numbered;
    impl Component<i32> for Numbered {
        fn type_id() -> i32 {
            1
        }
    }

    let mut registry = ComponentRegistry::<i32>::new();
    registry.register::<Numbered>();
    let mut store = EntityStore::new(Arc::new(registry));
    let entity = store.spawn();
    store.insert(entity, Numbered);
    assert_eq!(store.matching_count::<Numbered>(), 1);
}
