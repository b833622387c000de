use std::any::TypeId;
use std::sync::{Arc, Mutex};

use crate::dependency_graph::{CycleError, DependencyGraph, DependencyTracer};
use crate::filter::{AccessSet, AccessTuple, ComponentFilter};
use crate::registry::TypeKey;
use crate::thread_pool::{PoolHandle, ThreadPool};

/// Task group used for system execution.
const SYSTEMS_GROUP: u64 = 0;

/// A unit of per-tick work with a declared component-access set.
///
/// Systems are registered once with
/// [`AsyncSystemsManager::register_system`] and run once per
/// [`update`](AsyncSystemsManager::update) tick, on whichever worker thread
/// the scheduler picks. Component access goes through the
/// [`ComponentFilter`] the manager handed to the system's constructor;
/// anything else the system needs (stores, channels, counters) it captures
/// itself.
pub trait System: Send + 'static {
    /// Runs one tick of this system.
    fn update(&mut self);
}

/// Ordering constraints declared at registration time.
///
/// `goes_after::<Other>()` guarantees `Other` finishes before this system
/// starts, regardless of component access. Constraints compose:
///
/// ```ignore
/// SystemDependencies::new()
///     .goes_after::<TransformSystem>()
///     .goes_after::<PhysicsSystem>()
/// ```
#[derive(Default)]
pub struct SystemDependencies {
    after: Vec<TypeId>,
}

impl SystemDependencies {
    /// No explicit constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `S` to finish before this system starts.
    pub fn goes_after<S: System>(mut self) -> Self {
        self.after.push(TypeId::of::<S>());
        self
    }
}

struct RegisteredSystem<K: TypeKey> {
    system: Arc<Mutex<dyn System>>,
    type_id: TypeId,
    type_name: &'static str,
    access: AccessSet<K>,
    after: Vec<TypeId>,
}

/// Shared per-tick state between the dispatch loop and task finalizers.
struct TickContext {
    tracer: Mutex<DependencyTracer>,
    systems: Vec<Arc<Mutex<dyn System>>>,
    pool: PoolHandle,
}

/// Registers systems, infers their ordering, and runs each tick across a
/// worker pool.
///
/// Ordering edges come from two sources:
/// 1. explicit [`SystemDependencies::goes_after`] declarations;
/// 2. inferred conflicts: two systems whose access sets share a component
///    key with at least one write, where the earlier-registered system
///    runs first.
///
/// Systems joined by no path may run concurrently; within one tick the
/// execution order is a linear extension of the dependency graph, so any
/// two systems running at the same wall-clock moment have disjoint write
/// sets and no read/write intersection.
pub struct AsyncSystemsManager<K: TypeKey> {
    systems: Vec<RegisteredSystem<K>>,
    graph: Option<Arc<DependencyGraph>>,
    pool: Option<ThreadPool>,
}

impl<K: TypeKey> AsyncSystemsManager<K> {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            graph: None,
            pool: None,
        }
    }

    /// Registers a system.
    ///
    /// The manager constructs the [`ComponentFilter`] for the access tuple
    /// `Q`, records `Q`'s reads and writes for conflict inference, and
    /// passes the filter to `build`; declaring one access and iterating
    /// another is therefore impossible.
    ///
    /// # Panics
    ///
    /// Panics if called after [`init`](Self::init), or if a system of the
    /// same type is already registered.
    pub fn register_system<S, Q>(
        &mut self,
        dependencies: SystemDependencies,
        build: impl FnOnce(ComponentFilter<K, Q>) -> S,
    ) where
        S: System,
        Q: AccessTuple<K>,
    {
        assert!(
            self.graph.is_none(),
            "cannot register systems after init()"
        );
        let type_id = TypeId::of::<S>();
        if self.systems.iter().any(|s| s.type_id == type_id) {
            panic!(
                "duplicate system type: {} is already registered",
                std::any::type_name::<S>()
            );
        }

        let system = build(ComponentFilter::new());
        self.systems.push(RegisteredSystem {
            system: Arc::new(Mutex::new(system)),
            type_id,
            type_name: std::any::type_name::<S>(),
            access: ComponentFilter::<K, Q>::access(),
            after: dependencies.after,
        });
    }

    /// Returns the number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Builds the dependency graph and spawns `worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] when the explicit constraints (possibly
    /// combined with inferred conflict edges) are cyclic.
    ///
    /// # Panics
    ///
    /// Panics if a `goes_after` target was never registered.
    pub fn init(&mut self, worker_count: usize) -> Result<(), CycleError> {
        assert!(self.graph.is_none(), "init() called twice");

        let count = self.systems.len();
        let mut graph = DependencyGraph::new();
        graph.init_nodes(count);

        // Explicit ordering first.
        for (index, system) in self.systems.iter().enumerate() {
            for dependency in &system.after {
                let before = self
                    .systems
                    .iter()
                    .position(|other| other.type_id == *dependency)
                    .unwrap_or_else(|| {
                        panic!(
                            "system '{}' goes after a system type that is not registered",
                            system.type_name
                        )
                    });
                graph.add_dependency(before, index);
            }
        }

        // Then inferred conflicts, earlier registration first. Pairs the
        // user already ordered explicitly are left alone.
        for first in 0..count {
            for second in (first + 1)..count {
                if graph.has_dependency(first, second) || graph.has_dependency(second, first) {
                    continue;
                }
                if self.systems[first]
                    .access
                    .conflicts_with(&self.systems[second].access)
                {
                    graph.add_dependency(first, second);
                }
            }
        }

        graph.finalize()?;
        log::debug!(
            "system dependency graph built: {count} systems, {} workers",
            worker_count
        );
        self.graph = Some(Arc::new(graph));
        self.pool = Some(ThreadPool::new(worker_count));
        Ok(())
    }

    /// Runs one tick: every system exactly once, in a linear extension of
    /// the dependency graph, with independent systems in parallel.
    ///
    /// Blocks until every system of the tick has finished.
    ///
    /// # Panics
    ///
    /// Panics if [`init`](Self::init) has not succeeded.
    pub fn update(&mut self) {
        let graph = Arc::clone(
            self.graph
                .as_ref()
                .expect("init() must succeed before update()"),
        );
        let pool = self.pool.as_ref().expect("init() spawns the worker pool");

        let context = Arc::new(TickContext {
            tracer: Mutex::new(DependencyTracer::new(graph)),
            systems: self.systems.iter().map(|s| Arc::clone(&s.system)).collect(),
            pool: pool.handle(),
        });

        dispatch_ready(&context);
        pool.finalize_tasks(SYSTEMS_GROUP);

        debug_assert!(
            context.tracer.lock().unwrap().is_complete(),
            "tick ended with unfinished systems"
        );
    }
}

impl<K: TypeKey> Default for AsyncSystemsManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits every ready system to the pool.
///
/// Runs on the tick's calling thread: first directly from `update()`, then
/// from each task's finalizer after it marks its system finished, which is
/// how completed systems release their successors.
fn dispatch_ready(context: &Arc<TickContext>) {
    let to_run = {
        let mut tracer = context.tracer.lock().unwrap();
        let ready = tracer.ready_systems();
        for &node in &ready {
            tracer.mark_running(node);
        }
        ready
    };
    if !to_run.is_empty() {
        log::trace!("dispatching systems {to_run:?}");
    }

    for node in to_run {
        let system = Arc::clone(&context.systems[node]);
        let finalizer_context = Arc::clone(context);
        context.pool.submit(
            SYSTEMS_GROUP,
            move || {
                system.lock().unwrap().update();
                node
            },
            move |finished: usize| {
                finalizer_context
                    .tracer
                    .lock()
                    .unwrap()
                    .mark_finished(finished);
                dispatch_ready(&finalizer_context);
            },
        );
    }
}
