//! # loam-ecs
//!
//! A keyed Entity-Component-System runtime with an asynchronous system
//! scheduler.
//!
//! Component types are identified by a user-chosen key type (an enum, an
//! integer, a string — anything hashable), so several independent component
//! families can coexist in one process without a global type registry.
//!
//! ## Core Types
//!
//! - [`Entity`] — slot id + version pair, the only stable handle to an
//!   object in a store
//! - [`ComponentRegistry`] — maps component keys to type descriptors;
//!   built once, shared by every store
//! - [`EntityStore`] — owns entities and their per-type dense storages,
//!   with O(1) swap-remove lifecycle and a scheduled-action queue for
//!   structural changes from inside iteration
//! - [`CombinedView`] — several stores iterated as one collection
//!
//! ## Queries
//!
//! - [`Read`] / [`Write`] — per-component access markers
//! - [`ComponentFilter`] — zero-sized handle over an access tuple, both
//!   the iteration surface and the scheduler's conflict-inference input
//! - [`AccessSet`] — the read/write key sets a system declares
//!
//! ## Scheduling
//!
//! - [`System`] — per-tick unit of work
//! - [`AsyncSystemsManager`] — registers systems, infers ordering from
//!   access conflicts plus explicit [`SystemDependencies`], and runs each
//!   tick across the worker pool
//! - [`DependencyGraph`] / [`DependencyTracer`] — the ordering constraints
//!   and their per-tick runtime state
//! - [`ThreadPool`] — grouped task + finalizer executor backed by a
//!   [`ConcurrentStack`]
//!
//! See `DESIGN.md` in this repository for architecture decisions.

mod combined_view;
mod concurrent_stack;
mod dependency_graph;
mod entity;
mod filter;
mod registry;
mod storage;
mod store;
mod systems_manager;
mod thread_pool;

pub use combined_view::CombinedView;
pub use concurrent_stack::ConcurrentStack;
pub use dependency_graph::{CycleError, DependencyGraph, DependencyTracer};
pub use entity::{
    Entity, EntityIdGenerator, IncrementalEntityGenerator, OptionalEntity,
    RecyclingEntityGenerator, SharedGenerator,
};
pub use filter::{AccessElement, AccessSet, AccessTuple, ComponentFilter, Read, Write};
pub use registry::{Component, ComponentNotRegistered, ComponentRegistry, TypeKey};
pub use storage::{DenseStorage, Ref, RefMut};
pub use store::EntityStore;
pub use systems_manager::{AsyncSystemsManager, System, SystemDependencies};
pub use thread_pool::{PoolHandle, TaskPayload, ThreadPool};
