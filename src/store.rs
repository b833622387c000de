use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::entity::{Entity, RecyclingEntityGenerator, SharedGenerator};
use crate::filter::{AccessTuple, ComponentFilter};
use crate::registry::{Component, ComponentRegistry, TypeKey};
use crate::storage::{DenseStorage, Ref, RefMut, StorageCell};

type ScheduledAction<K> = Box<dyn FnOnce(&mut EntityStore<K>) + Send>;

/// A self-contained collection of entities and their components.
///
/// Each store owns one type-erased storage per component type in use,
/// a packed list of live entities, and a queue of scheduled structural
/// actions. Multiple stores can share one [`ComponentRegistry`] and one id
/// generator, which keeps entity ids unique across stores that exchange
/// entities.
///
/// Structural changes (spawn, despawn, insert, remove) take `&mut self`.
/// Component *data* access goes through per-storage read/write locks and
/// takes `&self` ([`read`](Self::read), [`write`](Self::write),
/// [`for_each`](Self::for_each)), which is what allows systems running on
/// worker threads to share a store while the scheduler keeps their write
/// sets disjoint.
///
/// References returned from [`insert`](Self::insert) and the query methods
/// are invalidated by any subsequent structural change to the same storage:
/// removal relocates the last element into the freed slot.
///
/// # Example
///
/// ```
/// use loam_ecs::{Component, ComponentRegistry, EntityStore};
/// use std::sync::Arc;
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// enum Kind { Health }
///
/// #[derive(Default, Clone, PartialEq, Debug)]
/// struct Health(u32);
/// impl Component<Kind> for Health {
///     fn type_id() -> Kind { Kind::Health }
/// }
///
/// let mut registry = ComponentRegistry::new();
/// registry.register::<Health>();
///
/// let mut store = EntityStore::new(Arc::new(registry));
/// let entity = store.spawn();
/// store.insert(entity, Health(100));
/// assert_eq!(store.get::<Health>(entity), Some(&Health(100)));
///
/// store.despawn(entity);
/// assert!(!store.contains(entity));
/// ```
pub struct EntityStore<K: TypeKey> {
    registry: Arc<ComponentRegistry<K>>,
    generator: SharedGenerator,
    /// Packed list of live entities; order changes on despawn.
    live: Vec<Entity>,
    /// Entity slot id → row in `live`.
    rows: HashMap<u32, usize>,
    storages: HashMap<K, StorageCell<K>>,
    /// Structural actions queued from inside iteration, applied FIFO by
    /// [`execute_scheduled_actions`](Self::execute_scheduled_actions).
    scheduled: Mutex<Vec<ScheduledAction<K>>>,
}

impl<K: TypeKey> EntityStore<K> {
    /// Creates a store with its own recycling id generator.
    pub fn new(registry: Arc<ComponentRegistry<K>>) -> Self {
        Self::with_generator(registry, RecyclingEntityGenerator::shared())
    }

    /// Creates a store sharing an id generator with other stores.
    pub fn with_generator(registry: Arc<ComponentRegistry<K>>, generator: SharedGenerator) -> Self {
        Self {
            registry,
            generator,
            live: Vec::new(),
            rows: HashMap::new(),
            storages: HashMap::new(),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    /// Returns the shared component registry.
    pub fn registry(&self) -> &Arc<ComponentRegistry<K>> {
        &self.registry
    }

    // ---- Entity lifecycle ----

    /// Creates a live entity with a fresh id.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.generator.lock().unwrap().generate();
        self.attach_row(entity);
        entity
    }

    /// Generates an entity id without making it live.
    ///
    /// Pair with [`spawn_reserved`](Self::spawn_reserved) for two-step
    /// creation: redoable editor commands reserve the id once and re-spawn
    /// the same entity on every redo.
    pub fn reserve(&self) -> Entity {
        self.generator.lock().unwrap().generate()
    }

    /// Makes a previously generated entity id live.
    ///
    /// # Panics
    ///
    /// Panics if an entity with the same slot id is already live.
    pub fn spawn_reserved(&mut self, entity: Entity) {
        assert!(
            !self.rows.contains_key(&entity.raw_id()),
            "entity slot {} is already live",
            entity.raw_id()
        );
        self.generator.lock().unwrap().register_existing(entity);
        self.attach_row(entity);
    }

    /// Despawns an entity, dropping each of its components exactly once.
    ///
    /// Returns `false` (and does nothing) if the entity is not live.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.contains(entity) {
            return false;
        }
        for cell in self.storages.values_mut() {
            cell.remove_erased(entity.raw_id());
        }
        self.detach_row(entity);
        self.generator.lock().unwrap().release(entity);
        true
    }

    /// Returns whether the entity is live in this store.
    pub fn contains(&self, entity: Entity) -> bool {
        self.rows
            .get(&entity.raw_id())
            .is_some_and(|&row| self.live[row] == entity)
    }

    /// Returns whether the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.live.len()
    }

    /// Returns the live entities. Order is unspecified and changes on
    /// despawn.
    pub fn entities(&self) -> &[Entity] {
        &self.live
    }

    // ---- Components: structural changes ----

    /// Attaches a component to a live entity.
    ///
    /// The returned reference is valid until the next structural change to
    /// this component's storage.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not live or the component type was never
    /// registered. Attaching a type the entity already has is a debug
    /// assertion.
    pub fn insert<T: Component<K>>(&mut self, entity: Entity, value: T) -> &mut T {
        assert!(
            self.contains(entity),
            "cannot insert component on dead entity {entity}"
        );
        let cell = self.ensure_storage(&T::type_id());
        cell.typed_mut::<T>().insert(entity, value)
    }

    /// Detaches and returns a component. `None` (no-op) if absent.
    pub fn remove<T: Component<K>>(&mut self, entity: Entity) -> Option<T> {
        if !self.contains(entity) {
            return None;
        }
        self.storages
            .get_mut(&T::type_id())?
            .typed_mut::<T>()
            .take(entity.raw_id())
    }

    /// Ensures the storage for `T` exists, even when empty.
    ///
    /// Idempotent. Without this, a storage appears only when the first
    /// component of its type is inserted. Two stores may run their setup,
    /// including this call, on different threads concurrently.
    ///
    /// # Panics
    ///
    /// Panics if `T` was never registered.
    pub fn init_storage<T: Component<K>>(&mut self) {
        self.ensure_storage(&T::type_id());
    }

    // ---- Components: lookups ----

    /// Returns the entity's component of type `T`.
    pub fn get<T: Component<K>>(&self, entity: Entity) -> Option<&T> {
        if !self.contains(entity) {
            return None;
        }
        self.storages
            .get(&T::type_id())?
            .typed::<T>()
            .get(entity.raw_id())
    }

    /// Returns the entity's component of type `T`, mutably.
    pub fn get_mut<T: Component<K>>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.contains(entity) {
            return None;
        }
        self.storages
            .get_mut(&T::type_id())?
            .typed_mut::<T>()
            .get_mut(entity.raw_id())
    }

    /// Returns whether the entity owns a component of type `T`.
    pub fn contains_component<T: Component<K>>(&self, entity: Entity) -> bool {
        self.contains_component_key(entity, &T::type_id())
    }

    /// Returns whether the entity owns a component with the given key.
    pub fn contains_component_key(&self, entity: Entity, key: &K) -> bool {
        self.contains(entity)
            && self
                .storages
                .get(key)
                .is_some_and(|cell| cell.contains_erased(entity.raw_id()))
    }

    /// Returns the number of entities owning a component of type `T`.
    /// `O(1)`: the size of the type's storage.
    pub fn matching_count<T: Component<K>>(&self) -> usize {
        self.storages.get(&T::type_id()).map_or(0, |cell| cell.len())
    }

    /// Appends every live entity owning components for **all** `keys`.
    ///
    /// The smallest involved storage drives, as in
    /// [`for_each`](Self::for_each). An empty key list matches every live
    /// entity.
    pub fn entities_with_all(&self, keys: &[K], out: &mut Vec<Entity>) {
        if keys.is_empty() {
            out.extend_from_slice(&self.live);
            return;
        }
        let mut cells = Vec::with_capacity(keys.len());
        for key in keys {
            match self.storages.get(key) {
                Some(cell) => cells.push(cell),
                // A type nobody ever stored matches nothing.
                None => return,
            }
        }
        let driver = cells.iter().min_by_key(|cell| cell.len()).unwrap();
        out.extend(driver.owners().iter().copied().filter(|entity| {
            cells
                .iter()
                .all(|cell| cell.contains_erased(entity.raw_id()))
        }));
    }

    /// Appends `(key, component)` for every component the entity owns.
    ///
    /// The component references are type-erased; downcast to inspect.
    pub fn all_components_of<'a>(
        &'a mut self,
        entity: Entity,
        out: &mut Vec<(K, &'a mut dyn Any)>,
    ) {
        if !self.contains(entity) {
            return;
        }
        for (key, cell) in self.storages.iter_mut() {
            if let Some(component) = cell.get_any_mut(entity.raw_id()) {
                out.push((key.clone(), component));
            }
        }
    }

    // ---- Components: lock-guarded storage access ----

    /// Shared access to the whole storage of `T`; `None` when no storage
    /// exists yet.
    ///
    /// # Panics
    ///
    /// Panics if the storage is currently write-locked.
    pub fn read<T: Component<K>>(&self) -> Option<Ref<'_, T>> {
        self.storages.get(&T::type_id()).map(|cell| Ref::new(cell))
    }

    /// Exclusive access to the whole storage of `T`; `None` when no
    /// storage exists yet.
    ///
    /// # Panics
    ///
    /// Panics if the storage is locked in any mode.
    pub fn write<T: Component<K>>(&self) -> Option<RefMut<'_, T>> {
        self.storages
            .get(&T::type_id())
            .map(|cell| RefMut::new(cell))
    }

    // ---- Components: tuple queries ----

    /// Iterates every entity owning all components of the access tuple `Q`.
    ///
    /// The smallest involved storage drives the iteration. Holds each
    /// involved storage's lock for the duration, so structural changes must
    /// go through [`schedule_insert`](Self::schedule_insert) /
    /// [`schedule_remove`](Self::schedule_remove) from inside the callback.
    pub fn for_each<Q: AccessTuple<K>>(&self, f: impl FnMut(Q::Items<'_>)) {
        ComponentFilter::<K, Q>::new().for_each(self, f);
    }

    /// Like [`for_each`](Self::for_each), with the owning entity first.
    pub fn for_each_with_entity<Q: AccessTuple<K>>(&self, f: impl FnMut(Entity, Q::Items<'_>)) {
        ComponentFilter::<K, Q>::new().for_each_with_entity(self, f);
    }

    /// Resolves a full tuple of components for one entity; `None` unless
    /// the entity is live and owns them all.
    pub fn get_components<Q: AccessTuple<K>>(&mut self, entity: Entity) -> Option<Q::Items<'_>> {
        ComponentFilter::<K, Q>::new().get(self, entity)
    }

    /// Appends the component tuple of every matching entity into `out`.
    pub fn collect<'a, Q: AccessTuple<K>>(&'a mut self, out: &mut Vec<Q::Items<'a>>) {
        ComponentFilter::<K, Q>::new().collect(self, out);
    }

    /// Appends `(entity, tuple)` of every matching entity into `out`.
    pub fn collect_with_entities<'a, Q: AccessTuple<K>>(
        &'a mut self,
        out: &mut Vec<(Entity, Q::Items<'a>)>,
    ) {
        ComponentFilter::<K, Q>::new().collect_with_entities(self, out);
    }

    // ---- Scheduled structural changes ----

    /// Queues a component attachment to apply at the next
    /// [`execute_scheduled_actions`](Self::execute_scheduled_actions).
    ///
    /// Callable while iterating (`&self`); the queue owns the staged value
    /// until the drain. If the entity is dead by then, the action is
    /// dropped.
    pub fn schedule_insert<T: Component<K>>(&self, entity: Entity, value: T) {
        self.scheduled
            .lock()
            .unwrap()
            .push(Box::new(move |store: &mut EntityStore<K>| {
                if store.contains(entity) {
                    store.insert(entity, value);
                }
            }));
    }

    /// Queues a component removal; applied FIFO alongside scheduled
    /// insertions.
    pub fn schedule_remove<T: Component<K>>(&self, entity: Entity) {
        self.scheduled
            .lock()
            .unwrap()
            .push(Box::new(move |store: &mut EntityStore<K>| {
                store.remove::<T>(entity);
            }));
    }

    /// Applies all queued actions in submission order.
    ///
    /// Actions queued by the actions themselves run in the same drain.
    pub fn execute_scheduled_actions(&mut self) {
        loop {
            let actions = std::mem::take(&mut *self.scheduled.lock().unwrap());
            if actions.is_empty() {
                break;
            }
            for action in actions {
                action(self);
            }
        }
    }

    // ---- Whole-store operations ----

    /// Moves the entire contents out, leaving this store empty but usable.
    ///
    /// The returned store takes over the buffers; no component is cloned,
    /// copied, or individually moved. The registry and id generator stay
    /// shared between the two.
    pub fn take(&mut self) -> Self {
        let replacement =
            Self::with_generator(Arc::clone(&self.registry), Arc::clone(&self.generator));
        std::mem::replace(self, replacement)
    }

    /// Moves an entity and all its components into `other`.
    ///
    /// Component values are moved, never cloned. The entity keeps its id
    /// unless `other` already has a live entity in the same slot, in which
    /// case it is renumbered from `other`'s generator. Returns the entity
    /// as it exists in `other`. Indexes of both stores are consistent
    /// afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not live in this store, or if the stores
    /// disagree on the component type behind a key.
    pub fn transfer_to(&mut self, other: &mut EntityStore<K>, entity: Entity) -> Entity {
        assert!(
            self.contains(entity),
            "cannot transfer dead entity {entity}"
        );

        let destination = if other.rows.contains_key(&entity.raw_id()) {
            other.generator.lock().unwrap().generate()
        } else {
            other
                .generator
                .lock()
                .unwrap()
                .register_existing(entity);
            entity
        };
        other.attach_row(destination);

        for (key, source_cell) in self.storages.iter_mut() {
            if !source_cell.contains_erased(entity.raw_id()) {
                continue;
            }
            let destination_cell = match other.storages.entry(key.clone()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => vacant.insert(source_cell.fresh_cell()),
            };
            source_cell.move_entry_to(destination_cell, entity.raw_id(), destination);
        }

        // The id now lives in `other`; do not return it to the generator.
        self.detach_row(entity);
        destination
    }

    // ---- Internals ----

    fn attach_row(&mut self, entity: Entity) {
        debug_assert!(!self.rows.contains_key(&entity.raw_id()));
        self.rows.insert(entity.raw_id(), self.live.len());
        self.live.push(entity);
    }

    /// Swap-removes the entity's row; the last live entity takes its place.
    fn detach_row(&mut self, entity: Entity) {
        let row = self.rows.remove(&entity.raw_id()).unwrap();
        let last = self.live.len() - 1;
        if row != last {
            self.live.swap(row, last);
            self.rows.insert(self.live[row].raw_id(), row);
        }
        self.live.pop();
    }

    fn ensure_storage(&mut self, key: &K) -> &mut StorageCell<K> {
        if !self.storages.contains_key(key) {
            let cell = self
                .registry
                .create_storage(key)
                .unwrap_or_else(|err| panic!("{err}"));
            self.storages.insert(key.clone(), cell);
        }
        self.storages.get_mut(key).unwrap()
    }

    pub(crate) fn cell(&self, key: &K) -> Option<&StorageCell<K>> {
        self.storages.get(key)
    }

    pub(crate) fn storage_mut_ptr<T: Component<K>>(&mut self) -> Option<*mut DenseStorage<T>> {
        self.storages
            .get_mut(&T::type_id())
            .map(|cell| cell.typed_mut::<T>() as *mut DenseStorage<T>)
    }
}

impl<K: TypeKey> Clone for EntityStore<K> {
    /// Deep copy preserving each entity's exact `(raw_id, version)`.
    ///
    /// Every component is cloned exactly once; the source is untouched.
    /// The copy shares the source's registry and id generator, so a copy
    /// used for snapshot/rollback stays id-consistent with the original as
    /// long as only one of them keeps mutating. Pending scheduled actions
    /// are not cloned.
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            generator: Arc::clone(&self.generator),
            live: self.live.clone(),
            rows: self.rows.clone(),
            storages: self
                .storages
                .iter()
                .map(|(key, cell)| (key.clone(), cell.clone_cell()))
                .collect(),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    /// Destructive deep copy: the previous contents of `self` are dropped
    /// (each old component destroyed exactly once) and replaced by a copy
    /// of `source`, ids preserved.
    fn clone_from(&mut self, source: &Self) {
        *self = source.clone();
    }
}
