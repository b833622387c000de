use std::sync::{Arc, Mutex};

/// A lightweight entity identifier.
///
/// Entities are represented as a 32-bit slot id + 32-bit version,
/// packed into a single `u64`. The version prevents ABA problems when
/// entity slots are recycled: a despawned entity's `(raw_id, version)`
/// pair never compares equal to any later live entity of the same store.
///
/// An `Entity` is the only stable handle to a logical object in a store.
/// References obtained through it are invalidated by structural changes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    id: u64,
}

impl Entity {
    /// Creates an entity from a slot id and version.
    pub(crate) fn new(raw_id: u32, version: u32) -> Self {
        Self {
            id: (version as u64) << 32 | raw_id as u64,
        }
    }

    /// Returns the dense slot id.
    pub fn raw_id(&self) -> u32 {
        self.id as u32
    }

    /// Returns the reuse version of the slot.
    pub fn version(&self) -> u32 {
        (self.id >> 32) as u32
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}:{})", self.raw_id(), self.version())
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}:{})", self.raw_id(), self.version())
    }
}

/// An entity that may be absent.
///
/// Thin wrapper used by APIs that historically hand out "maybe an entity"
/// values without forcing callers through `Option` plumbing at FFI-ish
/// boundaries. Converts from [`Entity`] and compares against it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OptionalEntity {
    inner: Option<Entity>,
}

impl OptionalEntity {
    /// Creates an invalid (absent) value.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Returns whether an entity is present.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the contained entity, if any.
    pub fn entity(&self) -> Option<Entity> {
        self.inner
    }
}

impl From<Entity> for OptionalEntity {
    fn from(entity: Entity) -> Self {
        Self {
            inner: Some(entity),
        }
    }
}

impl PartialEq<Entity> for OptionalEntity {
    fn eq(&self, other: &Entity) -> bool {
        self.inner == Some(*other)
    }
}

impl PartialEq<OptionalEntity> for Entity {
    fn eq(&self, other: &OptionalEntity) -> bool {
        other == self
    }
}

/// Allocates entity ids for one or more stores.
///
/// A generator may be shared between stores (see [`SharedGenerator`]) so
/// that entities transferred between them keep globally unique slot ids.
pub trait EntityIdGenerator: Send {
    /// Produces a fresh entity id.
    fn generate(&mut self) -> Entity;

    /// Marks an externally produced id as in use.
    ///
    /// Called when an entity enters a store through a path other than
    /// [`generate`](Self::generate) (reserved ids, cross-store transfer).
    fn register_existing(&mut self, entity: Entity);

    /// Returns an id to the generator after its entity was despawned.
    fn release(&mut self, entity: Entity);
}

/// Shared handle to an id generator, cloneable across stores and threads.
pub type SharedGenerator = Arc<Mutex<dyn EntityIdGenerator>>;

/// Id generator that recycles despawned slots with a bumped version.
///
/// Slot ids grow monotonically until a despawn returns one to the free
/// list; the next allocation reuses it with `version + 1`.
pub struct RecyclingEntityGenerator {
    next_raw_id: u32,
    /// Recyclable `(raw_id, next_version)` pairs, LIFO.
    free: Vec<(u32, u32)>,
}

impl RecyclingEntityGenerator {
    /// Creates a generator starting at slot id 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a generator whose first fresh slot id is `first_raw_id`.
    pub fn starting_at(first_raw_id: u32) -> Self {
        Self {
            next_raw_id: first_raw_id,
            free: Vec::new(),
        }
    }

    /// Wraps a new generator in a [`SharedGenerator`] handle.
    pub fn shared() -> SharedGenerator {
        Arc::new(Mutex::new(Self::new()))
    }
}

impl Default for RecyclingEntityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIdGenerator for RecyclingEntityGenerator {
    fn generate(&mut self) -> Entity {
        if let Some((raw_id, version)) = self.free.pop() {
            return Entity::new(raw_id, version);
        }
        let raw_id = self.next_raw_id;
        self.next_raw_id += 1;
        Entity::new(raw_id, 0)
    }

    fn register_existing(&mut self, entity: Entity) {
        // Keep fresh allocations from colliding with the registered slot.
        if entity.raw_id() >= self.next_raw_id {
            self.next_raw_id = entity.raw_id() + 1;
        }
        self.free.retain(|&(raw_id, _)| raw_id != entity.raw_id());
    }

    fn release(&mut self, entity: Entity) {
        self.free
            .push((entity.raw_id(), entity.version().wrapping_add(1)));
    }
}

/// Id generator that never reuses slots.
///
/// Slot ids are strictly monotonic and the version is always 0. Useful
/// when entity ids double as creation-ordered handles.
pub struct IncrementalEntityGenerator {
    next_raw_id: u32,
}

impl IncrementalEntityGenerator {
    /// Creates a generator starting at slot id 0.
    pub fn new() -> Self {
        Self { next_raw_id: 0 }
    }

    /// Wraps a new generator in a [`SharedGenerator`] handle.
    pub fn shared() -> SharedGenerator {
        Arc::new(Mutex::new(Self::new()))
    }
}

impl Default for IncrementalEntityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIdGenerator for IncrementalEntityGenerator {
    fn generate(&mut self) -> Entity {
        let raw_id = self.next_raw_id;
        self.next_raw_id += 1;
        Entity::new(raw_id, 0)
    }

    fn register_existing(&mut self, entity: Entity) {
        if entity.raw_id() >= self.next_raw_id {
            self.next_raw_id = entity.raw_id() + 1;
        }
    }

    fn release(&mut self, _entity: Entity) {
        // Slots are never reused.
    }
}
