use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entity::Entity;
use crate::registry::{Component, TypeKey};

/// Dense storage for components of a single type.
///
/// Three parallel structures keep per-type iteration linear:
///
/// - `dense`: packed component values,
/// - `owners`: `owners[i]` is the entity owning `dense[i]`,
/// - `sparse`: entity slot id → index into `dense`, key present iff the
///   entity has this component.
///
/// Removal swap-removes: the last element relocates into the freed slot and
/// the sparse entry of its owner is rewritten. Iteration order is therefore
/// unspecified and may change on every structural mutation, and references
/// into the storage are invalidated by any such mutation.
pub struct DenseStorage<T> {
    dense: Vec<T>,
    owners: Vec<Entity>,
    sparse: HashMap<u32, usize>,
}

impl<T> DenseStorage<T> {
    pub(crate) fn new() -> Self {
        Self {
            dense: Vec::new(),
            owners: Vec::new(),
            sparse: HashMap::new(),
        }
    }

    /// Returns the number of stored components.
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Returns whether the storage holds no components.
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Returns whether the entity slot owns a component here.
    pub fn contains(&self, raw_id: u32) -> bool {
        self.sparse.contains_key(&raw_id)
    }

    /// Returns the component owned by the entity slot.
    pub fn get(&self, raw_id: u32) -> Option<&T> {
        self.sparse.get(&raw_id).map(|&i| &self.dense[i])
    }

    /// Returns the component owned by the entity slot, mutably.
    pub fn get_mut(&mut self, raw_id: u32) -> Option<&mut T> {
        match self.sparse.get(&raw_id) {
            Some(&i) => Some(&mut self.dense[i]),
            None => None,
        }
    }

    /// Iterates `(owner, &component)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.owners.iter().copied().zip(self.dense.iter())
    }

    /// Iterates `(owner, &mut component)` pairs in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.owners.iter().copied().zip(self.dense.iter_mut())
    }

    /// Returns the owning entities in dense order.
    pub fn owners(&self) -> &[Entity] {
        &self.owners
    }

    /// Returns the packed component values.
    pub fn components(&self) -> &[T] {
        &self.dense
    }

    /// Returns the packed component values, mutably.
    pub fn components_mut(&mut self) -> &mut [T] {
        &mut self.dense
    }

    /// Appends a component for `entity`.
    ///
    /// The entity must not already own a component here (checked in debug
    /// builds). Returns a reference valid until the next structural change.
    pub(crate) fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        debug_assert!(
            !self.sparse.contains_key(&entity.raw_id()),
            "duplicate component insert for {entity}"
        );
        let index = self.dense.len();
        self.dense.push(value);
        self.owners.push(entity);
        self.sparse.insert(entity.raw_id(), index);
        &mut self.dense[index]
    }

    /// Removes the entity slot's component, returning it.
    ///
    /// Swap-remove: if the removed element was not last, the last element
    /// moves into its place and the relocated owner's sparse entry is
    /// updated. No-op returning `None` when absent.
    pub(crate) fn take(&mut self, raw_id: u32) -> Option<T> {
        let index = self.sparse.remove(&raw_id)?;
        let last = self.dense.len() - 1;
        if index != last {
            let relocated_owner = self.owners[last];
            self.owners.swap(index, last);
            self.sparse.insert(relocated_owner.raw_id(), index);
        }
        self.owners.pop();
        Some(self.dense.swap_remove(index))
    }

    /// Drops every component and clears all three structures.
    pub(crate) fn clear(&mut self) {
        self.dense.clear();
        self.owners.clear();
        self.sparse.clear();
    }

    /// Returns the owner at a dense index. Index must be in bounds.
    pub(crate) fn owner_at(&self, index: usize) -> Entity {
        self.owners[index]
    }

    /// Returns a mutable pointer to the entity slot's component.
    ///
    /// # Safety
    ///
    /// - `this` must point to a valid, initialized `DenseStorage<T>`.
    /// - The caller must hold exclusive access to the storage (write lock
    ///   or `&mut` on the owning store) and must not create aliasing
    ///   references to the same dense slot.
    pub(crate) unsafe fn get_ptr_mut(this: *mut Self, raw_id: u32) -> Option<*mut T> {
        // SAFETY: caller guarantees `this` is valid and exclusively accessed.
        unsafe {
            let storage = &mut *this;
            let index = *storage.sparse.get(&raw_id)?;
            Some(storage.dense.as_mut_ptr().add(index))
        }
    }
}

impl<T: Clone> Clone for DenseStorage<T> {
    /// Deep copy: exactly one `T::clone` per stored component.
    fn clone(&self) -> Self {
        Self {
            dense: self.dense.clone(),
            owners: self.owners.clone(),
            sparse: self.sparse.clone(),
        }
    }
}

impl<T> Default for DenseStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Type-erased operation signatures. Each StorageCell captures these as plain
// function pointers at construction, when the concrete type is still known.
type ErasedInner = dyn Any + Send + Sync;
type RemoveFn = fn(&mut ErasedInner, u32) -> bool;
type ContainsFn = fn(&ErasedInner, u32) -> bool;
type LenFn = fn(&ErasedInner) -> usize;
type OwnersFn = for<'a> fn(&'a ErasedInner) -> &'a [Entity];
type CloneInnerFn = fn(&ErasedInner) -> Box<ErasedInner>;
type FreshInnerFn = fn() -> Box<ErasedInner>;
type MoveEntryFn = fn(&mut ErasedInner, &mut ErasedInner, u32, Entity) -> bool;
type GetAnyFn = for<'a> fn(&'a mut ErasedInner, u32) -> Option<&'a mut dyn Any>;

/// A type-erased component storage, one per component type per store.
///
/// Wraps a [`DenseStorage<T>`] behind `dyn Any` together with the erased
/// operations the owning store needs without knowing `T`: removal on
/// despawn, deep copy, cross-store entry moves, and type-erased lookup.
///
/// Carries a per-storage `RwLock` so component data can be accessed through
/// `&EntityStore` while the scheduler keeps writers disjoint.
impl<K: std::fmt::Debug> std::fmt::Debug for StorageCell<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCell")
            .field("key", &self.key)
            .field("type_name", &self.type_name)
            .finish()
    }
}

pub(crate) struct StorageCell<K> {
    inner: Box<ErasedInner>,
    lock: RwLock<()>,
    key: K,
    type_name: &'static str,
    remove_fn: RemoveFn,
    contains_fn: ContainsFn,
    len_fn: LenFn,
    owners_fn: OwnersFn,
    clone_inner_fn: CloneInnerFn,
    fresh_inner_fn: FreshInnerFn,
    move_entry_fn: MoveEntryFn,
    get_any_fn: GetAnyFn,
}

impl<K: TypeKey> StorageCell<K> {
    /// Creates an empty cell for component type `T`.
    pub(crate) fn new<T: Component<K>>() -> Self {
        Self {
            inner: Box::new(DenseStorage::<T>::new()),
            lock: RwLock::new(()),
            key: T::type_id(),
            type_name: std::any::type_name::<T>(),
            remove_fn: |any, raw_id| {
                let storage = any.downcast_mut::<DenseStorage<T>>().unwrap();
                storage.take(raw_id).is_some()
            },
            contains_fn: |any, raw_id| {
                let storage = any.downcast_ref::<DenseStorage<T>>().unwrap();
                storage.contains(raw_id)
            },
            len_fn: |any| any.downcast_ref::<DenseStorage<T>>().unwrap().len(),
            owners_fn: |any| any.downcast_ref::<DenseStorage<T>>().unwrap().owners(),
            clone_inner_fn: |any| {
                let storage = any.downcast_ref::<DenseStorage<T>>().unwrap();
                Box::new(storage.clone())
            },
            fresh_inner_fn: || Box::new(DenseStorage::<T>::new()),
            move_entry_fn: |source, destination, raw_id, destination_entity| {
                let source = source.downcast_mut::<DenseStorage<T>>().unwrap();
                let destination = destination.downcast_mut::<DenseStorage<T>>().unwrap();
                match source.take(raw_id) {
                    Some(value) => {
                        destination.insert(destination_entity, value);
                        true
                    }
                    None => false,
                }
            },
            get_any_fn: |any, raw_id| {
                let storage = any.downcast_mut::<DenseStorage<T>>().unwrap();
                storage.get_mut(raw_id).map(|value| value as &mut dyn Any)
            },
        }
    }

    /// Downcasts to the typed storage.
    pub(crate) fn typed<T: 'static>(&self) -> &DenseStorage<T> {
        self.inner.downcast_ref::<DenseStorage<T>>().unwrap()
    }

    /// Downcasts to the typed storage, mutably.
    pub(crate) fn typed_mut<T: 'static>(&mut self) -> &mut DenseStorage<T> {
        self.inner.downcast_mut::<DenseStorage<T>>().unwrap()
    }

    /// Acquires the shared lock. Panics immediately on conflict rather than
    /// deadlocking, so aliasing bugs surface at the borrow site.
    pub(crate) fn lock_read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.try_read().unwrap_or_else(|_| {
            panic!(
                "cannot borrow `{}` immutably: already borrowed mutably",
                self.type_name
            )
        })
    }

    /// Acquires the exclusive lock. Panics immediately on conflict.
    pub(crate) fn lock_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.try_write().unwrap_or_else(|_| {
            panic!(
                "cannot borrow `{}` mutably: already borrowed",
                self.type_name
            )
        })
    }

    /// Removes the entity slot's component (type-erased). Returns whether a
    /// component was removed; its destructor runs exactly once.
    pub(crate) fn remove_erased(&mut self, raw_id: u32) -> bool {
        (self.remove_fn)(self.inner.as_mut(), raw_id)
    }

    /// Presence test (type-erased).
    pub(crate) fn contains_erased(&self, raw_id: u32) -> bool {
        (self.contains_fn)(self.inner.as_ref(), raw_id)
    }

    /// Number of stored components (type-erased).
    pub(crate) fn len(&self) -> usize {
        (self.len_fn)(self.inner.as_ref())
    }

    /// Owning entities in dense order (type-erased).
    pub(crate) fn owners(&self) -> &[Entity] {
        (self.owners_fn)(self.inner.as_ref())
    }

    /// Deep copy of the cell. Each component is cloned exactly once; the
    /// lock state is not copied.
    pub(crate) fn clone_cell(&self) -> Self {
        Self {
            inner: (self.clone_inner_fn)(self.inner.as_ref()),
            lock: RwLock::new(()),
            key: self.key.clone(),
            type_name: self.type_name,
            remove_fn: self.remove_fn,
            contains_fn: self.contains_fn,
            len_fn: self.len_fn,
            owners_fn: self.owners_fn,
            clone_inner_fn: self.clone_inner_fn,
            fresh_inner_fn: self.fresh_inner_fn,
            move_entry_fn: self.move_entry_fn,
            get_any_fn: self.get_any_fn,
        }
    }

    /// An empty cell of the same component type.
    pub(crate) fn fresh_cell(&self) -> Self {
        Self {
            inner: (self.fresh_inner_fn)(),
            lock: RwLock::new(()),
            key: self.key.clone(),
            type_name: self.type_name,
            remove_fn: self.remove_fn,
            contains_fn: self.contains_fn,
            len_fn: self.len_fn,
            owners_fn: self.owners_fn,
            clone_inner_fn: self.clone_inner_fn,
            fresh_inner_fn: self.fresh_inner_fn,
            move_entry_fn: self.move_entry_fn,
            get_any_fn: self.get_any_fn,
        }
    }

    /// Moves one entity's component from this cell into `destination`,
    /// re-owned by `destination_entity`. No clone is performed. Returns
    /// whether an entry was moved.
    ///
    /// Both cells must store the same component type (guaranteed by the
    /// owning stores sharing one registry; violations panic on downcast).
    pub(crate) fn move_entry_to(
        &mut self,
        destination: &mut StorageCell<K>,
        raw_id: u32,
        destination_entity: Entity,
    ) -> bool {
        (self.move_entry_fn)(
            self.inner.as_mut(),
            destination.inner.as_mut(),
            raw_id,
            destination_entity,
        )
    }

    /// Type-erased mutable component lookup.
    pub(crate) fn get_any_mut(&mut self, raw_id: u32) -> Option<&mut dyn Any> {
        (self.get_any_fn)(self.inner.as_mut(), raw_id)
    }
}

/// Shared read access to one component storage.
///
/// Holds the storage's read lock for its lifetime and dereferences to
/// [`DenseStorage<T>`]. Obtained through `EntityStore::read`.
pub struct Ref<'a, T: 'static> {
    inner: &'a DenseStorage<T>,
    _guard: RwLockReadGuard<'a, ()>,
}

impl<'a, T: 'static> Ref<'a, T> {
    pub(crate) fn new<K: TypeKey>(cell: &'a StorageCell<K>) -> Self {
        let guard = cell.lock_read();
        Self {
            inner: cell.typed::<T>(),
            _guard: guard,
        }
    }

    /// The underlying storage with the full storage lifetime (rather than
    /// the lifetime of this guard borrow).
    pub(crate) fn storage(&self) -> &'a DenseStorage<T> {
        self.inner
    }
}

impl<T: 'static> Deref for Ref<'_, T> {
    type Target = DenseStorage<T>;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

/// Exclusive write access to one component storage.
///
/// Holds the storage's write lock for its lifetime and dereferences to
/// [`DenseStorage<T>`]. Obtained through `EntityStore::write`.
pub struct RefMut<'a, T: 'static> {
    inner: *mut DenseStorage<T>,
    _guard: RwLockWriteGuard<'a, ()>,
    _marker: PhantomData<&'a mut DenseStorage<T>>,
}

impl<'a, T: 'static> RefMut<'a, T> {
    pub(crate) fn new<K: TypeKey>(cell: &'a StorageCell<K>) -> Self {
        let guard = cell.lock_write();
        // SAFETY: the write lock guarantees exclusive access; casting the
        // shared reference to a mutable pointer is sound while it is held.
        let inner = cell.typed::<T>() as *const DenseStorage<T> as *mut DenseStorage<T>;
        Self {
            inner,
            _guard: guard,
            _marker: PhantomData,
        }
    }

    /// Raw pointer to the storage, for per-entity access paths that cannot
    /// go through `&mut self`.
    pub(crate) fn storage_ptr(&self) -> *mut DenseStorage<T> {
        self.inner
    }
}

impl<T: 'static> Deref for RefMut<'_, T> {
    type Target = DenseStorage<T>;

    fn deref(&self) -> &Self::Target {
        // SAFETY: exclusive access guaranteed by the held write lock.
        unsafe { &*self.inner }
    }
}

impl<T: 'static> DerefMut for RefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: exclusive access guaranteed by the held write lock.
        unsafe { &mut *self.inner }
    }
}

// SAFETY: Ref only hands out shared access; RefMut's exclusivity is
// enforced by the write lock it holds.
unsafe impl<T: Send + Sync + 'static> Send for Ref<'_, T> {}
unsafe impl<T: Send + Sync + 'static> Sync for Ref<'_, T> {}
unsafe impl<T: Send + Sync + 'static> Send for RefMut<'_, T> {}
unsafe impl<T: Send + Sync + 'static> Sync for RefMut<'_, T> {}
