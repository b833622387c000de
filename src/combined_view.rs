use std::any::Any;

use crate::entity::Entity;
use crate::filter::AccessTuple;
use crate::registry::TypeKey;
use crate::store::EntityStore;

/// Several entity stores iterated as one logical collection.
///
/// Holds exclusive borrows of the underlying stores for its lifetime but
/// owns none of them; build a view where it is needed and let it go.
/// Each store can carry a piece of extra data that the `*_with_extra`
/// methods hand to the callback alongside the matched components, which is
/// how callers tell the stores apart (a world id, a layer tag, …).
///
/// Iteration visits the stores in construction order; within one store the
/// usual rules apply (smallest storage drives, order unspecified).
pub struct CombinedView<'a, K: TypeKey, X = ()> {
    parts: Vec<(&'a mut EntityStore<K>, X)>,
}

impl<'a, K: TypeKey> CombinedView<'a, K, ()> {
    /// Creates a view over stores with no extra data.
    pub fn from_stores(stores: Vec<&'a mut EntityStore<K>>) -> Self {
        Self {
            parts: stores.into_iter().map(|store| (store, ())).collect(),
        }
    }
}

impl<'a, K: TypeKey, X> CombinedView<'a, K, X> {
    /// Creates a view over `(store, extra)` pairs.
    pub fn new(parts: Vec<(&'a mut EntityStore<K>, X)>) -> Self {
        Self { parts }
    }

    /// Returns the number of stores in the view.
    pub fn store_count(&self) -> usize {
        self.parts.len()
    }

    /// Iterates matching component sets across every store.
    pub fn for_each<Q: AccessTuple<K>>(&self, mut f: impl FnMut(Q::Items<'_>)) {
        for (store, _) in &self.parts {
            store.for_each::<Q>(&mut f);
        }
    }

    /// Iterates matching component sets with their owning entity.
    ///
    /// Entity ids are only unique across stores when the stores share an
    /// id generator.
    pub fn for_each_with_entity<Q: AccessTuple<K>>(
        &self,
        mut f: impl FnMut(Entity, Q::Items<'_>),
    ) {
        for (store, _) in &self.parts {
            store.for_each_with_entity::<Q>(&mut f);
        }
    }

    /// Iterates matching component sets with each store's extra data.
    pub fn for_each_with_extra<Q: AccessTuple<K>>(&self, mut f: impl FnMut(&X, Q::Items<'_>)) {
        for (store, extra) in &self.parts {
            store.for_each::<Q>(|items| f(extra, items));
        }
    }

    /// Iterates with both the extra data and the owning entity.
    pub fn for_each_with_entity_and_extra<Q: AccessTuple<K>>(
        &self,
        mut f: impl FnMut(&X, Entity, Q::Items<'_>),
    ) {
        for (store, extra) in &self.parts {
            store.for_each_with_entity::<Q>(|entity, items| f(extra, entity, items));
        }
    }

    /// Appends matching component tuples from every store into `out`.
    pub fn collect<'v, Q: AccessTuple<K>>(&'v mut self, out: &mut Vec<Q::Items<'v>>) {
        for (store, _) in self.parts.iter_mut() {
            store.collect::<Q>(out);
        }
    }

    /// Appends `(entity, tuple)` rows from every store into `out`.
    pub fn collect_with_entities<'v, Q: AccessTuple<K>>(
        &'v mut self,
        out: &mut Vec<(Entity, Q::Items<'v>)>,
    ) {
        for (store, _) in self.parts.iter_mut() {
            store.collect_with_entities::<Q>(out);
        }
    }

    /// Appends `(extra, tuple)` rows, cloning the store's extra data per
    /// row.
    pub fn collect_with_extra<'v, Q: AccessTuple<K>>(&'v mut self, out: &mut Vec<(X, Q::Items<'v>)>)
    where
        X: Clone,
    {
        for (store, extra) in self.parts.iter_mut() {
            let mut rows = Vec::new();
            store.collect::<Q>(&mut rows);
            out.extend(rows.into_iter().map(|items| (extra.clone(), items)));
        }
    }

    /// Appends `(extra, entity, tuple)` rows.
    pub fn collect_with_entities_and_extra<'v, Q: AccessTuple<K>>(
        &'v mut self,
        out: &mut Vec<(X, Entity, Q::Items<'v>)>,
    ) where
        X: Clone,
    {
        for (store, extra) in self.parts.iter_mut() {
            let mut rows = Vec::new();
            store.collect_with_entities::<Q>(&mut rows);
            out.extend(
                rows.into_iter()
                    .map(|(entity, items)| (extra.clone(), entity, items)),
            );
        }
    }

    /// Appends every component of `entity` from the first store that
    /// contains it.
    pub fn all_components_of<'v>(
        &'v mut self,
        entity: Entity,
        out: &mut Vec<(K, &'v mut dyn Any)>,
    ) {
        for (store, _) in self.parts.iter_mut() {
            if store.contains(entity) {
                store.all_components_of(entity, out);
                return;
            }
        }
    }

    /// Drains the scheduled-action queue of every store in the view.
    pub fn execute_scheduled_actions(&mut self) {
        for (store, _) in self.parts.iter_mut() {
            store.execute_scheduled_actions();
        }
    }
}
