//! Component pool repository (spec §4.2).
//!
//! Grounded on the teacher's per-type `MaskedStorage<T>` map (there, fetched
//! generically through `shred`'s `Resources`; here, owned directly by the
//! world as an ordered `TypeId -> Box<dyn AnyPool>` map, since this spec has
//! no generic resource-injection system to lean on). The factory map is the
//! "vtable at home" the design notes call for: a function pointer that can
//! construct a fresh pool for a type id without any of the reflection Rust
//! doesn't give us for free.

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;

use log::debug;

use crate::component::Component;
use crate::entity::{Entity, Index};
use crate::storage::{AnyPool, Pool};

struct PoolFactory {
    construct: fn() -> Box<dyn AnyPool>,
    type_name: &'static str,
    is_singleton: bool,
}

/// Ordered mapping from component type-id to pool, created lazily on first
/// write of that type.
#[derive(Default)]
pub struct PoolRepository {
    pools: BTreeMap<TypeId, Box<dyn AnyPool>>,
    factories: BTreeMap<TypeId, PoolFactory>,
}

impl PoolRepository {
    /// Registers a component type's factory. Idempotent; a pool is not
    /// actually constructed until first write.
    pub fn register<T: Component>(&mut self) {
        self.factories.entry(TypeId::of::<T>()).or_insert_with(|| {
            debug!("registered component factory for {}", type_name::<T>());
            PoolFactory {
                construct: || Box::<T::Storage>::default(),
                type_name: type_name::<T>(),
                is_singleton: T::IS_SINGLETON,
            }
        });
    }

    /// Whether `type_id` has a registered factory (i.e. some `T` has gone
    /// through `register::<T>()`), needed before `get_or_create_by_type`
    /// can construct a pool for it — used by snapshot restore to tell a
    /// genuinely unregistered component type apart from one that merely
    /// has no formatter.
    pub fn has_factory(&self, type_id: TypeId) -> bool {
        self.factories.contains_key(&type_id)
    }

    /// Returns whether `T` was tagged `#[component(singleton)]`.
    pub fn is_singleton(&self, type_id: TypeId) -> bool {
        self.factories
            .get(&type_id)
            .map(|f| f.is_singleton)
            .unwrap_or(false)
    }

    pub(crate) fn type_name_of(&self, type_id: TypeId) -> &'static str {
        self.factories
            .get(&type_id)
            .map(|f| f.type_name)
            .unwrap_or("<unregistered>")
    }

    /// Creates the pool for `T` if absent, returning a mutable typed
    /// reference.
    pub fn pool_mut<T: Component>(&mut self) -> &mut T::Storage {
        self.register::<T>();
        let entry = self
            .pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::<T::Storage>::default());
        entry
            .downcast_mut::<T::Storage>()
            .expect("pool type mismatch")
    }

    /// Returns the pool for `T` only if it has been written to at least
    /// once.
    pub fn try_pool<T: Component>(&self) -> Option<&T::Storage> {
        self.pools
            .get(&TypeId::of::<T>())
            .and_then(|p| p.downcast_ref::<T::Storage>())
    }

    /// Returns the pool for `T`, mutable, only if it already exists.
    pub fn try_pool_mut<T: Component>(&mut self) -> Option<&mut T::Storage> {
        self.pools
            .get_mut(&TypeId::of::<T>())
            .and_then(|p| p.downcast_mut::<T::Storage>())
    }

    /// Dynamic lookup by type id, for editor/reflection callers.
    pub fn pool_by_type(&self, type_id: TypeId) -> Option<&dyn AnyPool> {
        self.pools.get(&type_id).map(|p| p.as_ref())
    }

    /// Dynamic mutable lookup by type id.
    pub fn pool_by_type_mut(&mut self, type_id: TypeId) -> Option<&mut Box<dyn AnyPool>> {
        self.pools.get_mut(&type_id)
    }

    /// Creates the pool for `type_id` from the factory registry if absent,
    /// returning a dynamic mutable reference. Panics if `type_id` was never
    /// registered — the factory registry has to have seen the type through
    /// `register::<T>()` (usually via `World::register::<T>()`) first.
    pub fn get_or_create_by_type(&mut self, type_id: TypeId) -> &mut Box<dyn AnyPool> {
        let factory = self
            .factories
            .get(&type_id)
            .unwrap_or_else(|| panic!("component type {:?} was never registered", type_id));
        self.pools
            .entry(type_id)
            .or_insert_with(|| (factory.construct)())
    }

    /// Replaces (or installs) the pool for a type id wholesale. Used by
    /// snapshot restore.
    pub fn set_pool(&mut self, type_id: TypeId, pool: Box<dyn AnyPool>) {
        self.pools.insert(type_id, pool);
    }

    /// Iterates every currently-instantiated pool's type id, for snapshot
    /// enumeration.
    pub fn iter_type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.pools.keys().copied()
    }

    /// Fans removal of `e` out to every pool that has ever been written.
    pub fn remove_entity(&mut self, e: Entity) {
        let id: Index = e.id();
        for pool in self.pools.values_mut() {
            pool.remove_dyn(id);
        }
    }

    /// Drops all component data in every pool, but keeps the factory
    /// registry (and thus the pool-by-type-id entries) intact.
    pub fn clear_all_pools(&mut self) {
        for pool in self.pools.values_mut() {
            pool.clear_all_dyn();
        }
    }

    /// Picks the pool among `candidates` with the fewest present entities;
    /// `None` if `candidates` is empty or any candidate pool has never been
    /// written (i.e. is absent from the repository).
    ///
    /// Ties are broken by the lowest `TypeId` ordering (our `BTreeMap`
    /// iterates in that order already, so the first minimum found is
    /// deterministic) — spec §4.3's seed-pool tie-break rule.
    pub fn seed_pool<'a>(&'a self, candidates: &[TypeId]) -> Option<(&'a dyn AnyPool, TypeId)> {
        let mut best: Option<(&dyn AnyPool, TypeId)> = None;
        for &type_id in candidates {
            let pool = self.pool_by_type(type_id)?;
            let count = pool.count_dyn();
            match best {
                Some((best_pool, _)) if best_pool.count_dyn() <= count => {}
                _ => best = Some((pool, type_id)),
            }
        }
        best
    }

    /// Typed helper over `dyn Any` for editor-style access, used by the
    /// boxed component surface.
    pub fn get_boxed(&self, type_id: TypeId, id: Index) -> Option<&dyn Any> {
        self.pool_by_type(type_id)?.get_boxed(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecPool;

    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {
        type Storage = VecPool<Position>;
    }

    #[test]
    fn pool_created_lazily_on_first_write() {
        let mut repo = PoolRepository::default();
        assert!(repo.try_pool::<Position>().is_none());
        repo.pool_mut::<Position>().insert(0, Position { x: 1.0, y: 0.0 });
        assert!(repo.try_pool::<Position>().is_some());
    }

    #[test]
    fn remove_entity_fans_out_to_every_pool() {
        let mut repo = PoolRepository::default();
        repo.pool_mut::<Position>().insert(3, Position { x: 0.0, y: 0.0 });
        repo.remove_entity(Entity::from_raw(3, 0));
        assert!(!repo.try_pool::<Position>().unwrap().has(3));
    }
}
