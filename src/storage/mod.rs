//! Component pool storage.
//!
//! Grounded on the teacher's `storage::MaskedStorage<T>` (a bitset mask
//! paired with an `UnprotectedStorage<T>`), folded into a single pool type
//! per the spec's data model (§3: "presence bitset ... grows in powers of
//! two"). `VecPool` mirrors `storages::VecStorage` /
//! `storages::DenseVecStorage`; `HashMapPool` mirrors
//! `storages::HashMapStorage` for rare/sparse components.

mod hash_map_pool;
mod vec_pool;

pub use hash_map_pool::HashMapPool;
pub use vec_pool::VecPool;

use std::any::Any;

use downcast_rs::{impl_downcast, Downcast};
use hibitset::{BitIter, BitSet};

use crate::entity::Index;

/// A typed pool of components, keyed by entity index.
///
/// Invariants (spec §3): `present(id) => id < capacity()`; `count() ==
/// popcount(mask)`; a slot is valid to read only while `present(id)`.
pub trait Pool: Default + Send + Sync + 'static {
    /// The component type this pool stores.
    type Item: Any;

    /// Grows backing storage (by doubling) until `id` is addressable.
    fn ensure_capacity(&mut self, id: Index);

    /// Whether a component is present at `id`.
    fn has(&self, id: Index) -> bool;

    /// Reads the component at `id`, if present.
    fn get(&self, id: Index) -> Option<&Self::Item>;

    /// Mutably accesses the component at `id`, if present.
    fn get_mut(&mut self, id: Index) -> Option<&mut Self::Item>;

    /// Inserts or overwrites the component at `id`, growing capacity as
    /// needed. Returns the previous value, if any.
    fn insert(&mut self, id: Index, value: Self::Item) -> Option<Self::Item>;

    /// Removes the component at `id`. If `clear_data` is true the backing
    /// slot is reset to its default/dropped state; otherwise the bit is
    /// cleared but the slot memory may be left as-is until overwritten.
    fn remove(&mut self, id: Index, clear_data: bool) -> Option<Self::Item>;

    /// The presence bitset.
    fn mask(&self) -> &BitSet;

    /// Population count of the presence bitset.
    fn count(&self) -> usize;

    /// Zero-allocation enumeration of present ids, smallest first: borrows
    /// the presence bitset rather than collecting it.
    fn enumerate_ids(&self) -> BitIter<&BitSet>;

    /// Drops every stored component and clears the presence bitset.
    fn clear_all(&mut self);
}

/// Dynamic, type-erased view over a `Pool<T>`, used by the repository for
/// boxed/reflective operations (editor tools, snapshot I/O) per the design
/// note on "reflection-heavy boxed operations."
pub trait AnyPool: Downcast + Send + Sync {
    /// Grows backing storage until `id` is addressable, without writing to
    /// it. Used to pre-size a pool from `WorldConfig::initial_pool_buckets`.
    fn ensure_capacity_dyn(&mut self, id: Index);

    /// Whether a component is present at `id`.
    fn has_dyn(&self, id: Index) -> bool;

    /// Reads the component at `id` as `&dyn Any`, if present.
    fn get_boxed(&self, id: Index) -> Option<&dyn Any>;

    /// Overwrites the component at `id` with a boxed value of the pool's
    /// component type. Panics (via a failed downcast) if `value` is not of
    /// that type — callers are expected to have validated the type id
    /// ahead of time through the repository's factory registry.
    fn set_boxed(&mut self, id: Index, value: Box<dyn Any>);

    /// Removes the component at `id`, dropping its data.
    fn remove_dyn(&mut self, id: Index);

    /// The presence bitset.
    fn mask_dyn(&self) -> &BitSet;

    /// Zero-allocation enumeration of present ids, smallest first.
    fn enumerate_ids_dyn(&self) -> BitIter<&BitSet>;

    /// Drops every stored component and clears the presence bitset.
    fn clear_all_dyn(&mut self);

    /// Population count of the presence bitset.
    fn count_dyn(&self) -> usize;
}
impl_downcast!(AnyPool);

impl<P> AnyPool for P
where
    P: Pool + 'static,
{
    fn ensure_capacity_dyn(&mut self, id: Index) {
        self.ensure_capacity(id)
    }

    fn has_dyn(&self, id: Index) -> bool {
        self.has(id)
    }

    fn get_boxed(&self, id: Index) -> Option<&dyn Any> {
        self.get(id).map(|v| v as &dyn Any)
    }

    fn set_boxed(&mut self, id: Index, value: Box<dyn Any>) {
        let value = *value.downcast::<P::Item>().unwrap_or_else(|_| {
            panic!(
                "boxed value type mismatch for pool of {}",
                std::any::type_name::<P::Item>()
            )
        });
        self.insert(id, value);
    }

    fn remove_dyn(&mut self, id: Index) {
        self.remove(id, true);
    }

    fn mask_dyn(&self) -> &BitSet {
        self.mask()
    }

    fn enumerate_ids_dyn(&self) -> BitIter<&BitSet> {
        self.enumerate_ids()
    }

    fn clear_all_dyn(&mut self) {
        self.clear_all()
    }

    fn count_dyn(&self) -> usize {
        self.count()
    }
}
