use ahash::AHashMap;
use hibitset::{BitIter, BitSet, BitSetLike};

use crate::entity::Index;

use super::Pool;

/// Sparse, `HashMap`-backed pool for rare component types, mirroring the
/// teacher's `HashMapStorage`. Selected via
/// `#[component(storage = "HashMapPool")]`.
pub struct HashMapPool<T> {
    mask: BitSet,
    data: AHashMap<Index, T>,
}

impl<T> Default for HashMapPool<T> {
    fn default() -> Self {
        HashMapPool {
            mask: BitSet::new(),
            data: AHashMap::new(),
        }
    }
}

impl<T: 'static + Send + Sync> Pool for HashMapPool<T> {
    type Item = T;

    fn ensure_capacity(&mut self, _id: Index) {
        // No dense backing array to grow; the map resizes itself.
    }

    fn has(&self, id: Index) -> bool {
        self.mask.contains(id)
    }

    fn get(&self, id: Index) -> Option<&T> {
        self.data.get(&id)
    }

    fn get_mut(&mut self, id: Index) -> Option<&mut T> {
        self.data.get_mut(&id)
    }

    fn insert(&mut self, id: Index, value: T) -> Option<T> {
        self.mask.add(id);
        self.data.insert(id, value)
    }

    fn remove(&mut self, id: Index, _clear_data: bool) -> Option<T> {
        self.mask.remove(id);
        self.data.remove(&id)
    }

    fn mask(&self) -> &BitSet {
        &self.mask
    }

    fn count(&self) -> usize {
        self.data.len()
    }

    fn enumerate_ids(&self) -> BitIter<&BitSet> {
        (&self.mask).iter()
    }

    fn clear_all(&mut self) {
        self.data.clear();
        self.mask = BitSet::new();
    }
}
