use hibitset::{BitIter, BitSet, BitSetLike};

use crate::entity::Index;

use super::Pool;

/// Dense, `Vec`-backed pool. Default storage for `#[derive(Component)]`,
/// mirroring the teacher's `DenseVecStorage`. Capacity grows by doubling.
pub struct VecPool<T> {
    mask: BitSet,
    data: Vec<Option<T>>,
}

impl<T> Default for VecPool<T> {
    fn default() -> Self {
        VecPool {
            mask: BitSet::new(),
            data: Vec::new(),
        }
    }
}

impl<T: 'static + Send + Sync> Pool for VecPool<T> {
    type Item = T;

    fn ensure_capacity(&mut self, id: Index) {
        let needed = id as usize + 1;
        if self.data.len() < needed {
            let mut new_len = self.data.len().max(1);
            while new_len < needed {
                new_len *= 2;
            }
            self.data.resize_with(new_len, || None);
        }
    }

    fn has(&self, id: Index) -> bool {
        self.mask.contains(id)
    }

    fn get(&self, id: Index) -> Option<&T> {
        if self.mask.contains(id) {
            self.data[id as usize].as_ref()
        } else {
            None
        }
    }

    fn get_mut(&mut self, id: Index) -> Option<&mut T> {
        if self.mask.contains(id) {
            self.data[id as usize].as_mut()
        } else {
            None
        }
    }

    fn insert(&mut self, id: Index, value: T) -> Option<T> {
        self.ensure_capacity(id);
        self.mask.add(id);
        self.data[id as usize].replace(value)
    }

    fn remove(&mut self, id: Index, clear_data: bool) -> Option<T> {
        if !self.mask.remove(id) {
            return None;
        }
        if clear_data {
            self.data[id as usize].take()
        } else {
            // Leave the slot's memory in place; the presence bit is already
            // cleared so it will be treated as absent and overwritten on
            // next insert.
            None
        }
    }

    fn mask(&self) -> &BitSet {
        &self.mask
    }

    fn count(&self) -> usize {
        (&self.mask).iter().count()
    }

    fn enumerate_ids(&self) -> BitIter<&BitSet> {
        (&self.mask).iter()
    }

    fn clear_all(&mut self) {
        self.data.clear();
        self.mask = BitSet::new();
    }
}
