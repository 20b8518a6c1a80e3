//! Entity identity and allocation.
//!
//! Grounded on the teacher's `world/entity.rs::Allocator`, simplified to the
//! single-threaded-per-world model described in the spec: structural changes
//! only ever happen on the tick thread (directly) or through the command
//! buffer / external queue (deferred), so there is no need for the teacher's
//! atomic raise/kill split bitsets.

use hibitset::BitSet;
use log::trace;

/// An index is the id of an `Entity`. Reused across recycles.
pub type Index = u32;

/// Generation counter for a given index. Bumped on every `destroy_entity`
/// so stale handles become detectable.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct Generation(pub(crate) u16);

impl Generation {
    /// Returns the raw generation value.
    pub fn value(&self) -> u16 {
        self.0
    }

    fn bump(self) -> Generation {
        Generation(self.0.wrapping_add(1))
    }
}

/// Opaque handle `(id, generation)` referring to one logical object within a
/// world.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct Entity {
    id: Index,
    generation: Generation,
}

impl Entity {
    /// Constructs an entity handle directly. Mostly useful for snapshot
    /// restore, where ids and generations come from serialized state.
    pub fn from_raw(id: Index, generation: u16) -> Self {
        Entity {
            id,
            generation: Generation(generation),
        }
    }

    /// The dense index of this entity.
    #[inline]
    pub fn id(&self) -> Index {
        self.id
    }

    /// The generation this handle was issued with.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.id, self.generation.0)
    }
}

/// Dense entity allocator: free-id stack, next-id counter, a per-id
/// generation array, and an alive bitset.
///
/// Invariant: a handle is *alive* iff `alive.contains(id) && generations[id]
/// == handle.generation()`.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    next_id: Index,
    free_ids: Vec<Index>,
    generations: Vec<Generation>,
    alive: BitSet,
    alive_count: usize,
}

impl EntityAllocator {
    /// Creates an allocator with pre-reserved backing storage.
    pub fn with_capacity(capacity: usize) -> Self {
        EntityAllocator {
            next_id: 0,
            free_ids: Vec::new(),
            generations: Vec::with_capacity(capacity),
            alive: BitSet::with_capacity(capacity as u32),
            alive_count: 0,
        }
    }

    /// Pops from the free-id stack or increments the next-id counter; sets
    /// the alive bit and returns `(id, current_gen)`.
    pub fn create_entity(&mut self) -> Entity {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.generations.push(Generation(0));
                id
            }
        };

        self.alive.add(id);
        self.alive_count += 1;
        let generation = self.generations[id as usize];
        trace!("allocated entity {}#{}", id, generation.0);
        Entity { id, generation }
    }

    /// Verifies liveness, clears the alive bit, bumps the generation
    /// (wrap-safe), and pushes the id onto the free-id stack. A no-op if the
    /// entity is already dead.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let id = entity.id as usize;
        self.alive.remove(entity.id);
        self.alive_count -= 1;
        self.generations[id] = self.generations[id].bump();
        self.free_ids.push(entity.id);
        trace!("destroyed entity {}", entity);
        true
    }

    /// `alive_bits[e.id] && generation[e.id] == e.gen`.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(entity.id)
            && self
                .generations
                .get(entity.id as usize)
                .is_some_and(|g| *g == entity.generation)
    }

    /// Number of currently alive entities.
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// The current generation for `id`, regardless of whether it is alive.
    /// `Generation(0)` for an `id` never seen by this allocator. Used to
    /// build `Error::InvalidHandle` diagnostics for stale handles.
    pub fn current_generation(&self, id: Index) -> Generation {
        self.generations.get(id as usize).copied().unwrap_or_default()
    }

    /// Read-only snapshot of every currently alive entity, in ascending id
    /// order.
    pub fn all_entities(&self) -> Vec<Entity> {
        use hibitset::BitSetLike;
        (&self.alive)
            .iter()
            .map(|id| Entity {
                id,
                generation: self.generations[id as usize],
            })
            .collect()
    }

    /// Returns the live entity for a given index, regardless of whether it
    /// is actually alive (used by `restore` paths where the caller already
    /// knows the id/generation pair to reconstruct).
    pub fn entity_at(&self, id: Index) -> Option<Entity> {
        self.generations
            .get(id as usize)
            .map(|&generation| Entity { id, generation })
    }

    /// Clears alive bits and, if `keep_capacity` is false, rebuilds the
    /// backing arrays entirely. Either way every previously issued handle
    /// becomes invalid: generations for all ids that were alive are bumped.
    pub fn reset(&mut self, keep_capacity: bool) {
        if keep_capacity {
            use hibitset::BitSetLike;
            let ids: Vec<Index> = (&self.alive).iter().collect();
            for id in ids {
                self.generations[id as usize] = self.generations[id as usize].bump();
                self.free_ids.push(id);
            }
            self.alive.clear();
            self.alive_count = 0;
        } else {
            self.next_id = 0;
            self.free_ids.clear();
            self.generations.clear();
            self.alive = BitSet::new();
            self.alive_count = 0;
        }
    }

    /// Restores allocator state from a snapshot: explicit next-id, per-id
    /// generations, and the free-id list. Used by `World::load_full_snapshot`
    /// after the world has been cleared.
    pub(crate) fn restore_raw(
        &mut self,
        next_id: Index,
        generations: Vec<Generation>,
        free_ids: Vec<Index>,
        alive_ids: Vec<Index>,
    ) {
        self.next_id = next_id;
        self.generations = generations;
        self.free_ids = free_ids;
        self.alive = BitSet::new();
        self.alive_count = alive_ids.len();
        for id in alive_ids {
            self.alive.add(id);
        }
    }

    pub(crate) fn next_id(&self) -> Index {
        self.next_id
    }

    pub(crate) fn generations(&self) -> &[Generation] {
        &self.generations
    }

    pub(crate) fn free_ids(&self) -> &[Index] {
        &self.free_ids
    }
}
