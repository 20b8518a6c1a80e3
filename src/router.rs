//! The binding router: delta dispatch for reactive bindings (spec §4.6).
//!
//! Grounded on the teacher's `storage::track::{Flag, ModifiedFlag,
//! InsertedFlag, RemovedFlag}` bookkeeping, generalized from "populate a
//! bitset from an event channel" to "collect per-entity deltas and replay
//! them against registered binder closures" — the router is the piece the
//! teacher doesn't have (it has no UI/presentation layer), built in the
//! same per-type-channel spirit as [[messages]].

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

use crate::entity::{Entity, Index};

/// The kind of change a delta represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeltaKind {
    Added,
    Changed,
    Removed,
    /// A full resync of current state, e.g. right after a snapshot load.
    Snapshot,
}

/// One recorded change to a specific component type on a specific entity.
pub struct ComponentDelta {
    pub entity: Entity,
    pub kind: DeltaKind,
    /// Present for `Added`/`Changed`/`Snapshot`; absent for `Removed`.
    pub new_value: Option<Box<dyn Any + Send>>,
}

type Binder = Box<dyn FnMut(&ComponentDelta) + Send>;

#[derive(Default)]
struct TypeRouter {
    deltas: Vec<ComponentDelta>,
    /// Binders keyed by the entity they were registered against. A plain
    /// `HashMap`, not a `BTreeMap`: lookups here are by-id membership tests
    /// during `drain_apply`, never an ordered scan, so the determinism this
    /// router promises (§4.6) comes entirely from `deltas`' insertion order,
    /// not from this map's iteration order.
    binders: HashMap<Index, Vec<Option<Binder>>>,
}

impl TypeRouter {
    fn with_capacity(initial_binder_buckets: usize) -> Self {
        TypeRouter {
            deltas: Vec::new(),
            binders: HashMap::with_capacity(initial_binder_buckets),
        }
    }

    fn dispatch(&mut self, delta: ComponentDelta) {
        self.deltas.push(delta);
    }

    fn drain_apply(&mut self) {
        for delta in self.deltas.drain(..) {
            if let Some(slots) = self.binders.get_mut(&delta.entity.id()) {
                for slot in slots.iter_mut().flatten() {
                    slot(&delta);
                }
            }
        }
    }

    fn detach_entity(&mut self, id: Index) {
        self.binders.remove(&id);
    }
}

/// Per-type delta lists plus per-entity-per-type binder registrations.
/// `apply_all` is called exactly once per frame, at the end of `late_frame`
/// before the phase is cleared (§4.6).
#[derive(Default)]
pub struct BindingRouter {
    routers: BTreeMap<TypeId, TypeRouter>,
    /// `WorldConfig::initial_binder_buckets` (§6): pre-sizes each per-type
    /// router's binder map the first time that component type is touched.
    initial_binder_buckets: usize,
}

/// Handle returned by `bind`, used to detach a single binder.
#[derive(Clone, Copy, Debug)]
pub struct BinderToken {
    type_id: TypeId,
    entity: Entity,
    index: usize,
}

impl BindingRouter {
    /// Creates a router that pre-sizes each per-type binder map to
    /// `initial_binder_buckets` entries on first use (`WorldConfig`, §6).
    pub fn with_binder_capacity(initial_binder_buckets: usize) -> Self {
        BindingRouter {
            routers: BTreeMap::new(),
            initial_binder_buckets,
        }
    }

    fn router_mut(&mut self, type_id: TypeId) -> &mut TypeRouter {
        let capacity = self.initial_binder_buckets;
        self.routers
            .entry(type_id)
            .or_insert_with(|| TypeRouter::with_capacity(capacity))
    }

    /// Appends a delta for `type_id` to that type's dispatch list. Dispatch
    /// order within a type is preserved by `apply_all`.
    pub fn dispatch(&mut self, type_id: TypeId, delta: ComponentDelta) {
        self.router_mut(type_id).dispatch(delta);
    }

    /// Registers a binder for a specific `(entity, type_id)` pair, invoked
    /// with every delta for that pair from the next `apply_all` onward.
    pub fn bind(
        &mut self,
        type_id: TypeId,
        entity: Entity,
        binder: impl FnMut(&ComponentDelta) + Send + 'static,
    ) -> BinderToken {
        let router = self.router_mut(type_id);
        let slots = router.binders.entry(entity.id()).or_default();
        slots.push(Some(Box::new(binder)));
        BinderToken {
            type_id,
            entity,
            index: slots.len() - 1,
        }
    }

    /// Detaches a single binder. A no-op if already detached.
    pub fn unbind(&mut self, token: BinderToken) {
        if let Some(router) = self.routers.get_mut(&token.type_id) {
            if let Some(slots) = router.binders.get_mut(&token.entity.id()) {
                if let Some(slot) = slots.get_mut(token.index) {
                    *slot = None;
                }
            }
        }
    }

    /// Destruction of an entity detaches every binder registered for it,
    /// across every component type (§4.6).
    pub fn detach_entity(&mut self, entity: Entity) {
        for router in self.routers.values_mut() {
            router.detach_entity(entity.id());
        }
    }

    /// Drains every type's delta list in dispatch order, invoking each
    /// registered binder. Iteration across types follows this router's
    /// `TypeId` order, matching the message bus's topic-order convention.
    pub fn apply_all(&mut self) {
        for router in self.routers.values_mut() {
            router.drain_apply();
        }
    }

    /// Total number of undelivered deltas, for diagnostics/tests.
    pub fn pending_count(&self) -> usize {
        self.routers.values().map(|r| r.deltas.len()).sum()
    }
}
