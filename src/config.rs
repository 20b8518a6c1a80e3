//! World and kernel configuration objects (spec §6, Environment/config).

use std::any::TypeId;
use std::collections::HashMap;

use crate::entity::Index;
use crate::policy::WriteFailurePolicy;

/// Configuration accepted at `World` creation time.
#[derive(Clone, Debug, Default)]
pub struct WorldConfig {
    /// Pre-sized pool capacity hints, applied the first time each type's
    /// pool is created.
    pub initial_pool_buckets: HashMap<TypeId, Index>,
    /// Pre-allocated capacity for the binding router's per-entity binder
    /// maps.
    pub initial_binder_buckets: usize,
    /// What happens when a write is denied by the phase gate, a permission
    /// predicate, or a validator.
    pub write_failure_policy: WriteFailurePolicy,
    /// Initial entity allocator capacity.
    pub initial_entity_capacity: usize,
}

/// Function used by the kernel to mint a world id when the caller doesn't
/// supply one explicitly.
pub type WorldIdFactory = fn() -> uuid::Uuid;

/// Configuration accepted at `Kernel` creation time.
#[derive(Clone)]
pub struct KernelConfig {
    /// Mints a world id for `create_world` calls that don't pass one.
    pub new_world_id_factory: WorldIdFactory,
    /// Prefix used when auto-naming worlds created without an explicit
    /// name, as `"{prefix}{n}"`.
    pub auto_name_prefix: String,
    /// When true, `begin_frame`/`fixed_step`/`late_frame`/
    /// `pump_and_late_frame` on the kernel target only the current world
    /// instead of every registered world.
    pub step_only_current_when_selected: bool,
    /// When true, a newly created world automatically becomes the current
    /// world.
    pub auto_select_new_world: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            new_world_id_factory: uuid::Uuid::new_v4,
            auto_name_prefix: "world-".to_string(),
            step_only_current_when_selected: false,
            auto_select_new_world: true,
        }
    }
}

impl std::fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelConfig")
            .field("auto_name_prefix", &self.auto_name_prefix)
            .field(
                "step_only_current_when_selected",
                &self.step_only_current_when_selected,
            )
            .field("auto_select_new_world", &self.auto_select_new_world)
            .finish_non_exhaustive()
    }
}
