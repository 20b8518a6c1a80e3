//! A deterministic, engine-agnostic entity-component-system runtime.
//!
//! A [`World`] hosts entities, typed component pools, a phased [`scheduler`],
//! a struct-only [`messages`] bus, and a reactive [`router`] for view
//! bindings, gated by a per-phase [`policy`]. A [`Kernel`] multiplexes
//! multiple worlds under one frame tick driven by an external host loop.
//!
//! Grounded on the teacher's (`specs`) own module layout: storages, a join/
//! query layer, a world composite, and (new here, since the teacher has no
//! multi-world concept) a kernel generalized from the example pack's
//! `legion::Universe`.

pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod kernel;
pub mod messages;
pub mod policy;
pub mod query;
pub mod repository;
pub mod router;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod world;

/// Common imports for host code, mirroring the teacher's own `prelude`
/// module.
pub mod prelude {
    pub use crate::command::{CommandBuffer, CommandSink, WriteSession};
    pub use crate::component::Component;
    pub use crate::config::{KernelConfig, WorldConfig};
    pub use crate::entity::Entity;
    pub use crate::error::{Error, Result};
    pub use crate::kernel::{Kernel, KernelEvent};
    pub use crate::messages::{Message, UnsubscribeToken};
    pub use crate::policy::{WriteFailurePolicy, WritePhase};
    pub use crate::query::{Filter, Query};
    pub use crate::router::{BinderToken, ComponentDelta, DeltaKind};
    pub use crate::scheduler::{Group, OrderConstraints, System};
    pub use crate::snapshot::SnapshotRegistry;
    pub use crate::storage::{HashMapPool, Pool, VecPool};
    pub use crate::world::World;

    #[cfg(feature = "derive")]
    pub use ecs_core_derive::{Component, Message};
}
