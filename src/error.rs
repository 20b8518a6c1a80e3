//! Error kinds for `ecs_core`.
//!
//! The teacher (`specs`) hand-rolls `Display`/`std::error::Error` impls for
//! its small error surface (`error.rs`). This repo's error surface is wider
//! (write-policy denials, snapshot format failures, kernel bookkeeping), so
//! it borrows `thiserror` from the example pack's `legion_core` crate
//! instead of hand-writing the same boilerplate many times over.

use crate::entity::{Entity, Generation};

/// A single error type covering every fallible operation in `ecs_core`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation attempted on a disposed kernel or world.
    #[error("world or kernel is disposed")]
    WorldDisposed,

    /// A structural or value write was attempted outside the phase that
    /// permits it.
    #[error("write denied: {0} is not permitted during the current phase")]
    PhaseDenied(&'static str),

    /// A registered write-permission predicate rejected the write.
    #[error("write denied: permission predicate rejected entity {entity:?} component {type_name}")]
    PermissionDenied {
        /// The entity the write targeted.
        entity: Entity,
        /// The human-readable name of the component type involved.
        type_name: &'static str,
    },

    /// A typed or object validator rejected the value being written.
    #[error("write denied: validation failed for entity {entity:?} component {type_name}")]
    ValidationFailed {
        /// The entity the write targeted.
        entity: Entity,
        /// The human-readable name of the component type involved.
        type_name: &'static str,
    },

    /// Attempted to give a singleton-tagged component to a second entity.
    #[error("singleton violation: {type_name} is already owned by {owner:?}")]
    SingletonViolation {
        /// The entity that already owns the singleton.
        owner: Entity,
        /// The human-readable name of the singleton component type.
        type_name: &'static str,
    },

    /// `ref_existing` (or an equivalent required lookup) found no component.
    #[error("missing component {type_name} on entity {entity:?}")]
    MissingComponent {
        /// The entity that was queried.
        entity: Entity,
        /// The human-readable name of the missing component type.
        type_name: &'static str,
    },

    /// The entity id is known but the generation does not match; treated as
    /// dead.
    #[error("invalid handle: {entity:?}, current generation is {current:?}")]
    InvalidHandle {
        /// The stale handle that was passed in.
        entity: Entity,
        /// The entity slot's current generation.
        current: Generation,
    },

    /// Kernel creation was asked to reuse an id already registered.
    #[error("duplicate world id")]
    DuplicateWorldId,

    /// Snapshot magic header mismatch, or a present component type has no
    /// registered formatter.
    #[error("snapshot format error: {0}")]
    SnapshotFormat(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
