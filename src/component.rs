//! The `Component` contract (spec §6: "components are plain value types
//! with stable serializable fields").

use crate::storage::Pool;

/// A plain value type that can be attached to an entity.
///
/// Implemented by hand or via `#[derive(Component)]`, which mirrors the
/// teacher's own derive (`#[component(HashMapStorage)]` becomes
/// `#[component(storage = "HashMapPool")]` here) and additionally supports
/// `#[component(singleton)]` to set `IS_SINGLETON`.
pub trait Component: Sized + Send + Sync + 'static {
    /// The pool type used to store this component. Defaults to `VecPool`
    /// when derived without a `storage` attribute.
    type Storage: Pool<Item = Self>;

    /// Whether at most one entity may own this component type at a time
    /// (spec §3, Singleton index).
    const IS_SINGLETON: bool = false;
}
