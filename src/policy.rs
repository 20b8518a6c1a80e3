//! Write policy: phase-gated permissions, validators, and the
//! write-failure sink (spec §4.4).
//!
//! Grounded on the teacher's `storage::Gate` / `RestrictedStorage` pattern
//! (components wrapped so reads and writes are checked against a
//! `System::Accessor` at borrow time) — generalized here to a single table
//! of phase permissions consulted explicitly at every structural/value
//! mutation site, since this spec's phases are a flat scheduler-wide state
//! rather than a per-system static accessor set.

use std::any::{Any, TypeId};

use log::{error, warn};

use crate::entity::Entity;
use crate::error::{Error, Result};

/// The phase the scheduler is currently in, set once per sub-step (§4.8).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WritePhase {
    FrameInput,
    FrameSync,
    Simulation,
    FrameView,
    FrameUI,
    /// Outside any scheduler-driven phase (e.g. before the first
    /// `begin_frame`, or after `World` teardown begins).
    Neutral,
}

impl WritePhase {
    fn permissions(self) -> (bool, bool) {
        match self {
            WritePhase::FrameInput => (true, true),
            WritePhase::FrameSync => (false, true),
            WritePhase::Simulation => (true, true),
            WritePhase::FrameView => (false, true),
            WritePhase::FrameUI => (false, false),
            WritePhase::Neutral => (false, false),
        }
    }

    fn structural_allowed(self) -> bool {
        self.permissions().0
    }

    fn value_allowed(self) -> bool {
        self.permissions().1
    }

    fn name(self) -> &'static str {
        match self {
            WritePhase::FrameInput => "FrameInput",
            WritePhase::FrameSync => "FrameSync",
            WritePhase::Simulation => "Simulation",
            WritePhase::FrameView => "FrameView",
            WritePhase::FrameUI => "FrameUI",
            WritePhase::Neutral => "Neutral",
        }
    }
}

/// What happens when a write is denied (§4.4, reused by `WorldConfig`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum WriteFailurePolicy {
    /// Returns `Err(Error::PhaseDenied | PermissionDenied | ValidationFailed)`.
    #[default]
    Throw,
    /// Logs at `error!` and returns `Ok(false)`/a no-op.
    Log,
    /// Silently returns `false`/a no-op.
    Silent,
}

type PermissionPredicate = Box<dyn Fn(Entity, TypeId) -> bool + Send + Sync>;
type ObjectValidator = Box<dyn Fn(&dyn Any) -> bool + Send + Sync>;
type TypedValidatorBox = Box<dyn Any + Send + Sync>;

/// The mutable write-permission state of a world: current phase, an
/// optional deny-all guard (installed during `FrameUI`), registered
/// permission predicates, and per-type validators.
pub struct WritePolicy {
    phase: WritePhase,
    deny_all: bool,
    failure_policy: WriteFailurePolicy,
    permission_predicates: Vec<PermissionPredicate>,
    typed_validators: std::collections::HashMap<TypeId, TypedValidatorBox>,
    object_validators: std::collections::HashMap<TypeId, ObjectValidator>,
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy {
            phase: WritePhase::Neutral,
            deny_all: false,
            failure_policy: WriteFailurePolicy::default(),
            permission_predicates: Vec::new(),
            typed_validators: std::collections::HashMap::new(),
            object_validators: std::collections::HashMap::new(),
        }
    }
}

impl WritePolicy {
    pub fn with_failure_policy(failure_policy: WriteFailurePolicy) -> Self {
        WritePolicy {
            failure_policy,
            ..Default::default()
        }
    }

    pub fn set_phase(&mut self, phase: WritePhase) {
        self.phase = phase;
    }

    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    /// Installs the `FrameUI` deny-all write guard (§4.4).
    pub fn install_deny_all(&mut self) {
        self.deny_all = true;
    }

    pub fn remove_deny_all(&mut self) {
        self.deny_all = false;
    }

    /// Registers a permission predicate consulted on every structural or
    /// value mutation; all registered predicates must accept.
    pub fn register_permission(&mut self, predicate: PermissionPredicate) {
        self.permission_predicates.push(predicate);
    }

    /// Registers an object-level validator for a component type, consulted
    /// after any typed validator (§4.4 step 4).
    pub fn register_object_validator(&mut self, type_id: TypeId, validator: ObjectValidator) {
        self.object_validators.insert(type_id, validator);
    }

    /// Registers the typed validator for `T` (§4.4 step 3), consulted by
    /// `check_value::<T>` before the object validator. Replaces any
    /// previously registered typed validator for `T`.
    pub fn register_typed_validator<T: 'static>(&mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) {
        let boxed: Box<dyn Fn(&T) -> bool + Send + Sync> = Box::new(validator);
        self.typed_validators.insert(TypeId::of::<T>(), Box::new(boxed));
    }

    fn typed_validator<T: 'static>(&self) -> Option<&(dyn Fn(&T) -> bool + Send + Sync)> {
        self.typed_validators
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<Box<dyn Fn(&T) -> bool + Send + Sync>>())
            .map(|boxed| boxed.as_ref())
    }

    fn permission_check(&self, entity: Entity, type_id: TypeId) -> bool {
        self.permission_predicates
            .iter()
            .all(|pred| pred(entity, type_id))
    }

    fn object_validation(&self, type_id: TypeId, value: &dyn Any) -> bool {
        self.object_validators
            .get(&type_id)
            .map(|v| v(value))
            .unwrap_or(true)
    }

    /// Checks whether a structural mutation (add/remove) is permitted,
    /// consulting the phase gate then the permission predicates.
    ///
    /// `Ok(true)` means the write is allowed and must proceed. `Ok(false)`
    /// means the write was denied but `failure_policy` is `Log`/`Silent`, so
    /// the caller must still skip the mutation and delta dispatch without
    /// surfacing an error. `Err` means the write was denied under `Throw`.
    pub fn check_structural(&self, entity: Entity, type_id: TypeId, type_name: &'static str) -> Result<bool> {
        if self.deny_all || !self.phase.structural_allowed() {
            return self.handle_denied(Error::PhaseDenied(self.phase.name()));
        }
        if !self.permission_check(entity, type_id) {
            return self.handle_denied(Error::PermissionDenied { entity, type_name });
        }
        Ok(true)
    }

    /// Checks whether a value mutation (replace) is permitted, additionally
    /// running `T`'s registered typed validator (if any) then the object
    /// validator. See `check_structural` for the meaning of the returned
    /// `bool`.
    pub fn check_value<T: 'static>(&self, entity: Entity, value: &T, type_name: &'static str) -> Result<bool> {
        let type_id = TypeId::of::<T>();
        if self.deny_all || !self.phase.value_allowed() {
            return self.handle_denied(Error::PhaseDenied(self.phase.name()));
        }
        if !self.permission_check(entity, type_id) {
            return self.handle_denied(Error::PermissionDenied { entity, type_name });
        }
        if let Some(validator) = self.typed_validator::<T>() {
            if !validator(value) {
                return self.handle_denied(Error::ValidationFailed { entity, type_name });
            }
        }
        if !self.object_validation(type_id, value as &dyn Any) {
            return self.handle_denied(Error::ValidationFailed { entity, type_name });
        }
        Ok(true)
    }

    /// Like `check_value`, but for boxed/dynamic values at an adapter
    /// boundary (command buffer replay, editor tools) where the static
    /// type isn't known to the caller — so only the object validator runs,
    /// never a typed one. See `check_structural` for the meaning of the
    /// returned `bool`.
    pub fn check_value_boxed(
        &self,
        entity: Entity,
        type_id: TypeId,
        value: &dyn Any,
        type_name: &'static str,
    ) -> Result<bool> {
        if self.deny_all || !self.phase.value_allowed() {
            return self.handle_denied(Error::PhaseDenied(self.phase.name()));
        }
        if !self.permission_check(entity, type_id) {
            return self.handle_denied(Error::PermissionDenied { entity, type_name });
        }
        if !self.object_validation(type_id, value) {
            return self.handle_denied(Error::ValidationFailed { entity, type_name });
        }
        Ok(true)
    }

    /// The single denial sink (§4.4). The write is always denied by the
    /// time this is called; what varies is whether that denial becomes an
    /// `Err` (`Throw`) or a logged/silent `Ok(false)` (`Log`/`Silent`) — in
    /// every case the caller must treat the write as not having happened.
    fn handle_denied(&self, reason: Error) -> Result<bool> {
        match self.failure_policy {
            WriteFailurePolicy::Throw => Err(reason),
            WriteFailurePolicy::Log => {
                error!("write denied: {reason}");
                Ok(false)
            }
            WriteFailurePolicy::Silent => Ok(false),
        }
    }
}

/// Convenience used by callers that want a warning instead of silent
/// success when a write is denied under `Log`/`Silent` but the caller still
/// needs to know whether the mutation actually happened.
pub fn warn_on_denied(result: &Result<bool>, context: &str) -> bool {
    match result {
        Ok(allowed) => *allowed,
        Err(e) => {
            warn!("{context}: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ui_denies_structural_and_value() {
        let mut policy = WritePolicy::default();
        policy.set_phase(WritePhase::FrameUI);
        let e = Entity::from_raw(0, 0);
        assert!(policy
            .check_structural(e, TypeId::of::<()>(), "Unit")
            .is_err());
        assert!(policy.check_value(e, &1i32, "i32").is_err());
    }

    #[test]
    fn frame_sync_allows_value_denies_structural() {
        let mut policy = WritePolicy::default();
        policy.set_phase(WritePhase::FrameSync);
        let e = Entity::from_raw(0, 0);
        assert!(policy
            .check_structural(e, TypeId::of::<()>(), "Unit")
            .is_err());
        assert_eq!(policy.check_value(e, &1i32, "i32").unwrap(), true);
    }

    #[test]
    fn deny_all_guard_overrides_simulation_phase() {
        let mut policy = WritePolicy::default();
        policy.set_phase(WritePhase::Simulation);
        policy.install_deny_all();
        let e = Entity::from_raw(0, 0);
        assert!(policy.check_value(e, &1i32, "i32").is_err());
    }

    /// Under `Silent`, a denied write must still report "not allowed" so
    /// the caller skips the mutation — it may never surface as an `Err`,
    /// but `Ok(true)` would be indistinguishable from a permitted write.
    #[test]
    fn silent_policy_reports_denial_without_erroring() {
        let mut policy = WritePolicy::with_failure_policy(WriteFailurePolicy::Silent);
        policy.set_phase(WritePhase::FrameUI);
        let e = Entity::from_raw(0, 0);
        assert_eq!(policy.check_value(e, &1i32, "i32").unwrap(), false);
    }

    /// Same as above for `Log`: no `Err`, but the bool still says "denied".
    #[test]
    fn log_policy_reports_denial_without_erroring() {
        let mut policy = WritePolicy::with_failure_policy(WriteFailurePolicy::Log);
        policy.set_phase(WritePhase::FrameUI);
        let e = Entity::from_raw(0, 0);
        assert_eq!(policy.check_value(e, &1i32, "i32").unwrap(), false);
    }

    #[test]
    fn typed_validator_rejects_value() {
        let mut policy = WritePolicy::default();
        policy.set_phase(WritePhase::Simulation);
        policy.register_typed_validator::<i32>(|v| *v > 0);
        let e = Entity::from_raw(0, 0);
        assert!(matches!(
            policy.check_value(e, &-1i32, "i32"),
            Err(Error::ValidationFailed { .. })
        ));
        assert_eq!(policy.check_value(e, &1i32, "i32").unwrap(), true);
    }

    #[test]
    fn object_validator_rejects_boxed_value() {
        let mut policy = WritePolicy::default();
        policy.set_phase(WritePhase::Simulation);
        policy.register_object_validator(
            TypeId::of::<i32>(),
            Box::new(|v: &dyn Any| *v.downcast_ref::<i32>().unwrap() != 13),
        );
        let e = Entity::from_raw(0, 0);
        assert!(matches!(
            policy.check_value_boxed(e, TypeId::of::<i32>(), &13i32, "i32"),
            Err(Error::ValidationFailed { .. })
        ));
        assert_eq!(
            policy
                .check_value_boxed(e, TypeId::of::<i32>(), &7i32, "i32")
                .unwrap(),
            true
        );
    }

    #[test]
    fn permission_predicate_denies_structural_write() {
        let mut policy = WritePolicy::default();
        policy.set_phase(WritePhase::Simulation);
        let denied_entity = Entity::from_raw(1, 0);
        policy.register_permission(Box::new(move |entity, _type_id| entity != denied_entity));
        assert_eq!(
            policy
                .check_structural(Entity::from_raw(0, 0), TypeId::of::<i32>(), "i32")
                .unwrap(),
            true
        );
        assert!(matches!(
            policy.check_structural(denied_entity, TypeId::of::<i32>(), "i32"),
            Err(Error::PermissionDenied { .. })
        ));
    }
}
