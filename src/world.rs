//! The world composite (spec §3, §4.9's per-world half, §4.8's phase
//! orchestration).
//!
//! Grounded on the teacher's `world::World`/`world::Builder`: there, a
//! `Resources` map of `TypeId -> Box<dyn Resource>` holding storages
//! fetched generically by systems through `SystemData`; here, the
//! repository, scheduler, bus, router, and command worker are named
//! fields rather than resources, since this spec has no generic
//! resource-injection layer to route through. `dispose`'s reverse-order
//! teardown is new (the teacher has no equivalent — `World` just drops),
//! grounded on the data model's explicit teardown order (§3).

use std::any::{Any, TypeId};
use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::command::{
    external_command_flush_to_internal, CommandBuffer, CommandSink, CommandWorker,
    ExternalCommandQueue, WriteSession,
};
use crate::component::Component;
use crate::config::WorldConfig;
use crate::entity::{Entity, EntityAllocator};
use crate::error::{Error, Result};
use crate::messages::{Message, MessageBus, UnsubscribeToken};
use crate::policy::{WriteFailurePolicy, WritePhase, WritePolicy};
use crate::query::{Filter, Query, QueryTuple};
use crate::repository::PoolRepository;
use crate::router::{BinderToken, BindingRouter, ComponentDelta, DeltaKind};
use crate::scheduler::{Group, OrderConstraints, Scheduler, System};
use crate::snapshot::{self, SnapshotRegistry};
use crate::storage::Pool;

/// A single isolated simulation: entities, component pools, the system
/// scheduler, the message bus, the binding router, a singleton index, and
/// write-policy state, all under one scope id (§3).
pub struct World {
    alloc: EntityAllocator,
    repo: PoolRepository,
    scheduler: Scheduler,
    bus: MessageBus,
    router: BindingRouter,
    command_worker: CommandWorker,
    external_commands: ExternalCommandQueue,
    policy: WritePolicy,
    singletons: HashMap<TypeId, Entity>,
    config: WorldConfig,
    name: Option<String>,
    tags: Vec<String>,
    scope_id: Uuid,
    accumulator: f64,
    fixed_frame_count: u64,
    total_simulated_seconds: f64,
    disposed: bool,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        World::with_identity(config, None, Vec::new(), Uuid::new_v4())
    }

    pub fn with_identity(config: WorldConfig, name: Option<String>, tags: Vec<String>, scope_id: Uuid) -> Self {
        World {
            alloc: EntityAllocator::with_capacity(config.initial_entity_capacity),
            repo: PoolRepository::default(),
            scheduler: Scheduler::default(),
            bus: MessageBus::default(),
            router: BindingRouter::with_binder_capacity(config.initial_binder_buckets),
            command_worker: CommandWorker::default(),
            external_commands: ExternalCommandQueue::default(),
            policy: WritePolicy::with_failure_policy(config.write_failure_policy),
            singletons: HashMap::new(),
            config,
            name,
            tags,
            scope_id,
            accumulator: 0.0,
            fixed_frame_count: 0,
            total_simulated_seconds: 0.0,
            disposed: false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn scope_id(&self) -> Uuid {
        self.scope_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn phase(&self) -> WritePhase {
        self.policy.phase()
    }

    pub fn fixed_frame_count(&self) -> u64 {
        self.fixed_frame_count
    }

    pub fn total_simulated_seconds(&self) -> f64 {
        self.total_simulated_seconds
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed {
            Err(Error::WorldDisposed)
        } else {
            Ok(())
        }
    }

    /// Rejects stale handles — an id that is either unknown or whose
    /// generation has since moved on (§7 `InvalidHandle`: "entity id valid
    /// but generation mismatched, treated as dead"). Structural and value
    /// mutations check this before touching any pool, since pools are keyed
    /// by bare `Index` and would otherwise silently apply a stale write to
    /// whatever live entity has since recycled that id.
    fn check_alive(&self, e: Entity) -> Result<()> {
        if self.alloc.is_alive(e) {
            Ok(())
        } else {
            Err(Error::InvalidHandle {
                entity: e,
                current: self.alloc.current_generation(e.id()),
            })
        }
    }

    // ---- entities -----------------------------------------------------

    pub fn create_entity(&mut self) -> Result<Entity> {
        self.ensure_active()?;
        Ok(self.alloc.create_entity())
    }

    /// Destroys `e`, fanning the removal out to every pool, the singleton
    /// index, and the router's per-entity binders. No-op (returns `false`)
    /// if already dead.
    pub fn destroy_entity(&mut self, e: Entity) -> bool {
        if !self.alloc.destroy_entity(e) {
            return false;
        }
        self.repo.remove_entity(e);
        self.singletons.retain(|_, &mut owner| owner != e);
        self.router.detach_entity(e);
        true
    }

    pub fn is_alive(&self, e: Entity) -> bool {
        self.alloc.is_alive(e)
    }

    pub fn alive_count(&self) -> usize {
        self.alloc.alive_count()
    }

    pub fn all_entities(&self) -> Vec<Entity> {
        self.alloc.all_entities()
    }

    /// Clears alive bits and every pool; if `keep_capacity` is false,
    /// backing arrays are rebuilt from scratch. Every previously issued
    /// handle becomes invalid either way (§4.1).
    pub fn reset(&mut self, keep_capacity: bool) {
        for entity in self.alloc.all_entities() {
            self.router.detach_entity(entity);
        }
        self.alloc.reset(keep_capacity);
        self.repo.clear_all_pools();
        self.singletons.clear();
    }

    // ---- components -----------------------------------------------------

    /// Registers `T`'s pool factory and applies any
    /// `initial_pool_buckets` capacity hint for it.
    pub fn register_component<T: Component>(&mut self) {
        self.repo.register::<T>();
        if let Some(&capacity) = self.config.initial_pool_buckets.get(&TypeId::of::<T>()) {
            if capacity > 0 {
                self.repo.pool_mut::<T>().ensure_capacity(capacity - 1);
            }
        }
    }

    /// Attaches `value` to `e`. Fails the singleton invariant if `T` is
    /// tagged singleton and already owned by a different live entity
    /// (always an error, regardless of write-failure policy, per §7).
    pub fn add<T: Component>(&mut self, e: Entity, value: T) -> Result<()> {
        self.ensure_active()?;
        self.check_alive(e)?;
        let type_name = std::any::type_name::<T>();
        if !self.policy.check_structural(e, TypeId::of::<T>(), type_name)? {
            return Ok(());
        }
        self.enforce_singleton::<T>(e)?;
        self.repo.pool_mut::<T>().insert(e.id(), value);
        self.dispatch_delta::<T>(e, DeltaKind::Added);
        Ok(())
    }

    /// Overwrites the value of an already-present component. Returns
    /// `MissingComponent` if `T` isn't present on `e`.
    pub fn replace<T: Component>(&mut self, e: Entity, value: T) -> Result<()> {
        self.ensure_active()?;
        self.check_alive(e)?;
        let type_name = std::any::type_name::<T>();
        if !self.repo.try_pool::<T>().is_some_and(|p| p.has(e.id())) {
            return Err(Error::MissingComponent { entity: e, type_name });
        }
        if !self.policy.check_value(e, &value, type_name)? {
            return Ok(());
        }
        self.repo.pool_mut::<T>().insert(e.id(), value);
        self.dispatch_delta::<T>(e, DeltaKind::Changed);
        Ok(())
    }

    pub fn remove<T: Component>(&mut self, e: Entity) -> Result<()> {
        self.ensure_active()?;
        self.check_alive(e)?;
        let type_name = std::any::type_name::<T>();
        if !self.policy.check_structural(e, TypeId::of::<T>(), type_name)? {
            return Ok(());
        }
        if let Some(pool) = self.repo.try_pool_mut::<T>() {
            pool.remove(e.id(), true);
        }
        if T::IS_SINGLETON {
            self.singletons.remove(&TypeId::of::<T>());
        }
        self.dispatch_delta::<T>(e, DeltaKind::Removed);
        Ok(())
    }

    pub fn get<T: Component>(&self, e: Entity) -> Option<&T> {
        self.repo.try_pool::<T>().and_then(|p| p.get(e.id()))
    }

    pub fn has<T: Component>(&self, e: Entity) -> bool {
        self.repo.try_pool::<T>().is_some_and(|p| p.has(e.id()))
    }

    pub fn ref_existing<T: Component>(&self, e: Entity) -> Result<&T> {
        self.check_alive(e)?;
        self.get::<T>(e).ok_or(Error::MissingComponent {
            entity: e,
            type_name: std::any::type_name::<T>(),
        })
    }

    fn enforce_singleton<T: Component>(&mut self, e: Entity) -> Result<()> {
        if !T::IS_SINGLETON {
            return Ok(());
        }
        let type_id = TypeId::of::<T>();
        if let Some(&owner) = self.singletons.get(&type_id) {
            if owner != e && self.alloc.is_alive(owner) {
                return Err(Error::SingletonViolation {
                    owner,
                    type_name: std::any::type_name::<T>(),
                });
            }
        }
        self.singletons.insert(type_id, e);
        Ok(())
    }

    pub fn set_singleton<T: Component>(&mut self, e: Entity, value: T) -> Result<()> {
        self.add(e, value)
    }

    pub fn remove_singleton<T: Component>(&mut self) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if let Some(owner) = self.singletons.get(&type_id).copied() {
            self.remove::<T>(owner)
        } else {
            Ok(())
        }
    }

    pub fn singleton_owner<T: Component>(&self) -> Option<Entity> {
        self.singletons.get(&TypeId::of::<T>()).copied()
    }

    /// `new_value` is left `None` here even for `Added`/`Changed`: carrying
    /// the value through the delta would need `T: Clone`, which `Component`
    /// doesn't require. Binders that need the current value read it back
    /// through `World::get` using the delta's entity.
    fn dispatch_delta<T: Component>(&mut self, e: Entity, kind: DeltaKind) {
        self.router.dispatch(
            TypeId::of::<T>(),
            ComponentDelta {
                entity: e,
                kind,
                new_value: None,
            },
        );
    }

    // ---- queries --------------------------------------------------------

    pub fn query<Q: QueryTuple>(&self, filter: Filter) -> Option<Query<'_, Q>> {
        Query::new(&self.repo, &self.alloc, filter)
    }

    pub fn process<T: Component>(&mut self, handles: &[Entity], f: impl FnMut(Entity, &mut T)) {
        crate::query::process(handles, &mut self.repo, &self.alloc, f);
    }

    // ---- write policy -----------------------------------------------------

    pub fn set_phase(&mut self, phase: WritePhase) {
        self.policy.set_phase(phase);
    }

    pub fn install_deny_all(&mut self) {
        self.policy.install_deny_all();
    }

    pub fn remove_deny_all(&mut self) {
        self.policy.remove_deny_all();
    }

    pub fn write_failure_policy(&self) -> WriteFailurePolicy {
        self.config.write_failure_policy
    }

    /// Registers a permission predicate (§4.4 step 2), consulted on every
    /// structural and value mutation; all registered predicates must accept
    /// an entity/type pair for the write to proceed. A denial surfaces as
    /// `Error::PermissionDenied` (or is swallowed per `write_failure_policy`).
    pub fn register_permission(&mut self, predicate: impl Fn(Entity, TypeId) -> bool + Send + Sync + 'static) {
        self.policy.register_permission(Box::new(predicate));
    }

    /// Registers `T`'s typed validator (§4.4 step 3), consulted by
    /// `replace::<T>` before the object validator. A rejected value
    /// surfaces as `Error::ValidationFailed`.
    pub fn register_typed_validator<T: Component>(&mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) {
        self.policy.register_typed_validator(validator);
    }

    /// Registers an object-level validator for `type_id` (§4.4 step 4),
    /// consulted on boxed/dynamic values (command-buffer replay, editor
    /// tools) as well as after any typed validator on the static `replace`
    /// path. A rejected value surfaces as `Error::ValidationFailed`.
    pub fn register_object_validator(&mut self, type_id: TypeId, validator: impl Fn(&dyn Any) -> bool + Send + Sync + 'static) {
        self.policy.register_object_validator(type_id, Box::new(validator));
    }

    // ---- messages ---------------------------------------------------------

    pub fn subscribe<M: Message>(&mut self, handler: impl FnMut(&M) + Send + Sync + 'static) -> UnsubscribeToken {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, token: UnsubscribeToken) {
        self.bus.unsubscribe(token);
    }

    pub fn publish<M: Message>(&mut self, value: M) {
        self.bus.publish(value);
    }

    // ---- binding router -----------------------------------------------------

    pub fn bind<M: Component>(&mut self, e: Entity, binder: impl FnMut(&ComponentDelta) + Send + 'static) -> BinderToken {
        self.router.bind(TypeId::of::<M>(), e, binder)
    }

    pub fn unbind(&mut self, token: BinderToken) {
        self.router.unbind(token);
    }

    // ---- command buffer & external queue -----------------------------------

    pub fn begin_write(&mut self) -> WriteSession<'_> {
        self.command_worker.begin_write()
    }

    pub fn schedule_command_buffer(&mut self, buffer: CommandBuffer) {
        self.command_worker.schedule(buffer);
    }

    pub fn external_commands(&self) -> &ExternalCommandQueue {
        &self.external_commands
    }

    fn run_scheduled_jobs(&mut self) -> usize {
        let mut worker = std::mem::take(&mut self.command_worker);
        let count = worker.run_scheduled_jobs(self);
        self.command_worker = worker;
        count
    }

    fn flush_external_commands(&mut self) -> usize {
        let external = std::mem::take(&mut self.external_commands);
        let mut worker = std::mem::take(&mut self.command_worker);
        let moved = external_command_flush_to_internal(&external, &mut worker);
        self.external_commands = external;
        self.command_worker = worker;
        moved
    }

    // ---- scheduler ----------------------------------------------------------

    pub fn add_system(&mut self, system: Box<dyn System>, constraints: OrderConstraints) {
        self.scheduler.add_system(system, constraints);
    }

    pub fn remove_system(&mut self, name: &str) {
        self.scheduler.remove_system(name);
    }

    fn run_scheduler_step(&mut self, f: impl FnOnce(&mut Scheduler, &mut World)) {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        f(&mut scheduler, self);
        self.scheduler = scheduler;
    }

    // ---- frame orchestration (§4.8) ----------------------------------------

    /// Step 1: applies pending system add/remove, pumps the message bus,
    /// then runs `FrameInput` and `FrameSync`, flushing scheduled jobs as a
    /// barrier between them.
    pub fn begin_frame(&mut self, _dt: f64) {
        self.run_scheduler_step(|scheduler, world| scheduler.apply_pending_and_build_plan(world));
        self.bus.pump_all();

        self.policy.set_phase(WritePhase::FrameInput);
        self.run_scheduler_step(|scheduler, world| scheduler.run_group(Group::FrameInput, world, _dt));
        self.run_scheduled_jobs();

        self.policy.set_phase(WritePhase::FrameSync);
        self.run_scheduler_step(|scheduler, world| scheduler.run_group(Group::FrameSync, world, _dt));
        self.run_scheduled_jobs();
    }

    /// Step 2: enters `Simulation`, drains the external command queue, then
    /// runs the four fixed groups in order with a job-flush barrier after
    /// each.
    pub fn fixed_step(&mut self, h: f64) {
        self.policy.set_phase(WritePhase::Simulation);
        self.flush_external_commands();
        self.run_scheduled_jobs();

        for group in [
            Group::FixedInput,
            Group::FixedDecision,
            Group::FixedSimulation,
            Group::FixedPost,
        ] {
            self.run_scheduler_step(|scheduler, world| scheduler.run_group(group, world, h));
            self.run_scheduled_jobs();
        }

        self.fixed_frame_count += 1;
        self.total_simulated_seconds += h;
    }

    /// Step 3: runs `FrameView`, then installs the `FrameUI` deny-all guard
    /// and runs `FrameUI`, then flushes the binding router and clears the
    /// phase.
    pub fn late_frame(&mut self, alpha: f64) {
        self.policy.set_phase(WritePhase::FrameView);
        self.run_scheduler_step(|scheduler, world| scheduler.run_group(Group::FrameView, world, alpha));
        self.run_scheduled_jobs();

        self.policy.install_deny_all();
        self.policy.set_phase(WritePhase::FrameUI);
        self.run_scheduler_step(|scheduler, world| scheduler.run_group(Group::FrameUI, world, alpha));

        self.router.apply_all();

        self.policy.set_phase(WritePhase::Neutral);
        self.policy.remove_deny_all();
    }

    /// `begin_frame(dt); while acc >= h && n < max: fixed_step(h); acc -= h;
    /// n += 1; late_frame(acc/h clamped to [0,1])`. Residual accumulator
    /// beyond `max_substeps * h` is carried forward rather than spiking the
    /// simulation (§4.8).
    pub fn pump_and_late_frame(&mut self, dt: f64, h: f64, max_substeps: u32) {
        self.begin_frame(dt);
        self.accumulator += dt;

        let mut n = 0;
        while self.accumulator >= h && n < max_substeps {
            self.fixed_step(h);
            self.accumulator -= h;
            n += 1;
        }

        let cap = h * max_substeps as f64;
        if self.accumulator > cap {
            self.accumulator = cap;
        }

        let alpha = if h > 0.0 {
            (self.accumulator / h).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.late_frame(alpha);
    }

    // ---- snapshot I/O (§6) --------------------------------------------------

    /// Writes every alive entity's allocator state plus every registered-
    /// formatter component's data to `writer`. Fails loudly
    /// (`Error::SnapshotFormat`) if a present component type has no
    /// registered formatter in `registry`.
    pub fn save_full_snapshot(&self, writer: &mut dyn std::io::Write, registry: &SnapshotRegistry) -> Result<()> {
        snapshot::write_header(writer).map_err(io_err)?;

        snapshot::write_u32(writer, self.alloc.next_id()).map_err(io_err)?;
        let generations = self.alloc.generations();
        snapshot::write_u32(writer, generations.len() as u32).map_err(io_err)?;
        for g in generations {
            snapshot::write_u16(writer, g.value()).map_err(io_err)?;
        }
        let free_ids = self.alloc.free_ids();
        snapshot::write_u32(writer, free_ids.len() as u32).map_err(io_err)?;
        for &id in free_ids {
            snapshot::write_u32(writer, id).map_err(io_err)?;
        }
        let alive = self.alloc.all_entities();
        snapshot::write_u32(writer, alive.len() as u32).map_err(io_err)?;
        for e in &alive {
            snapshot::write_u32(writer, e.id()).map_err(io_err)?;
        }

        let type_ids: Vec<TypeId> = self.repo.iter_type_ids().collect();
        snapshot::write_u32(writer, type_ids.len() as u32).map_err(io_err)?;
        for type_id in type_ids {
            let pool = self.repo.pool_by_type(type_id).expect("type id came from iter_type_ids");
            let (type_name, serialize) = snapshot::formatter_for(registry, type_id).ok_or_else(|| {
                Error::SnapshotFormat(format!(
                    "no formatter registered for {}",
                    self.repo.type_name_of(type_id)
                ))
            })?;
            snapshot::write_str(writer, type_name).map_err(io_err)?;

            snapshot::write_u32(writer, pool.count_dyn() as u32).map_err(io_err)?;
            for id in pool.enumerate_ids_dyn() {
                let value = pool.get_boxed(id).expect("id came from enumerate_ids_dyn");
                let bytes = serialize(value);
                let generation = self.alloc.entity_at(id).map(|e| e.generation().value()).unwrap_or(0);
                snapshot::write_u32(writer, id).map_err(io_err)?;
                snapshot::write_u16(writer, generation).map_err(io_err)?;
                snapshot::write_bytes(writer, &bytes).map_err(io_err)?;
            }
        }

        Ok(())
    }

    /// Clears the world, then restores entity ids/generations/free list and
    /// every component section against its registered formatter, finally
    /// running `registry`'s migrations in ascending order (§6).
    pub fn load_full_snapshot(&mut self, reader: &mut dyn std::io::Read, registry: &SnapshotRegistry) -> Result<()> {
        let version = snapshot::read_header(reader)?;
        if version != 1 {
            return Err(Error::SnapshotFormat(format!("unsupported snapshot version {version}")));
        }

        self.reset(false);

        let next_id = snapshot::read_u32(reader)?;
        let generations_len = snapshot::read_u32(reader)? as usize;
        let mut generations = Vec::with_capacity(generations_len);
        for _ in 0..generations_len {
            generations.push(crate::entity::Generation(snapshot::read_u16(reader)?));
        }
        let free_len = snapshot::read_u32(reader)? as usize;
        let mut free_ids = Vec::with_capacity(free_len);
        for _ in 0..free_len {
            free_ids.push(snapshot::read_u32(reader)?);
        }
        let alive_len = snapshot::read_u32(reader)? as usize;
        let mut alive_ids = Vec::with_capacity(alive_len);
        for _ in 0..alive_len {
            alive_ids.push(snapshot::read_u32(reader)?);
        }
        self.alloc.restore_raw(next_id, generations, free_ids, alive_ids);

        let type_count = snapshot::read_u32(reader)?;
        for _ in 0..type_count {
            let type_name = snapshot::read_str(reader)?;
            let (type_id, deserialize) = snapshot::deserializer_for(registry, &type_name)
                .ok_or_else(|| Error::SnapshotFormat(format!("no formatter registered for {type_name}")))?;
            if !self.repo.has_factory(type_id) {
                return Err(Error::SnapshotFormat(format!(
                    "component type {type_name} was never registered with this world"
                )));
            }
            let is_singleton = self.repo.is_singleton(type_id);

            let entity_count = snapshot::read_u32(reader)?;
            for _ in 0..entity_count {
                let id = snapshot::read_u32(reader)?;
                let generation = snapshot::read_u16(reader)?;
                let bytes = snapshot::read_bytes(reader)?;
                let value = deserialize(&bytes);

                let pool = self.repo.get_or_create_by_type(type_id);
                pool.set_boxed(id, value);

                if is_singleton {
                    self.singletons.insert(type_id, Entity::from_raw(id, generation));
                }
            }
        }

        snapshot::run_migrations(registry, self);
        Ok(())
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Reverse-order teardown (§3): systems shut down, the router is
    /// cleared, the bus is cleared, pools are dropped. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!("disposing world {}", self.scope_id);
        self.run_scheduler_step(|scheduler, world| scheduler.shutdown_all(world));
        self.router = BindingRouter::default();
        self.bus = MessageBus::default();
        self.repo = PoolRepository::default();
        self.disposed = true;
    }
}

impl CommandSink for World {
    fn destroy_entity(&mut self, entity: Entity) {
        World::destroy_entity(self, entity);
    }

    fn add_boxed(&mut self, entity: Entity, type_id: TypeId, type_name: &'static str, value: Box<dyn Any + Send>) {
        if !self.alloc.is_alive(entity) {
            return;
        }
        if !matches!(self.policy.check_structural(entity, type_id, type_name), Ok(true)) {
            return;
        }
        if self.repo.is_singleton(type_id) {
            if let Some(&owner) = self.singletons.get(&type_id) {
                if owner != entity && self.alloc.is_alive(owner) {
                    return;
                }
            }
            self.singletons.insert(type_id, entity);
        }
        let pool = self.repo.get_or_create_by_type(type_id);
        pool.set_boxed(entity.id(), value);
        self.router.dispatch(
            type_id,
            ComponentDelta {
                entity,
                kind: DeltaKind::Added,
                new_value: None,
            },
        );
    }

    fn replace_boxed(&mut self, entity: Entity, type_id: TypeId, type_name: &'static str, value: Box<dyn Any + Send>) {
        if !self.alloc.is_alive(entity) {
            return;
        }
        if !matches!(self.policy.check_value_boxed(entity, type_id, value.as_ref(), type_name), Ok(true)) {
            return;
        }
        let pool = self.repo.get_or_create_by_type(type_id);
        pool.set_boxed(entity.id(), value);
        self.router.dispatch(
            type_id,
            ComponentDelta {
                entity,
                kind: DeltaKind::Changed,
                new_value: None,
            },
        );
    }

    fn remove_boxed(&mut self, entity: Entity, type_id: TypeId) {
        if !self.alloc.is_alive(entity) {
            return;
        }
        if !matches!(self.policy.check_structural(entity, type_id, "<boxed>"), Ok(true)) {
            return;
        }
        if let Some(pool) = self.repo.pool_by_type_mut(type_id) {
            pool.remove_dyn(entity.id());
        }
        if self.repo.is_singleton(type_id) {
            self.singletons.remove(&type_id);
        }
        self.router.dispatch(
            type_id,
            ComponentDelta {
                entity,
                kind: DeltaKind::Removed,
                new_value: None,
            },
        );
    }

    fn set_singleton_boxed(&mut self, type_id: TypeId, type_name: &'static str, entity: Entity, value: Box<dyn Any + Send>) {
        self.add_boxed(entity, type_id, type_name, value);
    }

    fn remove_singleton(&mut self, type_id: TypeId) {
        if let Some(owner) = self.singletons.get(&type_id).copied() {
            self.remove_boxed(owner, type_id);
        }
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::SnapshotFormat(format!("io error: {e}"))
}
