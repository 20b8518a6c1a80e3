//! Command buffer, worker, and external command queue (spec §4.7).
//!
//! Grounded on the teacher's `world::lazy::LazyUpdate`/`LazyBuilder`: there,
//! deferred work is a queue of boxed `FnOnce(&mut World)` closures drained
//! by `maintain`. This spec wants an inspectable tagged union instead of
//! opaque closures (so buffered ops can be logged, snapshotted, or replayed
//! against a `CommandSink` other than the live world), so `CommandOp`
//! replaces the closure while `CommandWorker` keeps the teacher's
//! `SegQueue`-backed FIFO-drain shape (`crossbeam-queue` stands in for the
//! teacher's bare `crossbeam::queue::SegQueue` import).

use std::any::{Any, TypeId};
use std::collections::VecDeque;

use crossbeam_queue::SegQueue;

use crate::entity::Entity;

/// One recorded mutation. `CreateEntity` is recorded for audit/snapshot
/// purposes only — entity allocation itself happens eagerly when the
/// command is recorded (mirroring the teacher's `LazyBuilder`, which calls
/// `Entities::create` immediately and defers only component attachment),
/// so replaying it against a `CommandSink` is a no-op.
pub enum CommandOp {
    CreateEntity(Entity),
    DestroyEntity(Entity),
    Add {
        entity: Entity,
        type_id: TypeId,
        type_name: &'static str,
        value: Box<dyn Any + Send>,
    },
    Replace {
        entity: Entity,
        type_id: TypeId,
        type_name: &'static str,
        value: Box<dyn Any + Send>,
    },
    Remove {
        entity: Entity,
        type_id: TypeId,
    },
    SetSingleton {
        type_id: TypeId,
        type_name: &'static str,
        entity: Entity,
        value: Box<dyn Any + Send>,
    },
    RemoveSingleton {
        type_id: TypeId,
    },
}

/// Anything a `CommandBuffer` can be replayed against: the live `World`, a
/// dry-run recorder, or (in principle) a remote mirror.
pub trait CommandSink {
    fn destroy_entity(&mut self, entity: Entity);
    fn add_boxed(&mut self, entity: Entity, type_id: TypeId, type_name: &'static str, value: Box<dyn Any + Send>);
    fn replace_boxed(&mut self, entity: Entity, type_id: TypeId, type_name: &'static str, value: Box<dyn Any + Send>);
    fn remove_boxed(&mut self, entity: Entity, type_id: TypeId);
    fn set_singleton_boxed(&mut self, type_id: TypeId, type_name: &'static str, entity: Entity, value: Box<dyn Any + Send>);
    fn remove_singleton(&mut self, type_id: TypeId);
}

impl CommandOp {
    fn apply(self, sink: &mut dyn CommandSink) {
        match self {
            CommandOp::CreateEntity(_) => {}
            CommandOp::DestroyEntity(entity) => sink.destroy_entity(entity),
            CommandOp::Add {
                entity,
                type_id,
                type_name,
                value,
            } => sink.add_boxed(entity, type_id, type_name, value),
            CommandOp::Replace {
                entity,
                type_id,
                type_name,
                value,
            } => sink.replace_boxed(entity, type_id, type_name, value),
            CommandOp::Remove { entity, type_id } => sink.remove_boxed(entity, type_id),
            CommandOp::SetSingleton {
                type_id,
                type_name,
                entity,
                value,
            } => sink.set_singleton_boxed(type_id, type_name, entity, value),
            CommandOp::RemoveSingleton { type_id } => sink.remove_singleton(type_id),
        }
    }
}

/// A sequence of recorded operations, applied atomically (in record order)
/// against a `CommandSink` when its turn comes up in `run_scheduled_jobs`.
#[derive(Default)]
pub struct CommandBuffer {
    ops: Vec<CommandOp>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer::default()
    }

    pub fn record_create_entity(&mut self, entity: Entity) {
        self.ops.push(CommandOp::CreateEntity(entity));
    }

    pub fn record_destroy_entity(&mut self, entity: Entity) {
        self.ops.push(CommandOp::DestroyEntity(entity));
    }

    pub fn record_add(&mut self, entity: Entity, type_id: TypeId, type_name: &'static str, value: Box<dyn Any + Send>) {
        self.ops.push(CommandOp::Add {
            entity,
            type_id,
            type_name,
            value,
        });
    }

    pub fn record_replace(&mut self, entity: Entity, type_id: TypeId, type_name: &'static str, value: Box<dyn Any + Send>) {
        self.ops.push(CommandOp::Replace {
            entity,
            type_id,
            type_name,
            value,
        });
    }

    pub fn record_remove(&mut self, entity: Entity, type_id: TypeId) {
        self.ops.push(CommandOp::Remove { entity, type_id });
    }

    pub fn record_set_singleton(&mut self, type_id: TypeId, type_name: &'static str, entity: Entity, value: Box<dyn Any + Send>) {
        self.ops.push(CommandOp::SetSingleton {
            type_id,
            type_name,
            entity,
            value,
        });
    }

    pub fn record_remove_singleton(&mut self, type_id: TypeId) {
        self.ops.push(CommandOp::RemoveSingleton { type_id });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    fn apply(self, sink: &mut dyn CommandSink) {
        for op in self.ops {
            op.apply(sink);
        }
    }
}

/// Guard returned by `CommandWorker::begin_write`. Recorded operations are
/// scheduled on the worker either explicitly via `commit()` or implicitly
/// when the guard is dropped (§4.7: "end-of-scope or explicit").
pub struct WriteSession<'w> {
    buffer: Option<CommandBuffer>,
    worker: &'w mut CommandWorker,
}

impl<'w> WriteSession<'w> {
    pub fn buffer_mut(&mut self) -> &mut CommandBuffer {
        self.buffer.get_or_insert_with(CommandBuffer::new)
    }

    /// Schedules the buffer now, rather than waiting for drop.
    pub fn commit(mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.worker.schedule(buffer);
        }
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.worker.schedule(buffer);
        }
    }
}

/// FIFO of closed command buffers awaiting application. `run_scheduled_jobs`
/// is invoked by the scheduler between phase sub-buckets to create
/// deterministic barriers (§4.7).
#[derive(Default)]
pub struct CommandWorker {
    jobs: VecDeque<CommandBuffer>,
}

impl CommandWorker {
    pub fn begin_write(&mut self) -> WriteSession<'_> {
        WriteSession {
            buffer: Some(CommandBuffer::new()),
            worker: self,
        }
    }

    /// Schedules an already-built buffer directly, skipping the
    /// `begin_write` guard. A buffer with no recorded ops is dropped rather
    /// than scheduled.
    pub fn schedule(&mut self, buffer: CommandBuffer) {
        if !buffer.is_empty() {
            self.jobs.push_back(buffer);
        }
    }

    /// Executes every pending job in FIFO order against `sink`, returning
    /// the number of jobs run. Jobs scheduled by an applied job (e.g. a
    /// command handler that itself opens a write session) run on the next
    /// call, not this one.
    pub fn run_scheduled_jobs(&mut self, sink: &mut dyn CommandSink) -> usize {
        let pending: VecDeque<CommandBuffer> = std::mem::take(&mut self.jobs);
        let count = pending.len();
        for job in pending {
            job.apply(sink);
        }
        count
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }
}

/// Thread-safe queue for commands originating outside the scheduler
/// (editor tools, async tasks). Drained at the start of the `Simulation`
/// phase via `external_command_flush_to_internal` (§4.7).
#[derive(Default)]
pub struct ExternalCommandQueue {
    queue: SegQueue<CommandBuffer>,
}

impl ExternalCommandQueue {
    pub fn push(&self, buffer: CommandBuffer) {
        if !buffer.is_empty() {
            self.queue.push(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Moves every externally queued buffer onto `worker`'s internal FIFO,
/// preserving arrival order. Returns the number of buffers moved.
pub fn external_command_flush_to_internal(external: &ExternalCommandQueue, worker: &mut CommandWorker) -> usize {
    let mut moved = 0;
    while let Some(buffer) = external.queue.pop() {
        worker.schedule(buffer);
        moved += 1;
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Default)]
    struct RecordingSink {
        destroyed: Vec<Entity>,
        added: Vec<Entity>,
    }

    impl CommandSink for RecordingSink {
        fn destroy_entity(&mut self, entity: Entity) {
            self.destroyed.push(entity);
        }
        fn add_boxed(&mut self, entity: Entity, _type_id: TypeId, _type_name: &'static str, _value: Box<dyn Any + Send>) {
            self.added.push(entity);
        }
        fn replace_boxed(&mut self, _entity: Entity, _type_id: TypeId, _type_name: &'static str, _value: Box<dyn Any + Send>) {}
        fn remove_boxed(&mut self, _entity: Entity, _type_id: TypeId) {}
        fn set_singleton_boxed(&mut self, _type_id: TypeId, _type_name: &'static str, _entity: Entity, _value: Box<dyn Any + Send>) {}
        fn remove_singleton(&mut self, _type_id: TypeId) {}
    }

    struct Marker;

    #[test]
    fn write_session_schedules_on_drop() {
        let mut worker = CommandWorker::default();
        {
            let mut session = worker.begin_write();
            session.buffer_mut().record_destroy_entity(Entity::from_raw(1, 0));
        }
        assert_eq!(worker.pending_jobs(), 1);
    }

    #[test]
    fn run_scheduled_jobs_applies_in_fifo_order() {
        let mut worker = CommandWorker::default();
        let e1 = Entity::from_raw(1, 0);
        let e2 = Entity::from_raw(2, 0);

        let mut b1 = CommandBuffer::new();
        b1.record_destroy_entity(e1);
        worker.schedule(b1);

        let mut b2 = CommandBuffer::new();
        b2.record_add(e2, TypeId::of::<Marker>(), "Marker", Box::new(()));
        worker.schedule(b2);

        let mut sink = RecordingSink::default();
        let count = worker.run_scheduled_jobs(&mut sink);

        assert_eq!(count, 2);
        assert_eq!(sink.destroyed, vec![e1]);
        assert_eq!(sink.added, vec![e2]);
    }

    #[test]
    fn empty_buffer_is_not_scheduled() {
        let mut worker = CommandWorker::default();
        worker.schedule(CommandBuffer::new());
        assert_eq!(worker.pending_jobs(), 0);
    }

    #[test]
    fn external_queue_flushes_in_arrival_order() {
        let external = ExternalCommandQueue::default();
        let mut worker = CommandWorker::default();

        let mut b1 = CommandBuffer::new();
        b1.record_destroy_entity(Entity::from_raw(1, 0));
        external.push(b1);

        let mut b2 = CommandBuffer::new();
        b2.record_destroy_entity(Entity::from_raw(2, 0));
        external.push(b2);

        let moved = external_command_flush_to_internal(&external, &mut worker);
        assert_eq!(moved, 2);
        assert_eq!(worker.pending_jobs(), 2);

        let mut sink = RecordingSink::default();
        worker.run_scheduled_jobs(&mut sink);
        assert_eq!(sink.destroyed, vec![Entity::from_raw(1, 0), Entity::from_raw(2, 0)]);
    }
}
