//! Multi-world kernel: registry, secondary indexes, and the frame-tick
//! driver (spec §4.9).
//!
//! New relative to the teacher (`specs` has no multi-world concept).
//! Grounded on the example pack's `legion::Universe`
//! (`examples/0x112233-legion/src/lib.rs`), which is exactly "a thing that
//! hands out fresh `World`s sharing one allocator" — generalized here to a
//! registry of independently-ticked worlds with name/tag secondary indexes
//! and pause/resume bookkeeping. The id/name/tag maps are `parking_lot`
//! locked (as the teacher's `legion` example locks its `BlockAllocator`)
//! because worlds may be created or looked up from threads other than the
//! tick driver (§5); ticking itself is expected on a single driver thread.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use parking_lot::RwLock;
use shrev::EventChannel;
use uuid::Uuid;

use crate::config::{KernelConfig, WorldConfig};
use crate::error::{Error, Result};
use crate::world::World;

/// Lifecycle/selection events the kernel emits through its own
/// `shrev::EventChannel`, mirroring [[messages]]'s per-type channel shape
/// but scoped to a single fixed event enum rather than user-defined
/// message types.
#[derive(Clone, Debug)]
pub enum KernelEvent {
    WorldCreated(Uuid),
    WorldDestroyed(Uuid),
    CurrentWorldChanged(Option<Uuid>, Option<Uuid>),
    Disposed,
}

/// Top-level owner of multiple worlds and the frame-tick driver.
pub struct Kernel {
    config: KernelConfig,
    worlds: HashMap<Uuid, World>,
    by_name: RwLock<HashMap<String, HashSet<Uuid>>>,
    by_tag: RwLock<HashMap<String, HashSet<Uuid>>>,
    current: Option<Uuid>,
    auto_name_counter: u64,
    events: EventChannel<KernelEvent>,
    total_time: f64,
    frame_count: u64,
    fixed_frame_count: u64,
    fixed_accumulator: f64,
    is_paused: bool,
    disposed: bool,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Kernel {
            config,
            worlds: HashMap::new(),
            by_name: RwLock::new(HashMap::new()),
            by_tag: RwLock::new(HashMap::new()),
            current: None,
            auto_name_counter: 0,
            events: EventChannel::new(),
            total_time: 0.0,
            frame_count: 0,
            fixed_frame_count: 0,
            fixed_accumulator: 0.0,
            is_paused: false,
            disposed: false,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed {
            Err(Error::WorldDisposed)
        } else {
            Ok(())
        }
    }

    // ---- registry -----------------------------------------------------

    /// Creates and registers a new world. `id` lets a caller pin a specific
    /// uuid (e.g. restored from a snapshot); reusing an id already in the
    /// registry is an error (§4.9 failure model).
    pub fn create_world(
        &mut self,
        config: WorldConfig,
        name: Option<String>,
        tags: Vec<String>,
        id: Option<Uuid>,
        set_current: Option<bool>,
    ) -> Result<Uuid> {
        self.ensure_active()?;

        let id = match id {
            Some(id) => {
                if self.worlds.contains_key(&id) {
                    return Err(Error::DuplicateWorldId);
                }
                id
            }
            None => (self.config.new_world_id_factory)(),
        };

        let name = name.or_else(|| {
            self.auto_name_counter += 1;
            Some(format!("{}{}", self.config.auto_name_prefix, self.auto_name_counter))
        });

        let world = World::with_identity(config, name.clone(), tags.clone(), id);
        self.worlds.insert(id, world);

        if let Some(name) = &name {
            self.by_name.write().entry(name.clone()).or_default().insert(id);
        }
        for tag in &tags {
            self.by_tag.write().entry(tag.clone()).or_default().insert(id);
        }

        info!("kernel created world {} (name={:?}, tags={:?})", id, name, tags);
        self.events.single_write(KernelEvent::WorldCreated(id));

        let should_select = set_current.unwrap_or(self.config.auto_select_new_world);
        if should_select || self.current.is_none() {
            self.set_current(Some(id));
        }

        Ok(id)
    }

    /// Disposes and removes a world, detaching it from the name/tag
    /// indexes. A no-op if `id` isn't registered.
    pub fn destroy_world(&mut self, id: Uuid) {
        let Some(mut world) = self.worlds.remove(&id) else {
            return;
        };
        world.dispose();

        if let Some(name) = world.name() {
            if let Some(set) = self.by_name.write().get_mut(name) {
                set.remove(&id);
            }
        }
        for tag in world.tags() {
            if let Some(set) = self.by_tag.write().get_mut(tag) {
                set.remove(&id);
            }
        }

        debug!("kernel destroyed world {id}");
        self.events.single_write(KernelEvent::WorldDestroyed(id));

        if self.current == Some(id) {
            self.set_current(None);
        }
    }

    pub fn get_all(&self) -> Vec<Uuid> {
        self.worlds.keys().copied().collect()
    }

    pub fn try_get(&self, id: Uuid) -> Option<&World> {
        self.worlds.get(&id)
    }

    pub fn try_get_mut(&mut self, id: Uuid) -> Option<&mut World> {
        self.worlds.get_mut(&id)
    }

    /// Snapshot of ids currently registered under `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<Uuid> {
        self.by_name
            .read()
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<Uuid> {
        self.by_tag
            .read()
            .get(tag)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of every world carrying at least one of `tags`.
    pub fn find_by_any_tag(&self, tags: &[&str]) -> Vec<Uuid> {
        let index = self.by_tag.read();
        let mut found: HashSet<Uuid> = HashSet::new();
        for tag in tags {
            if let Some(set) = index.get(*tag) {
                found.extend(set.iter().copied());
            }
        }
        found.into_iter().collect()
    }

    /// Every world whose name starts with `prefix`, from a read snapshot of
    /// the name index (so this never blocks a concurrent `create_world`'s
    /// write lock for longer than the snapshot copy).
    pub fn find_by_name_prefix(&self, prefix: &str) -> Vec<Uuid> {
        self.by_name
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .flat_map(|(_, set)| set.iter().copied())
            .collect()
    }

    pub fn current(&self) -> Option<Uuid> {
        self.current
    }

    /// Selects `id` as the current world, firing `current_world_changed`.
    /// `id = None` clears the selection (e.g. after destroying the current
    /// world).
    pub fn set_current(&mut self, id: Option<Uuid>) {
        if self.current == id {
            return;
        }
        let old = self.current;
        self.current = id;
        self.events.single_write(KernelEvent::CurrentWorldChanged(old, id));
    }

    /// Registers a reader for kernel lifecycle/selection events, mirroring
    /// `MessageBus::subscribe`'s `ReaderId` handle.
    pub fn subscribe_events(&mut self) -> shrev::ReaderId<KernelEvent> {
        self.events.register_reader()
    }

    pub fn poll_events(&self, reader: &mut shrev::ReaderId<KernelEvent>) -> Vec<KernelEvent> {
        self.events.read(reader).cloned().collect()
    }

    // ---- bookkeeping ----------------------------------------------------

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn fixed_frame_count(&self) -> u64 {
        self.fixed_frame_count
    }

    pub fn fixed_accumulator(&self) -> f64 {
        self.fixed_accumulator
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    pub fn toggle_pause(&mut self) {
        self.is_paused = !self.is_paused;
    }

    /// Worlds targeted by a tick call: just `current` when
    /// `step_only_current_when_selected` is set and a world is selected,
    /// otherwise every registered world.
    fn tick_targets(&self) -> Vec<Uuid> {
        if self.config.step_only_current_when_selected {
            if let Some(id) = self.current {
                return vec![id];
            }
        }
        self.get_all()
    }

    /// Ticks while disposed or paused are ignored (§4.9 failure model).
    fn should_tick(&self) -> bool {
        !self.disposed && !self.is_paused
    }

    pub fn begin_frame(&mut self, dt: f64) {
        if !self.should_tick() {
            return;
        }
        for id in self.tick_targets() {
            if let Some(world) = self.worlds.get_mut(&id) {
                world.begin_frame(dt);
            }
        }
        self.total_time += dt;
        self.frame_count += 1;
    }

    pub fn fixed_step(&mut self, h: f64) {
        if !self.should_tick() {
            return;
        }
        for id in self.tick_targets() {
            if let Some(world) = self.worlds.get_mut(&id) {
                world.fixed_step(h);
            }
        }
        self.fixed_frame_count += 1;
    }

    pub fn late_frame(&mut self, alpha: f64) {
        if !self.should_tick() {
            return;
        }
        for id in self.tick_targets() {
            if let Some(world) = self.worlds.get_mut(&id) {
                world.late_frame(alpha);
            }
        }
    }

    /// `begin_frame(dt); while acc >= h && n < max: fixed_step(h); acc -=
    /// h; n += 1; late_frame(alpha)`, driven per-target-world exactly as
    /// `World::pump_and_late_frame` does it, but with kernel-level
    /// bookkeeping (`fixed_frame_count` etc.) advanced once per target
    /// world tick, matching `begin_frame`/`fixed_step`/`late_frame` above.
    pub fn pump_and_late_frame(&mut self, dt: f64, h: f64, max_substeps: u32) {
        if !self.should_tick() {
            return;
        }
        for id in self.tick_targets() {
            if let Some(world) = self.worlds.get_mut(&id) {
                world.pump_and_late_frame(dt, h, max_substeps);
            }
        }
        self.total_time += dt;
        self.frame_count += 1;

        self.fixed_accumulator += dt;
        let mut n = 0;
        while self.fixed_accumulator >= h && n < max_substeps {
            self.fixed_accumulator -= h;
            self.fixed_frame_count += 1;
            n += 1;
        }
        let cap = h * max_substeps as f64;
        if self.fixed_accumulator > cap {
            self.fixed_accumulator = cap;
        }
    }

    /// Disposes every registered world in arbitrary order (each world's own
    /// `dispose` is internally ordered per §3) and marks the kernel itself
    /// disposed; further tick calls are ignored.
    pub fn shutdown(&mut self) {
        if self.disposed {
            return;
        }
        let ids: Vec<Uuid> = self.worlds.keys().copied().collect();
        for id in ids {
            self.destroy_world(id);
        }
        self.disposed = true;
        self.events.single_write(KernelEvent::Disposed);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_world_assigns_auto_name_and_becomes_current() {
        let mut kernel = Kernel::new(KernelConfig::default());
        let id = kernel.create_world(WorldConfig::default(), None, vec![], None, None).unwrap();
        assert_eq!(kernel.current(), Some(id));
        assert_eq!(kernel.try_get(id).unwrap().name(), Some("world-1"));
    }

    #[test]
    fn duplicate_preset_id_is_an_error() {
        let mut kernel = Kernel::new(KernelConfig::default());
        let id = Uuid::new_v4();
        kernel
            .create_world(WorldConfig::default(), None, vec![], Some(id), None)
            .unwrap();
        let result = kernel.create_world(WorldConfig::default(), None, vec![], Some(id), None);
        assert!(matches!(result, Err(Error::DuplicateWorldId)));
    }

    #[test]
    fn find_by_tag_and_prefix() {
        let mut kernel = Kernel::new(KernelConfig::default());
        let a = kernel
            .create_world(
                WorldConfig::default(),
                Some("alpha-one".into()),
                vec!["gameplay".into()],
                None,
                None,
            )
            .unwrap();
        let b = kernel
            .create_world(
                WorldConfig::default(),
                Some("alpha-two".into()),
                vec!["ui".into()],
                None,
                None,
            )
            .unwrap();

        assert_eq!(kernel.find_by_tag("gameplay"), vec![a]);
        let mut prefix_hits = kernel.find_by_name_prefix("alpha-");
        prefix_hits.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(prefix_hits, expected);
    }

    #[test]
    fn fixed_frame_count_advances_by_n_over_pump_calls() {
        let mut kernel = Kernel::new(KernelConfig::default());
        kernel.create_world(WorldConfig::default(), None, vec![], None, None).unwrap();
        let h = 1.0 / 60.0;
        for _ in 0..3 {
            kernel.pump_and_late_frame(0.05, h, 4);
        }
        assert_eq!(kernel.fixed_frame_count(), 9);
    }

    #[test]
    fn paused_ticks_are_ignored() {
        let mut kernel = Kernel::new(KernelConfig::default());
        kernel.create_world(WorldConfig::default(), None, vec![], None, None).unwrap();
        kernel.pause();
        kernel.pump_and_late_frame(0.05, 1.0 / 60.0, 4);
        assert_eq!(kernel.fixed_frame_count(), 0);
        assert_eq!(kernel.frame_count(), 0);
    }

    #[test]
    fn destroy_world_clears_current_selection() {
        let mut kernel = Kernel::new(KernelConfig::default());
        let id = kernel.create_world(WorldConfig::default(), None, vec![], None, None).unwrap();
        kernel.destroy_world(id);
        assert_eq!(kernel.current(), None);
        assert!(kernel.try_get(id).is_none());
    }
}
