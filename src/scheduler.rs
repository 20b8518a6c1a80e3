//! The system scheduler: groups, lifecycle, and plan construction (spec
//! §4.8).
//!
//! The teacher's own `planner.rs` is a relic of a pre-`System`-trait
//! `specs` era (a thread-pool dispatcher built on `pulse`/`rayon`, entirely
//! commented out in the checked-in source) and gives nothing concrete to
//! generalize, so this module is written fresh in its spirit: systems as
//! trait objects dispatched through an owning planner, `OrderBefore`/
//! `OrderAfter` playing the role the old code gave bare numeric
//! `Priority`. Frame orchestration (`begin_frame`/`fixed_step`/
//! `late_frame`) lives on `World` in `world.rs`, since it has to reach the
//! message bus, command worker, and binding router alongside the plan.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::warn;

use crate::world::World;

/// The eight scheduling groups, in two families (§4.8).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Group {
    FixedInput,
    FixedDecision,
    FixedSimulation,
    FixedPost,
    FrameInput,
    FrameSync,
    FrameView,
    FrameUI,
}

/// A system's place in the scheduler's lifecycle (§4.8).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemState {
    Pending,
    Active,
    Initialized,
    ShuttingDown,
}

/// A unit of per-tick work. Implementors provide a stable `name()` (used
/// for `OrderBefore`/`OrderAfter` references and as the lexicographic
/// tie-break key) and declare which `Group` they run in.
pub trait System: Send {
    /// Stable identifier, conventionally `std::any::type_name::<Self>()`.
    fn name(&self) -> &'static str;

    fn group(&self) -> Group;

    /// Called once, the tick after the system becomes `Active`.
    fn initialize(&mut self, _world: &mut World) {}

    /// Called once per tick of this system's group, provided `enabled()`
    /// and the system is `Initialized`.
    fn run(&mut self, world: &mut World, dt: f64);

    /// Called once, the tick the system transitions out of the plan.
    fn shutdown(&mut self, _world: &mut World) {}

    /// When false, the system is skipped for `run` without any state
    /// change (§4.8).
    fn enabled(&self) -> bool {
        true
    }
}

/// Declares that this system must run strictly before (or after) the
/// named system, within the same group. Unsatisfiable references (naming
/// a system not present in the group) are ignored.
#[derive(Clone, Debug, Default)]
pub struct OrderConstraints {
    pub before: Vec<&'static str>,
    pub after: Vec<&'static str>,
}

struct SystemEntry {
    system: Box<dyn System>,
    state: SystemState,
    constraints: OrderConstraints,
}

/// Owns the system roster, their lifecycle states, and the per-group
/// execution plan.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<SystemEntry>,
    plan: BTreeMap<Group, Vec<usize>>,
    plan_dirty: bool,
}

impl Scheduler {
    /// Queues a system for addition; it becomes `Active` (and is folded
    /// into the plan) on the next `apply_pending_and_build_plan`.
    pub fn add_system(&mut self, system: Box<dyn System>, constraints: OrderConstraints) {
        self.entries.push(SystemEntry {
            system,
            state: SystemState::Pending,
            constraints,
        });
        self.plan_dirty = true;
    }

    /// Marks a system `ShuttingDown`; its `shutdown` hook runs and it is
    /// removed from the roster on the next `apply_pending_and_build_plan`.
    pub fn remove_system(&mut self, name: &str) {
        for entry in &mut self.entries {
            if entry.system.name() == name {
                entry.state = SystemState::ShuttingDown;
                self.plan_dirty = true;
            }
        }
    }

    pub fn state_of(&self, name: &str) -> Option<SystemState> {
        self.entries
            .iter()
            .find(|e| e.system.name() == name)
            .map(|e| e.state)
    }

    /// §4.8 step 1.a: applies pending add/remove, rebuilds the plan if
    /// dirty, and initializes newly `Active` systems.
    pub fn apply_pending_and_build_plan(&mut self, world: &mut World) {
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].state == SystemState::ShuttingDown {
                let mut entry = self.entries.remove(i);
                entry.system.shutdown(world);
                self.plan_dirty = true;
            } else {
                i += 1;
            }
        }

        for entry in &mut self.entries {
            if entry.state == SystemState::Pending {
                entry.state = SystemState::Active;
                self.plan_dirty = true;
            }
        }

        if self.plan_dirty {
            self.rebuild_plan();
            self.plan_dirty = false;
        }

        for entry in &mut self.entries {
            if entry.state == SystemState::Active {
                entry.system.initialize(world);
                entry.state = SystemState::Initialized;
            }
        }
    }

    /// Tears down every system (used by `World::dispose`'s reverse-order
    /// teardown): marks every entry `ShuttingDown` and immediately applies
    /// the resulting removals, running each system's `shutdown` hook in
    /// plan order.
    pub fn shutdown_all(&mut self, world: &mut World) {
        for entry in &mut self.entries {
            entry.state = SystemState::ShuttingDown;
        }
        self.plan_dirty = true;
        self.apply_pending_and_build_plan(world);
    }

    fn rebuild_plan(&mut self) {
        self.plan.clear();
        let mut by_group: BTreeMap<Group, Vec<usize>> = BTreeMap::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if matches!(entry.state, SystemState::Active | SystemState::Initialized) {
                by_group.entry(entry.system.group()).or_default().push(idx);
            }
        }
        for (group, indices) in by_group {
            self.plan.insert(group, topo_sort(&self.entries, indices));
        }
    }

    /// Runs every `Initialized`, `enabled()` system in `group`'s plan, in
    /// plan order.
    pub fn run_group(&mut self, group: Group, world: &mut World, dt: f64) {
        let Some(indices) = self.plan.get(&group).cloned() else {
            return;
        };
        for idx in indices {
            let Some(entry) = self.entries.get_mut(idx) else {
                continue;
            };
            if entry.state != SystemState::Initialized || !entry.system.enabled() {
                continue;
            }
            entry.system.run(world, dt);
        }
    }
}

/// Kahn's algorithm with a lexicographic-by-name ready set, so the result
/// is the same every time regardless of insertion order (§4.8: "ties
/// resolved by lexicographic type name").
fn topo_sort(entries: &[SystemEntry], indices: Vec<usize>) -> Vec<usize> {
    let name_to_idx: HashMap<&str, usize> = indices.iter().map(|&i| (entries[i].system.name(), i)).collect();

    let mut indegree: HashMap<usize, usize> = indices.iter().map(|&i| (i, 0)).collect();
    let mut successors: HashMap<usize, Vec<usize>> = HashMap::new();

    for &i in &indices {
        for before_name in &entries[i].constraints.before {
            if let Some(&j) = name_to_idx.get(before_name) {
                successors.entry(i).or_default().push(j);
                *indegree.get_mut(&j).unwrap() += 1;
            }
        }
        for after_name in &entries[i].constraints.after {
            if let Some(&j) = name_to_idx.get(after_name) {
                successors.entry(j).or_default().push(i);
                *indegree.get_mut(&i).unwrap() += 1;
            }
        }
    }

    let mut ready: BTreeSet<(&str, usize)> = indices
        .iter()
        .filter(|&&i| indegree[&i] == 0)
        .map(|&i| (entries[i].system.name(), i))
        .collect();

    let mut order = Vec::with_capacity(indices.len());
    while let Some(&(name, i)) = ready.iter().next() {
        ready.remove(&(name, i));
        order.push(i);
        if let Some(next) = successors.get(&i) {
            for &j in next {
                let d = indegree.get_mut(&j).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.insert((entries[j].system.name(), j));
                }
            }
        }
    }

    if order.len() < indices.len() {
        warn!("system order constraints form a cycle; remaining systems appended lexicographically");
        let mut remaining: Vec<usize> = indices
            .into_iter()
            .filter(|i| !order.contains(i))
            .collect();
        remaining.sort_by_key(|&i| entries[i].system.name());
        order.extend(remaining);
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        group: Group,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl System for Recording {
        fn name(&self) -> &'static str {
            self.name
        }
        fn group(&self) -> Group {
            self.group
        }
        fn run(&mut self, _world: &mut World, _dt: f64) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    #[test]
    fn order_after_runs_later_in_plan() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::default();
        scheduler.add_system(
            Box::new(Recording {
                name: "b",
                group: Group::FixedInput,
                log: log.clone(),
            }),
            OrderConstraints {
                before: vec![],
                after: vec!["a"],
            },
        );
        scheduler.add_system(
            Box::new(Recording {
                name: "a",
                group: Group::FixedInput,
                log: log.clone(),
            }),
            OrderConstraints::default(),
        );

        // Building the plan only needs the entries' own constraints, not a
        // live `World`; tests exercise the planning path directly via the
        // plan map rather than `run_group`, which requires a `World`.
        scheduler.plan_dirty = true;
        for entry in &mut scheduler.entries {
            entry.state = SystemState::Active;
        }
        scheduler.rebuild_plan();
        let plan = scheduler.plan.get(&Group::FixedInput).unwrap().clone();
        let names: Vec<&str> = plan.iter().map(|&i| scheduler.entries[i].system.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn ties_break_lexicographically() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::default();
        for name in ["charlie", "alpha", "bravo"] {
            scheduler.add_system(
                Box::new(Recording {
                    name,
                    group: Group::FrameUI,
                    log: log.clone(),
                }),
                OrderConstraints::default(),
            );
        }
        for entry in &mut scheduler.entries {
            entry.state = SystemState::Active;
        }
        scheduler.rebuild_plan();
        let plan = scheduler.plan.get(&Group::FrameUI).unwrap().clone();
        let names: Vec<&str> = plan.iter().map(|&i| scheduler.entries[i].system.name()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    }
}
