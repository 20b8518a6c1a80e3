//! Cross-module scheduler + world + command-buffer scenarios (spec §8).

use std::sync::{Arc, Mutex};

use ecs_core::config::WorldConfig;
use ecs_core::entity::Entity;
use ecs_core::policy::WritePhase;
use ecs_core::scheduler::{Group, OrderConstraints, System};
use ecs_core::storage::VecPool;
use ecs_core::world::World;
use ecs_core::component::Component;

struct Position(f32, f32);
impl Component for Position {
    type Storage = VecPool<Position>;
}

struct Velocity(f32, f32);
impl Component for Velocity {
    type Storage = VecPool<Velocity>;
}

/// Runs in `FixedSimulation`, applying velocity to position on every alive
/// matching entity — the kind of system the spec's query engine exists for.
struct Integrate;
impl System for Integrate {
    fn name(&self) -> &'static str {
        "Integrate"
    }
    fn group(&self) -> Group {
        Group::FixedSimulation
    }
    fn run(&mut self, world: &mut World, dt: f64) {
        let Some(query) = world.query::<(Position, Velocity)>(Default::default()) else {
            return;
        };
        let matches: Vec<(Entity, f32, f32)> = query
            .iter()
            .map(|(e, (_, v))| (e, v.0 * dt as f32, v.1 * dt as f32))
            .collect();
        drop(query);
        for (e, dx, dy) in matches {
            let current = world.get::<Position>(e).map(|p| (p.0, p.1)).unwrap_or((0.0, 0.0));
            world.replace(e, Position(current.0 + dx, current.1 + dy)).unwrap();
        }
    }
}

/// A `FrameInput` system recording invocation order against a shared log,
/// to exercise `OrderBefore`/`OrderAfter` resolution end-to-end.
struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}
impl System for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }
    fn group(&self) -> Group {
        Group::FrameInput
    }
    fn run(&mut self, _world: &mut World, _dt: f64) {
        self.log.lock().unwrap().push(self.name);
    }
}

#[test]
fn system_plan_runs_fixed_simulation_in_order() {
    let mut world = World::new(WorldConfig::default());
    world.set_phase(WritePhase::Simulation);
    let e = world.create_entity().unwrap();
    world.add(e, Position(0.0, 0.0)).unwrap();
    world.add(e, Velocity(1.0, 2.0)).unwrap();

    world.add_system(Box::new(Integrate), OrderConstraints::default());

    world.begin_frame(0.0);
    world.fixed_step(1.0);

    let pos = world.get::<Position>(e).unwrap();
    assert!((pos.0 - 1.0).abs() < 1e-6);
    assert!((pos.1 - 2.0).abs() < 1e-6);
}

#[test]
fn order_constraints_resolve_across_two_systems() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut world = World::new(WorldConfig::default());

    world.add_system(
        Box::new(Recorder {
            name: "second",
            log: log.clone(),
        }),
        OrderConstraints {
            before: vec![],
            after: vec!["first"],
        },
    );
    world.add_system(
        Box::new(Recorder {
            name: "first",
            log: log.clone(),
        }),
        OrderConstraints::default(),
    );

    world.begin_frame(0.0);

    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn command_buffer_add_applies_at_next_barrier() {
    let mut world = World::new(WorldConfig::default());
    world.register_component::<Position>();
    world.set_phase(WritePhase::Simulation);
    let e = world.create_entity().unwrap();

    {
        let mut session = world.begin_write();
        session.buffer_mut().record_add(
            e,
            std::any::TypeId::of::<Position>(),
            std::any::type_name::<Position>(),
            Box::new(Position(5.0, 5.0)),
        );
    }

    assert!(!world.has::<Position>(e));
    world.fixed_step(0.0);
    assert!(world.has::<Position>(e));
}

#[test]
fn pump_and_late_frame_runs_exact_substep_count_over_three_calls() {
    let mut world = World::new(WorldConfig::default());
    let h = 1.0 / 60.0;
    for _ in 0..3 {
        world.pump_and_late_frame(0.05, h, 4);
    }
    assert_eq!(world.fixed_frame_count(), 9);
}
