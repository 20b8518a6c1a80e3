//! Cross-world kernel scenarios (spec §4.9, §8 "Kernel bookkeeping").

use ecs_core::config::{KernelConfig, WorldConfig};
use ecs_core::error::Error;
use ecs_core::kernel::Kernel;

#[test]
fn worlds_are_found_by_name_and_tag() {
    let mut kernel = Kernel::new(KernelConfig::default());
    let gameplay = kernel
        .create_world(
            WorldConfig::default(),
            Some("arena".to_string()),
            vec!["gameplay".to_string(), "combat".to_string()],
            None,
            None,
        )
        .unwrap();
    let ui = kernel
        .create_world(
            WorldConfig::default(),
            Some("hud".to_string()),
            vec!["ui".to_string()],
            None,
            None,
        )
        .unwrap();

    assert_eq!(kernel.find_by_name("arena"), vec![gameplay]);
    assert_eq!(kernel.find_by_tag("ui"), vec![ui]);

    let mut both = kernel.find_by_any_tag(&["combat", "ui"]);
    both.sort();
    let mut expected = vec![gameplay, ui];
    expected.sort();
    assert_eq!(both, expected);
}

#[test]
fn step_only_current_when_selected_skips_other_worlds() {
    let config = KernelConfig {
        step_only_current_when_selected: true,
        ..KernelConfig::default()
    };
    let mut kernel = Kernel::new(config);
    let a = kernel.create_world(WorldConfig::default(), None, vec![], None, Some(true)).unwrap();
    let _b = kernel.create_world(WorldConfig::default(), None, vec![], None, Some(false)).unwrap();

    kernel.fixed_step(1.0 / 60.0);

    assert_eq!(kernel.try_get(a).unwrap().fixed_frame_count(), 1);
    assert_eq!(kernel.try_get(_b).unwrap().fixed_frame_count(), 0);
}

#[test]
fn duplicate_world_id_is_rejected() {
    let mut kernel = Kernel::new(KernelConfig::default());
    let id = uuid::Uuid::new_v4();
    kernel.create_world(WorldConfig::default(), None, vec![], Some(id), None).unwrap();
    let err = kernel
        .create_world(WorldConfig::default(), None, vec![], Some(id), None)
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateWorldId));
}

#[test]
fn shutdown_disposes_every_world_and_ignores_further_ticks() {
    let mut kernel = Kernel::new(KernelConfig::default());
    kernel.create_world(WorldConfig::default(), None, vec![], None, None).unwrap();
    kernel.shutdown();

    assert!(kernel.is_disposed());
    assert_eq!(kernel.get_all().len(), 0);

    kernel.pump_and_late_frame(0.1, 1.0 / 60.0, 4);
    assert_eq!(kernel.frame_count(), 0);
}
