use std::sync::Arc;

use glam::Vec4;
use shoreline::render::{PassKind, RecordedCall};
use shoreline::{
    InputAction, InputQueue, KeyCode, RecordingBackend, RenderOrchestrator, SceneDescription,
    Viewport, WaterPhase,
};

fn small_beach() -> SceneDescription {
    let mut scene = SceneDescription::beach();
    for ground in &mut scene.grounds {
        ground.heightmap = None;
        ground.procedural_size = 9;
    }
    for object in &mut scene.objects {
        object.mesh = None;
    }
    scene.water.grid = 6;
    scene
}

fn world(input: Arc<InputQueue>) -> RenderOrchestrator<RecordingBackend> {
    RenderOrchestrator::new(
        RecordingBackend::new(),
        &small_beach(),
        input,
        Viewport::new(640, 480),
    )
    .expect("scene builds")
}

fn pass_frames(world: &RenderOrchestrator<RecordingBackend>) -> Vec<(PassKind, Vec4, f32)> {
    world
        .backend()
        .calls()
        .iter()
        .filter_map(|call| match call {
            RecordedCall::Pass { kind, frame, .. } => Some((
                *kind,
                frame.clip_plane.unwrap_or(Vec4::ZERO),
                frame.camera_position.y,
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn every_frame_runs_the_four_passes_in_order() {
    let mut world = world(Arc::new(InputQueue::new()));
    for _ in 0..3 {
        world.frame().unwrap();
    }
    let sequence = world.backend().pass_sequence();
    assert_eq!(sequence.len(), 12);
    for frame in sequence.chunks(4) {
        assert_eq!(frame, ["reflection", "refraction", "main", "water"]);
    }
    assert_eq!(world.water().phase(), WaterPhase::Idle);
}

#[test]
fn reflection_uses_mirrored_camera_and_opposite_clip_planes() {
    let mut world = world(Arc::new(InputQueue::new()));
    let camera_y = world.camera().position.y;
    let level = world.water().level();
    world.frame().unwrap();

    let passes = pass_frames(&world);
    assert_eq!(passes.len(), 3);
    let (kind, clip, y) = passes[0];
    assert_eq!(kind, PassKind::Reflection);
    assert!((y - (2.0 * level - camera_y)).abs() < 1e-4);
    assert_eq!(clip.y, 1.0);

    let (kind, clip, y) = passes[1];
    assert_eq!(kind, PassKind::Refraction);
    assert_eq!(y, camera_y);
    assert_eq!(clip.y, -1.0);

    let (kind, clip, _) = passes[2];
    assert_eq!(kind, PassKind::Main);
    assert_eq!(clip, Vec4::ZERO);

    assert_eq!(world.camera().position.y, camera_y);
}

#[test]
fn targets_follow_viewport_changes_lazily() {
    let mut world = world(Arc::new(InputQueue::new()));
    world.frame().unwrap();
    world.frame().unwrap();
    world.resize(Viewport::new(800, 600));
    world.frame().unwrap();

    let resizes: Vec<Viewport> = world
        .backend()
        .calls()
        .iter()
        .filter_map(|call| match call {
            RecordedCall::ResizeTargets(viewport) => Some(*viewport),
            _ => None,
        })
        .collect();
    assert_eq!(resizes, [Viewport::new(640, 480), Viewport::new(800, 600)]);
    assert_eq!(world.backend().targets(), Some(Viewport::new(800, 600)));
}

#[test]
fn failed_target_allocation_leaves_the_pipeline_reusable() {
    let mut world = world(Arc::new(InputQueue::new()));
    let camera = world.camera().position;
    world.backend_mut().fail_next_resize();
    assert!(world.frame().is_err());
    assert_eq!(world.water().phase(), WaterPhase::Idle);
    assert_eq!(world.camera().position, camera);

    world.frame().unwrap();
    assert_eq!(
        world.backend().pass_sequence(),
        ["reflection", "refraction", "main", "water"]
    );
    assert_eq!(
        world.backend().frame_brackets(),
        ["begin", "abort", "begin", "end"]
    );
}

#[test]
fn swinging_props_move_between_frames() {
    let mut world = world(Arc::new(InputQueue::new()));
    let before = world.draw_list();
    world.frame().unwrap();
    world.frame().unwrap();
    let after = world.draw_list();
    assert_eq!(before.len(), after.len());
    let moved = before
        .iter()
        .zip(&after)
        .filter(|(a, b)| a.model != b.model)
        .count();
    assert!(moved >= 1, "the anchor should swing");
}

#[test]
fn key_presses_reach_the_scene_at_the_next_frame() {
    let input = Arc::new(InputQueue::new());
    let mut world = world(Arc::clone(&input));
    assert!(input.push_key(KeyCode::Character('T'), true));
    assert!(input.push_key(KeyCode::Digit(1), false));
    assert!(!input.push_key(KeyCode::Character('Q'), false));
    assert_eq!(world.active_ground(), 0);

    let report = world.frame().unwrap();
    assert_eq!(report.ground, 1);
    assert!(!world.toon());
    // props are only shown on the default ground
    assert_eq!(report.draws, 1);

    input.push(InputAction::Quit);
    world.frame().unwrap();
    assert!(world.should_quit());
}

#[test]
fn wave_offset_advances_and_wraps() {
    let mut world = world(Arc::new(InputQueue::new()));
    let mut last = 0.0;
    for _ in 0..10 {
        let report = world.frame().unwrap();
        assert!(report.move_factor > last);
        assert!(report.move_factor < 1.0);
        last = report.move_factor;
    }
    assert!((last - 0.02).abs() < 1e-5);
}
