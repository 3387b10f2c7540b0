use std::sync::Arc;

use glam::{Mat4, Vec4};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::camera::Camera;
use crate::config::{GroundConfig, SceneDescription};
use crate::error::RenderError;
use crate::input::{InputAction, InputQueue};
use crate::mesh::{unit_cube, MeshBuffer, Topology};
use crate::obj::load_obj;
use crate::patch::BezierPatch;
use crate::render::{
    DrawCommand, FrameUniforms, Light, Material, MeshHandle, RenderBackend, Shading, Viewport,
};
use crate::scene::{NodeId, SceneGraph};
use crate::terrain::{generate_terrain, Heightmap};
use crate::water::{WaterMaps, WaterPipeline};

/// Camera travel per movement key press.
const MOVE_STEP: f32 = 1.0;

#[derive(Debug, Clone)]
struct Ground {
    name: String,
    mesh: MeshHandle,
    material: Material,
    show_props: bool,
}

#[derive(Debug, Clone)]
struct PlacedPatch {
    patch: BezierPatch,
    mesh: MeshHandle,
}

/// What a frame did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameReport {
    pub index: u64,
    pub draws: usize,
    pub ground: usize,
    pub move_factor: f32,
}

/// Mesh statistics of a loaded scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSummary {
    pub nodes: usize,
    pub objects: usize,
    pub patches: usize,
    pub grounds: Vec<String>,
    pub terrain_triangles: usize,
    pub water_indices: usize,
    pub fallbacks: usize,
}

/// Owns the scene and drives one frame at a time: applies queued input,
/// advances animation, refreshes the camera and runs the water passes.
pub struct RenderOrchestrator<B: RenderBackend> {
    backend: B,
    graph: SceneGraph,
    root: NodeId,
    props: NodeId,
    object_count: usize,
    grounds: Vec<Ground>,
    active_ground: usize,
    terrain_triangles: usize,
    patches: Vec<PlacedPatch>,
    camera: Camera,
    home_camera: Camera,
    viewport: Viewport,
    light: Light,
    water: WaterPipeline,
    input: Arc<InputQueue>,
    toon: bool,
    simple_patches: bool,
    illuminate_terrain: bool,
    fallbacks: usize,
    frames: u64,
    quit: bool,
}

impl<B: RenderBackend> RenderOrchestrator<B> {
    /// Loads every asset of the description and uploads it to `backend`.
    ///
    /// Assets that fail to load are replaced (meshes by a unit cube,
    /// heightmaps by the procedural shoreline) and counted in
    /// [`SceneSummary::fallbacks`].
    pub fn new(
        mut backend: B,
        description: &SceneDescription,
        input: Arc<InputQueue>,
        viewport: Viewport,
    ) -> Result<Self, RenderError> {
        let mut graph = SceneGraph::new();
        let root = graph.add_transform(Mat4::IDENTITY);
        let props = graph.add_transform(Mat4::IDENTITY);
        graph.add_child(root, props)?;
        let mut fallbacks = 0;

        let mut grounds = Vec::with_capacity(description.grounds.len());
        let mut terrain_triangles = 0;
        for config in &description.grounds {
            let (mesh, fell_back) = ground_mesh(config);
            fallbacks += usize::from(fell_back);
            terrain_triangles += mesh.triangle_count();
            let handle =
                backend.upload_mesh(&format!("ground-{}", config.name), &mesh, Topology::Triangles)?;
            grounds.push(Ground {
                name: config.name.clone(),
                mesh: handle,
                material: Material::new(config.color, 0.3, 1.0, 0.1, 8.0),
                show_props: config.show_props,
            });
        }

        let mut patches = Vec::with_capacity(description.patches.len());
        for (index, config) in description.patches.iter().enumerate() {
            let patch = BezierPatch::new(config.position, config.control_points);
            let (mesh, topology) = patch.generate_mesh();
            let handle = backend.upload_mesh(&format!("patch-{index}"), &mesh, topology)?;
            let transform = graph.add_transform(patch.to_world());
            let leaf = graph.add_geometry(handle, config.material);
            graph.add_child(transform, leaf)?;
            graph.add_child(props, transform)?;
            patches.push(PlacedPatch {
                patch,
                mesh: handle,
            });
        }

        let mut leaves: Vec<(&str, NodeId)> = Vec::new();
        for object in &description.objects {
            let leaf = match object
                .instance_of
                .as_deref()
                .and_then(|target| leaves.iter().find(|(name, _)| *name == target))
            {
                Some(&(_, shared)) => shared,
                None => {
                    let (mesh, fell_back) = object_mesh(&object.name, object.mesh.as_deref());
                    fallbacks += usize::from(fell_back);
                    let handle = backend.upload_mesh(&object.name, &mesh, Topology::Triangles)?;
                    graph.add_geometry(handle, object.material)
                }
            };
            let local = object.placement().matrix();
            let transform = match object.swing {
                Some(swing) => graph.add_animated_transform(local, swing),
                None => graph.add_transform(local),
            };
            graph.add_child(transform, leaf)?;
            graph.add_child(props, transform)?;
            leaves.push((object.name.as_str(), leaf));
        }

        let maps = WaterMaps::load(
            description.water.dudv_map.as_deref(),
            description.water.normal_map.as_deref(),
        );
        let water = WaterPipeline::new(description.water.clone(), &maps, &mut backend)?;

        let mut camera = Camera::new(
            description.camera.position,
            description.camera.look_at,
            description.camera.up,
        );
        camera.fov_y_degrees = description.camera.fov_y_degrees;
        camera.set_viewport(viewport);

        info!(
            "scene ready: {} objects, {} patches, {} grounds, {} fallbacks",
            description.objects.len(),
            patches.len(),
            grounds.len(),
            fallbacks
        );

        Ok(Self {
            backend,
            graph,
            root,
            props,
            object_count: description.objects.len(),
            grounds,
            active_ground: 0,
            terrain_triangles,
            patches,
            home_camera: camera.clone(),
            camera,
            viewport,
            light: description.light,
            water,
            input,
            toon: description.toon,
            simple_patches: false,
            illuminate_terrain: true,
            fallbacks,
            frames: 0,
            quit: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn water(&self) -> &WaterPipeline {
        &self.water
    }

    pub fn input(&self) -> Arc<InputQueue> {
        Arc::clone(&self.input)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn active_ground(&self) -> usize {
        self.active_ground
    }

    pub fn toon(&self) -> bool {
        self.toon
    }

    pub fn simple_patches(&self) -> bool {
        self.simple_patches
    }

    pub fn illuminate_terrain(&self) -> bool {
        self.illuminate_terrain
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn summary(&self) -> SceneSummary {
        SceneSummary {
            nodes: self.graph.len(),
            objects: self.object_count,
            patches: self.patches.len(),
            grounds: self.grounds.iter().map(|g| g.name.clone()).collect(),
            terrain_triangles: self.terrain_triangles,
            water_indices: self.water.mesh().indices.len(),
            fallbacks: self.fallbacks,
        }
    }

    /// Records a new viewport. The projection follows immediately; the
    /// offscreen targets are recreated before the next reflection pass.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.camera.set_viewport(viewport);
    }

    /// Restores the camera the scene was loaded with.
    pub fn reset_camera(&mut self) {
        self.camera = self.home_camera.clone();
        self.camera.set_viewport(self.viewport);
    }

    /// Draw list for the current state: props (when the active ground shows
    /// them) followed by the active ground.
    pub fn draw_list(&self) -> Vec<DrawCommand> {
        let mut draws = Vec::new();
        let ground = self.grounds.get(self.active_ground);
        if ground.map_or(true, |g| g.show_props) {
            self.graph.draw(self.props, Mat4::IDENTITY, &mut draws);
        }
        if let Some(ground) = ground {
            draws.push(DrawCommand {
                mesh: ground.mesh,
                model: Mat4::IDENTITY,
                material: ground.material,
                shading: if self.illuminate_terrain {
                    Shading::Lit
                } else {
                    Shading::Unlit
                },
            });
        }
        draws
    }

    /// Runs one frame. Input queued since the previous frame is applied
    /// first, so the camera never changes while passes are being recorded.
    ///
    /// Every queued action is applied even when one of them fails; the first
    /// failure is returned and the frame is skipped. A failure after
    /// `begin_frame` aborts the open frame on the backend.
    pub fn frame(&mut self) -> Result<FrameReport, RenderError> {
        let mut failed = None;
        for action in self.input.drain() {
            if let Err(err) = self.apply(action) {
                match failed {
                    None => failed = Some(err),
                    Some(_) => error!("{action:?} failed: {err}"),
                }
            }
        }
        if let Some(err) = failed {
            return Err(err);
        }

        self.graph.update(self.root);
        self.camera.update_view();
        let draws = self.draw_list();

        let light = self.light;
        let toon = self.toon;
        let uniforms = move |camera: &Camera, clip_plane: Option<Vec4>| FrameUniforms {
            projection: camera.projection(),
            view: camera.view(),
            camera_position: camera.position,
            light,
            clip_plane,
            toon,
        };

        self.backend.begin_frame()?;
        let rendered = self.water.render_frame(
            &mut self.backend,
            &mut self.camera,
            self.viewport,
            &draws,
            uniforms,
        );
        if let Err(err) = rendered {
            self.backend.abort_frame();
            return Err(err);
        }
        self.backend.end_frame()?;

        self.frames += 1;
        let report = FrameReport {
            index: self.frames,
            draws: draws.len(),
            ground: self.active_ground,
            move_factor: self.water.move_factor(),
        };
        debug!("frame {report:?}");
        Ok(report)
    }

    /// Applies one input action immediately.
    pub fn apply(&mut self, action: InputAction) -> Result<(), RenderError> {
        match action {
            InputAction::MoveForward => self.camera.move_forward(MOVE_STEP),
            InputAction::MoveBackward => self.camera.move_forward(-MOVE_STEP),
            InputAction::StrafeLeft => self.camera.strafe(-MOVE_STEP),
            InputAction::StrafeRight => self.camera.strafe(MOVE_STEP),
            InputAction::ResetZoom => self.camera.reset_zoom(),
            InputAction::Rotate { from, to } => self.camera.trackball(from, to, self.viewport),
            InputAction::Pan { dy } => self.camera.pan(dy),
            InputAction::Scroll { offset } => self.camera.scroll(offset),
            InputAction::ToggleToon => self.toon = !self.toon,
            InputAction::ToggleSimplePatches => self.set_simple_patches(!self.simple_patches)?,
            InputAction::ToggleTerrainLighting => {
                self.illuminate_terrain = !self.illuminate_terrain
            }
            InputAction::CycleGround => {
                if !self.grounds.is_empty() {
                    self.active_ground = (self.active_ground + 1) % self.grounds.len();
                    info!("ground: {}", self.grounds[self.active_ground].name);
                }
            }
            InputAction::Quit => self.quit = true,
        }
        Ok(())
    }

    /// Switches patch level of detail and re-uploads every patch mesh.
    pub fn set_simple_patches(&mut self, simple: bool) -> Result<(), RenderError> {
        self.simple_patches = simple;
        for placed in &mut self.patches {
            placed.patch.set_simple(simple);
            let (mesh, topology) = placed.patch.generate_mesh();
            self.backend.replace_mesh(placed.mesh, &mesh, topology)?;
        }
        Ok(())
    }
}

fn ground_mesh(config: &GroundConfig) -> (MeshBuffer, bool) {
    let (map, fell_back) = match &config.heightmap {
        Some(path) => match Heightmap::load(path) {
            Ok(map) => (map, false),
            Err(err) => {
                warn!("ground {}: {err}; using procedural shoreline", config.name);
                (Heightmap::shoreline(config.procedural_size), true)
            }
        },
        None => (Heightmap::shoreline(config.procedural_size), false),
    };
    (generate_terrain(&map, &config.params), fell_back)
}

fn object_mesh(name: &str, path: Option<&std::path::Path>) -> (MeshBuffer, bool) {
    let Some(path) = path else {
        return (unit_cube(), false);
    };
    match load_obj(path) {
        Ok(mesh) => (mesh, false),
        Err(err) => {
            error!("failed to load mesh for {name}: {err}; using a cube");
            (unit_cube(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::config::ObjectConfig;
    use crate::render::{RecordedCall, RecordingBackend};

    fn small_scene() -> SceneDescription {
        let mut scene = SceneDescription::beach();
        for ground in &mut scene.grounds {
            ground.heightmap = None;
            ground.procedural_size = 9;
        }
        scene.water.grid = 4;
        for object in &mut scene.objects {
            object.mesh = None;
        }
        scene
    }

    fn orchestrator(scene: &SceneDescription) -> RenderOrchestrator<RecordingBackend> {
        RenderOrchestrator::new(
            RecordingBackend::new(),
            scene,
            Arc::new(InputQueue::new()),
            Viewport::new(320, 240),
        )
        .unwrap()
    }

    #[test]
    fn draw_list_covers_props_and_ground() {
        let scene = small_scene();
        let world = orchestrator(&scene);
        let draws = world.draw_list();
        assert_eq!(draws.len(), scene.objects.len() + scene.patches.len() + 1);
        assert_eq!(draws.last().unwrap().shading, Shading::Lit);
    }

    #[test]
    fn props_are_hidden_on_other_grounds() {
        let mut world = orchestrator(&small_scene());
        world.apply(InputAction::CycleGround).unwrap();
        assert_eq!(world.active_ground(), 1);
        assert_eq!(world.draw_list().len(), 1);
        world.apply(InputAction::CycleGround).unwrap();
        world.apply(InputAction::CycleGround).unwrap();
        assert_eq!(world.active_ground(), 0);
    }

    #[test]
    fn toggles_flip_state() {
        let mut world = orchestrator(&small_scene());
        assert!(world.toon());
        world.apply(InputAction::ToggleToon).unwrap();
        assert!(!world.toon());
        world.apply(InputAction::ToggleTerrainLighting).unwrap();
        assert_eq!(world.draw_list().last().unwrap().shading, Shading::Unlit);
        world.apply(InputAction::Quit).unwrap();
        assert!(world.should_quit());
    }

    #[test]
    fn simple_patches_replace_meshes() {
        let mut world = orchestrator(&small_scene());
        world.apply(InputAction::ToggleSimplePatches).unwrap();
        assert!(world.simple_patches());
        let replaced = world
            .backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::Replace { .. }))
            .count();
        assert_eq!(replaced, 4);
        let patch = world
            .backend()
            .meshes()
            .iter()
            .find(|m| m.label == "patch-0")
            .unwrap();
        assert_eq!(patch.vertices, 2 * 4 * 3);
    }

    #[test]
    fn missing_meshes_fall_back_to_cubes() {
        let mut scene = small_scene();
        scene.objects.truncate(1);
        scene.objects[0].mesh = Some("/no/such/anchor.obj".into());
        let world = orchestrator(&scene);
        assert_eq!(world.summary().fallbacks, 1);
        let mesh = world
            .backend()
            .meshes()
            .iter()
            .find(|m| m.label == "anchor")
            .unwrap();
        assert_eq!(mesh.triangles, 12);
    }

    #[test]
    fn instances_share_geometry() {
        let mut scene = small_scene();
        scene.objects.truncate(1);
        let mut copy = ObjectConfig {
            name: "anchor-copy".to_string(),
            instance_of: Some("anchor".to_string()),
            ..scene.objects[0].clone()
        };
        copy.swing = None;
        scene.objects.push(copy);
        let world = orchestrator(&scene);
        let uploads = world
            .backend()
            .meshes()
            .iter()
            .filter(|m| m.label.starts_with("anchor"))
            .count();
        assert_eq!(uploads, 1);
        let draws = world.draw_list();
        let anchor_draws: Vec<_> = draws
            .iter()
            .filter(|d| d.material == scene.objects[0].material)
            .collect();
        assert_eq!(anchor_draws.len(), 2);
        assert_eq!(anchor_draws[0].mesh, anchor_draws[1].mesh);
    }

    #[test]
    fn failed_action_does_not_drop_the_rest_of_the_queue() {
        let mut world = orchestrator(&small_scene());
        let input = world.input();
        input.push(InputAction::ToggleSimplePatches);
        input.push(InputAction::ToggleToon);
        input.push(InputAction::CycleGround);
        world.backend_mut().fail_next_replace();

        assert!(world.frame().is_err());
        assert!(!world.toon());
        assert_eq!(world.active_ground(), 1);
        assert!(input.is_empty());
        assert!(world.backend().frame_brackets().is_empty());

        world.frame().unwrap();
        assert_eq!(world.backend().frame_brackets(), ["begin", "end"]);
    }

    #[test]
    fn input_is_applied_at_frame_start() {
        let mut world = orchestrator(&small_scene());
        let start = world.camera().position;
        world.input().push(InputAction::MoveForward);
        assert_eq!(world.camera().position, start);
        world.frame().unwrap();
        let moved = world.camera().position - start;
        assert!((moved.length() - MOVE_STEP).abs() < 1e-4);
        assert!(world.input().is_empty());

        world.reset_camera();
        assert_eq!(world.camera().position, start);
        assert_eq!(world.camera().look_at, Vec3::new(-1.0, 0.0, -300.0));
    }
}
