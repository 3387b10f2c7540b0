//! Reflective water surface.
//!
//! Each frame the scene is rendered three times: from a camera mirrored
//! below the water plane into the reflection target, from the true camera
//! into the refraction target, and finally into the visible framebuffer. The
//! water grid is then composited on top using both captured targets.

use std::path::{Path, PathBuf};

use glam::{Mat4, Vec4};
use image::{Rgba, RgbaImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::error::{LoadError, RenderError};
use crate::mesh::{MeshBuffer, Topology};
use crate::render::{
    DrawCommand, FrameUniforms, MeshHandle, PassKind, RenderBackend, Viewport, WaterUniforms,
};
use crate::terrain::flat_grid;

/// Position of the pipeline inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaterPhase {
    Idle,
    Reflect,
    Refract,
    Main,
    Composite,
}

impl WaterPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Reflect,
            Self::Reflect => Self::Refract,
            Self::Refract => Self::Main,
            Self::Main => Self::Composite,
            Self::Composite => Self::Idle,
        }
    }
}

/// Horizontal clip plane. `direction` +1 keeps geometry above `level`,
/// -1 keeps geometry below it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipPlane {
    pub direction: f32,
    pub level: f32,
}

impl ClipPlane {
    pub fn above(level: f32) -> Self {
        Self {
            direction: 1.0,
            level,
        }
    }

    pub fn below(level: f32) -> Self {
        Self {
            direction: -1.0,
            level,
        }
    }

    pub fn equation(&self) -> Vec4 {
        Vec4::new(0.0, self.direction, 0.0, -self.direction * self.level)
    }

    pub fn keeps(&self, y: f32) -> bool {
        self.direction * y - self.direction * self.level >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterConfig {
    pub level: f32,
    /// Samples per side of the water grid.
    pub grid: usize,
    pub extent: f32,
    /// Scroll offset added to the move factor every frame.
    pub wave_speed: f32,
    /// Raises the clip planes slightly to hide seams at the shoreline.
    pub clip_bias: f32,
    pub dudv_map: Option<PathBuf>,
    pub normal_map: Option<PathBuf>,
}

impl Default for WaterConfig {
    fn default() -> Self {
        Self {
            level: -6.0,
            grid: 75,
            extent: 1000.0,
            wave_speed: 0.002,
            clip_bias: 0.01,
            dudv_map: None,
            normal_map: None,
        }
    }
}

/// Distortion and normal textures sampled by the water composite.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterMaps {
    pub dudv: RgbaImage,
    pub normal: RgbaImage,
}

impl Default for WaterMaps {
    fn default() -> Self {
        Self {
            dudv: flat_dudv(),
            normal: flat_normal(),
        }
    }
}

impl WaterMaps {
    /// Loads both maps, substituting a flat placeholder for any that is
    /// unset or fails to decode.
    pub fn load(dudv: Option<&Path>, normal: Option<&Path>) -> Self {
        Self {
            dudv: load_or(dudv, "dudv", flat_dudv),
            normal: load_or(normal, "normal", flat_normal),
        }
    }
}

fn load_or(path: Option<&Path>, kind: &str, fallback: fn() -> RgbaImage) -> RgbaImage {
    let Some(path) = path else {
        return fallback();
    };
    match load_rgba(path) {
        Ok(image) => image,
        Err(err) => {
            warn!("using flat {kind} map: {err}");
            fallback()
        }
    }
}

pub fn load_rgba(path: &Path) -> Result<RgbaImage, LoadError> {
    let image = image::open(path)
        .map_err(|source| LoadError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(LoadError::EmptyImage {
            path: path.to_path_buf(),
        });
    }
    Ok(image)
}

fn flat_dudv() -> RgbaImage {
    RgbaImage::from_pixel(4, 4, Rgba([128, 128, 0, 255]))
}

fn flat_normal() -> RgbaImage {
    RgbaImage::from_pixel(4, 4, Rgba([128, 128, 255, 255]))
}

/// Water grid, offscreen target bookkeeping and the per-frame pass sequence.
#[derive(Debug)]
pub struct WaterPipeline {
    config: WaterConfig,
    mesh: MeshBuffer,
    handle: MeshHandle,
    phase: WaterPhase,
    move_factor: f32,
    targets: Option<Viewport>,
}

impl WaterPipeline {
    /// Builds the water grid and uploads it along with the water maps.
    pub fn new<B: RenderBackend>(
        config: WaterConfig,
        maps: &WaterMaps,
        backend: &mut B,
    ) -> Result<Self, RenderError> {
        let mesh = flat_grid(
            config.grid,
            config.grid,
            config.extent,
            config.extent,
            config.level,
        )?;
        let handle = backend.upload_mesh("water", &mesh, Topology::Triangles)?;
        backend.upload_water_maps(maps)?;
        Ok(Self {
            config,
            mesh,
            handle,
            phase: WaterPhase::Idle,
            move_factor: 0.0,
            targets: None,
        })
    }

    pub fn config(&self) -> &WaterConfig {
        &self.config
    }

    pub fn level(&self) -> f32 {
        self.config.level
    }

    pub fn mesh(&self) -> &MeshBuffer {
        &self.mesh
    }

    pub fn handle(&self) -> MeshHandle {
        self.handle
    }

    pub fn phase(&self) -> WaterPhase {
        self.phase
    }

    pub fn move_factor(&self) -> f32 {
        self.move_factor
    }

    /// Size the offscreen targets were last allocated at.
    pub fn target_size(&self) -> Option<Viewport> {
        self.targets
    }

    pub fn reflection_clip(&self) -> ClipPlane {
        ClipPlane::above(self.config.level + self.config.clip_bias)
    }

    pub fn refraction_clip(&self) -> ClipPlane {
        ClipPlane::below(self.config.level + self.config.clip_bias)
    }

    /// Runs the four passes of one frame.
    ///
    /// `uniforms` builds the per-pass state from the camera to render with and
    /// the clip plane to apply. The camera is mirrored for the reflection pass
    /// and restored before anything else reads it, including when a pass fails.
    pub fn render_frame<B, F>(
        &mut self,
        backend: &mut B,
        camera: &mut Camera,
        viewport: Viewport,
        draws: &[DrawCommand],
        uniforms: F,
    ) -> Result<(), RenderError>
    where
        B: RenderBackend,
        F: Fn(&Camera, Option<Vec4>) -> FrameUniforms,
    {
        if self.phase != WaterPhase::Idle {
            return Err(RenderError::PassOrder {
                expected: WaterPhase::Idle,
                found: self.phase,
            });
        }
        let saved = camera.clone();
        let result = self.run_passes(backend, camera, viewport, draws, &uniforms);
        if result.is_err() {
            *camera = saved;
            self.phase = WaterPhase::Idle;
        }
        result
    }

    fn run_passes<B, F>(
        &mut self,
        backend: &mut B,
        camera: &mut Camera,
        viewport: Viewport,
        draws: &[DrawCommand],
        uniforms: &F,
    ) -> Result<(), RenderError>
    where
        B: RenderBackend,
        F: Fn(&Camera, Option<Vec4>) -> FrameUniforms,
    {
        if self.targets != Some(viewport) && !viewport.is_empty() {
            backend.resize_targets(viewport)?;
            self.targets = Some(viewport);
        }

        self.enter(WaterPhase::Reflect)?;
        let saved = camera.clone();
        camera.mirror_about(self.config.level);
        camera.update_view();
        let reflected = uniforms(camera, Some(self.reflection_clip().equation()));
        *camera = saved;
        backend.render_pass(PassKind::Reflection, &reflected, draws)?;

        self.enter(WaterPhase::Refract)?;
        let refracted = uniforms(camera, Some(self.refraction_clip().equation()));
        backend.render_pass(PassKind::Refraction, &refracted, draws)?;

        self.enter(WaterPhase::Main)?;
        let main = uniforms(camera, None);
        backend.render_pass(PassKind::Main, &main, draws)?;

        self.enter(WaterPhase::Composite)?;
        self.move_factor = (self.move_factor + self.config.wave_speed) % 1.0;
        let water = WaterUniforms {
            model: Mat4::IDENTITY,
            move_factor: self.move_factor,
            level: self.config.level,
            near: camera.near,
            far: camera.far,
        };
        backend.composite_water(self.handle, &main, &water)?;

        self.enter(WaterPhase::Idle)?;
        Ok(())
    }

    fn enter(&mut self, phase: WaterPhase) -> Result<(), RenderError> {
        let expected = self.phase.next();
        if phase != expected {
            return Err(RenderError::PassOrder {
                expected,
                found: phase,
            });
        }
        debug!("water phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::render::{Light, RecordedCall, RecordingBackend};

    fn uniforms(camera: &Camera, clip: Option<Vec4>) -> FrameUniforms {
        FrameUniforms {
            projection: camera.projection(),
            view: camera.view(),
            camera_position: camera.position,
            light: Light::default(),
            clip_plane: clip,
            toon: false,
        }
    }

    fn pipeline(backend: &mut RecordingBackend) -> WaterPipeline {
        WaterPipeline::new(WaterConfig::default(), &WaterMaps::default(), backend).unwrap()
    }

    fn passes(backend: &RecordingBackend) -> Vec<RecordedCall> {
        backend
            .calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::Pass { .. }))
            .cloned()
            .collect()
    }

    #[test]
    fn phases_cycle_back_to_idle() {
        let mut phase = WaterPhase::Idle;
        let mut seen = Vec::new();
        for _ in 0..5 {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                WaterPhase::Reflect,
                WaterPhase::Refract,
                WaterPhase::Main,
                WaterPhase::Composite,
                WaterPhase::Idle
            ]
        );
    }

    #[test]
    fn clip_planes_split_at_the_water_level() {
        let above = ClipPlane::above(-5.99);
        assert_eq!(above.equation(), Vec4::new(0.0, 1.0, 0.0, 5.99));
        assert!(above.keeps(0.0));
        assert!(!above.keeps(-10.0));

        let below = ClipPlane::below(-5.99);
        assert_eq!(below.equation(), Vec4::new(0.0, -1.0, 0.0, -5.99));
        assert!(below.keeps(-10.0));
        assert!(!below.keeps(0.0));
    }

    #[test]
    fn frame_runs_passes_in_order() {
        let mut backend = RecordingBackend::new();
        let mut water = pipeline(&mut backend);
        let mut camera = Camera::default();
        water
            .render_frame(&mut backend, &mut camera, Viewport::new(64, 48), &[], uniforms)
            .unwrap();
        assert_eq!(
            backend.pass_sequence(),
            vec!["reflection", "refraction", "main", "water"]
        );
        assert_eq!(water.phase(), WaterPhase::Idle);
    }

    #[test]
    fn reflection_uses_mirrored_camera_and_restores_it() {
        let mut backend = RecordingBackend::new();
        let mut water = pipeline(&mut backend);
        let mut camera = Camera::new(Vec3::new(10.0, 4.0, 3.0), Vec3::new(0.0, -2.0, -50.0), Vec3::Y);
        let before = camera.clone();
        water
            .render_frame(&mut backend, &mut camera, Viewport::new(64, 48), &[], uniforms)
            .unwrap();
        assert_eq!(camera, before);

        let passes = passes(&backend);
        let RecordedCall::Pass { kind, frame, .. } = &passes[0] else {
            unreachable!()
        };
        assert_eq!(*kind, PassKind::Reflection);
        assert_eq!(frame.camera_position, Vec3::new(10.0, -16.0, 3.0));
        assert_eq!(frame.clip_plane, Some(water.reflection_clip().equation()));

        let RecordedCall::Pass { frame, .. } = &passes[1] else {
            unreachable!()
        };
        assert_eq!(frame.camera_position, before.position);
        assert_eq!(frame.view, before.view());
        assert_eq!(frame.clip_plane, Some(water.refraction_clip().equation()));

        let RecordedCall::Pass { frame, .. } = &passes[2] else {
            unreachable!()
        };
        assert_eq!(frame.clip_plane, None);
    }

    #[test]
    fn targets_follow_viewport_changes() {
        let mut backend = RecordingBackend::new();
        let mut water = pipeline(&mut backend);
        let mut camera = Camera::default();
        for viewport in [
            Viewport::new(64, 48),
            Viewport::new(64, 48),
            Viewport::new(128, 96),
        ] {
            water
                .render_frame(&mut backend, &mut camera, viewport, &[], uniforms)
                .unwrap();
        }
        let resizes: Vec<_> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::ResizeTargets(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(resizes, vec![Viewport::new(64, 48), Viewport::new(128, 96)]);
        assert_eq!(water.target_size(), Some(Viewport::new(128, 96)));
    }

    #[test]
    fn failed_target_allocation_leaves_pipeline_idle() {
        let mut backend = RecordingBackend::new();
        let mut water = pipeline(&mut backend);
        let mut camera = Camera::default();
        backend.fail_next_resize();
        let err = water
            .render_frame(&mut backend, &mut camera, Viewport::new(32, 32), &[], uniforms)
            .unwrap_err();
        assert!(matches!(err, RenderError::TargetAllocation { .. }));
        assert_eq!(water.phase(), WaterPhase::Idle);
        assert_eq!(water.target_size(), None);
        assert!(passes(&backend).is_empty());
    }

    #[test]
    fn move_factor_advances_and_stays_bounded() {
        let mut backend = RecordingBackend::new();
        let mut water = pipeline(&mut backend);
        let mut camera = Camera::default();
        let viewport = Viewport::new(16, 16);
        water
            .render_frame(&mut backend, &mut camera, viewport, &[], uniforms)
            .unwrap();
        assert!((water.move_factor() - 0.002).abs() < 1e-7);
        for _ in 0..1200 {
            water
                .render_frame(&mut backend, &mut camera, viewport, &[], uniforms)
                .unwrap();
            assert!((0.0..1.0).contains(&water.move_factor()));
        }
    }

    #[test]
    fn water_grid_matches_config() {
        let mut backend = RecordingBackend::new();
        let water = pipeline(&mut backend);
        assert_eq!(water.mesh().indices.len(), 32856);
        assert!(water.mesh().vertices.iter().all(|v| v.y == -6.0));
        assert_eq!(backend.mesh(water.handle()).unwrap().label, "water");
    }

    #[test]
    fn missing_maps_fall_back_to_flat_placeholders() {
        let maps = WaterMaps::load(Some(Path::new("/no/such/dudv.png")), None);
        assert_eq!(maps, WaterMaps::default());
        assert_eq!(maps.normal.get_pixel(0, 0), &Rgba([128, 128, 255, 255]));
    }
}
