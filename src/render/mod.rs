//! Backend seam between the scene/water logic and the GPU.
//!
//! Everything above this module speaks in [`MeshBuffer`]s, [`DrawCommand`]s and
//! per-pass [`FrameUniforms`]; a backend turns those into API calls. The wgpu
//! backend lives in [`native`], a recording backend for headless runs and tests
//! in [`recording`].

pub mod common;
pub mod native;
pub mod recording;

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::mesh::{MeshBuffer, Topology};
use crate::water::WaterMaps;

pub use native::WgpuRenderer;
pub use recording::{RecordedCall, RecordingBackend};

/// Handle to a mesh uploaded to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshHandle(usize);

impl MeshHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Phong material; `ambient`, `diffuse` and `specular` scale the base color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub color: Vec3,
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Vec3::splat(0.5),
            ambient: 0.3,
            diffuse: 1.0,
            specular: 0.5,
            shininess: 32.0,
        }
    }
}

impl Material {
    pub fn new(color: Vec3, ambient: f32, diffuse: f32, specular: f32, shininess: f32) -> Self {
        Self {
            color,
            ambient,
            diffuse,
            specular,
            shininess,
        }
    }

    /// Packs the coefficients as `(ambient, diffuse, specular, shininess)`.
    pub fn coefficients(&self) -> Vec4 {
        Vec4::new(self.ambient, self.diffuse, self.specular, self.shininess)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Shading {
    #[default]
    Lit,
    /// Base color only, used for terrain when illumination is switched off.
    Unlit,
}

/// The three scene passes of a frame. Water composition is separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassKind {
    Reflection,
    Refraction,
    Main,
}

impl PassKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Reflection => "reflection",
            Self::Refraction => "refraction",
            Self::Main => "main",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Directional light shared by every pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub direction: Vec3,
    pub color: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.3, 0.2, -1.0),
            color: Vec3::ONE,
        }
    }
}

/// Per-pass state: camera matrices, lighting and the optional clip plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub camera_position: Vec3,
    pub light: Light,
    /// Plane `(a, b, c, d)`; fragments with `dot(plane, (p, 1)) < 0` are discarded.
    pub clip_plane: Option<Vec4>,
    pub toon: bool,
}

/// One geometry leaf reached during a scene walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub mesh: MeshHandle,
    pub model: Mat4,
    pub material: Material,
    pub shading: Shading,
}

/// Parameters for the water composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterUniforms {
    pub model: Mat4,
    pub move_factor: f32,
    pub level: f32,
    /// Clip distances of the camera, for linearizing depth.
    pub near: f32,
    pub far: f32,
}

/// Rendering API consumed by the water pipeline and the orchestrator.
pub trait RenderBackend {
    fn upload_mesh(
        &mut self,
        label: &str,
        mesh: &MeshBuffer,
        topology: Topology,
    ) -> Result<MeshHandle, RenderError>;

    /// Swaps the contents behind an existing handle, e.g. after a level of detail change.
    fn replace_mesh(
        &mut self,
        handle: MeshHandle,
        mesh: &MeshBuffer,
        topology: Topology,
    ) -> Result<(), RenderError>;

    fn upload_water_maps(&mut self, maps: &WaterMaps) -> Result<(), RenderError>;

    /// Recreates the reflection and refraction targets at the given size.
    fn resize_targets(&mut self, viewport: Viewport) -> Result<(), RenderError>;

    fn begin_frame(&mut self) -> Result<(), RenderError>;

    fn render_pass(
        &mut self,
        pass: PassKind,
        frame: &FrameUniforms,
        draws: &[DrawCommand],
    ) -> Result<(), RenderError>;

    fn composite_water(
        &mut self,
        mesh: MeshHandle,
        frame: &FrameUniforms,
        water: &WaterUniforms,
    ) -> Result<(), RenderError>;

    fn end_frame(&mut self) -> Result<(), RenderError>;

    /// Drops a frame opened by `begin_frame` without presenting it.
    fn abort_frame(&mut self);
}
