//! A beach scene renderer: an arena scene graph with swinging transforms,
//! heightmap terrain, Bezier patches and a planar water surface composed
//! from reflection and refraction passes.
//!
//! Everything up to the draw list is plain data and can be driven headless
//! through [`render::RecordingBackend`]; the wgpu backend in
//! [`render::native`] only turns draw lists into GPU work.

pub mod camera;
pub mod config;
pub mod error;
pub mod input;
pub mod mesh;
pub mod obj;
pub mod orchestrator;
pub mod patch;
pub mod placement;
pub mod render;
pub mod scene;
pub mod terrain;
pub mod water;

pub use camera::Camera;
pub use config::SceneDescription;
pub use error::{GeometryError, LoadError, RenderError, SceneError};
pub use input::{action_for_key, DragTracker, InputAction, InputQueue, KeyCode};
pub use mesh::{MeshBuffer, Topology};
pub use obj::{load_obj, load_obj_from_str};
pub use orchestrator::{FrameReport, RenderOrchestrator, SceneSummary};
pub use patch::BezierPatch;
pub use placement::{Placement, SpinAxis};
pub use render::{RecordingBackend, RenderBackend, Viewport, WgpuRenderer};
pub use scene::{NodeId, SceneGraph, Swing};
pub use terrain::{generate_terrain, Heightmap, TerrainParams};
pub use water::{WaterConfig, WaterMaps, WaterPhase, WaterPipeline};
