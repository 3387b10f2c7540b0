use std::path::PathBuf;

use thiserror::Error;

use crate::scene::NodeId;

/// Failure to bring an external asset (mesh, heightmap, texture) into memory.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to decode image {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid OBJ data on line {line}: {message}")]
    Obj { line: usize, message: String },
    #[error("OBJ data does not define any vertices")]
    NoVertices,
    #[error("image {path} has no pixels")]
    EmptyImage { path: PathBuf },
    #[error("image {path} cannot be used as a heightmap")]
    Heightmap {
        path: PathBuf,
        #[source]
        source: GeometryError,
    },
}

/// Rejected input to one of the procedural mesh generators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("heightmap must be at least 2x2 samples, got {width}x{height}")]
    HeightmapTooSmall { width: usize, height: usize },
    #[error("heightmap expects {expected} samples, got {actual}")]
    SampleCountMismatch { expected: usize, actual: usize },
}

/// Invalid edit of the scene graph arena.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("node {0:?} does not exist in this graph")]
    UnknownNode(NodeId),
    #[error("node {0:?} is geometry and cannot hold children")]
    NotATransform(NodeId),
    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}

/// Failure reported by a render backend or by the pass sequencing itself.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to allocate {label} ({width}x{height}): {message}")]
    TargetAllocation {
        label: &'static str,
        width: u32,
        height: u32,
        message: String,
    },
    #[error("presentation surface was lost or outdated")]
    SurfaceLost,
    #[error("GPU is out of memory")]
    OutOfMemory,
    #[error("unknown mesh handle {0}")]
    UnknownMesh(usize),
    #[error("water pass {found:?} started while pipeline was in {expected:?}")]
    PassOrder {
        expected: crate::water::WaterPhase,
        found: crate::water::WaterPhase,
    },
    #[error("render backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
