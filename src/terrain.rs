use std::path::Path;

use glam::{Vec2, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, LoadError};
use crate::mesh::MeshBuffer;

/// Row-major grid of height samples normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heightmap {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

impl Heightmap {
    pub fn new(width: usize, height: usize, samples: Vec<f32>) -> Result<Self, GeometryError> {
        if width < 2 || height < 2 {
            return Err(GeometryError::HeightmapTooSmall { width, height });
        }
        if samples.len() != width * height {
            return Err(GeometryError::SampleCountMismatch {
                expected: width * height,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Wraps 8-bit grayscale pixels.
    pub fn from_luma(width: usize, height: usize, pixels: &[u8]) -> Result<Self, GeometryError> {
        let samples = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
        Self::new(width, height, samples)
    }

    /// Decodes an image file and converts it to 8-bit luma.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|source| LoadError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();
        let (width, height) = image.dimensions();
        debug!("decoded heightmap {} ({width}x{height})", path.display());
        Self::from_luma(width as usize, height as usize, image.as_raw()).map_err(|source| {
            LoadError::Heightmap {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Procedural beach: flat dunes inland sloping down under the water
    /// towards the far edge, with a gentle ripple across the shore.
    pub fn shoreline(size: usize) -> Self {
        let size = size.max(2);
        let last = (size - 1) as f32;
        let mut samples = Vec::with_capacity(size * size);
        for j in 0..size {
            for i in 0..size {
                let s = i as f32 / last;
                let t = j as f32 / last;
                let slope = 1.0 - smoothstep(0.35, 0.75, s);
                let ripple = 0.04 * (t * std::f32::consts::TAU * 3.0).sin() * slope;
                samples.push((0.15 + 0.35 * slope + ripple).clamp(0.0, 1.0));
            }
        }
        Self {
            width: size,
            height: size,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn sample(&self, i: usize, j: usize) -> f32 {
        self.samples[j * self.width + i]
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// World-space sizing of a generated grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainParams {
    pub extent_x: f32,
    pub extent_z: f32,
    pub height_scale: f32,
    pub ground_offset: f32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            extent_x: 1000.0,
            extent_z: 1000.0,
            height_scale: 50.0,
            ground_offset: -14.0,
        }
    }
}

/// Builds the triangulated terrain grid for a heightmap.
pub fn generate_terrain(map: &Heightmap, params: &TerrainParams) -> MeshBuffer {
    grid_mesh(map.width, map.height, params, |i, j| map.sample(i, j))
}

/// Builds a flat grid at height `level`, used for the water surface.
pub fn flat_grid(
    width: usize,
    height: usize,
    extent_x: f32,
    extent_z: f32,
    level: f32,
) -> Result<MeshBuffer, GeometryError> {
    if width < 2 || height < 2 {
        return Err(GeometryError::HeightmapTooSmall { width, height });
    }
    let params = TerrainParams {
        extent_x,
        extent_z,
        height_scale: 0.0,
        ground_offset: level,
    };
    Ok(grid_mesh(width, height, &params, |_, _| 0.0))
}

fn grid_mesh(
    width: usize,
    height: usize,
    params: &TerrainParams,
    sample: impl Fn(usize, usize) -> f32,
) -> MeshBuffer {
    let count = width * height;
    let mut mesh = MeshBuffer {
        vertices: Vec::with_capacity(count),
        normals: Vec::new(),
        tex_coords: Vec::with_capacity(count),
        indices: grid_indices(width, height),
    };

    let half_x = params.extent_x * 0.5;
    let half_z = params.extent_z * 0.5;
    for j in 0..height {
        for i in 0..width {
            let s = i as f32 / (width - 1) as f32;
            let t = j as f32 / (height - 1) as f32;
            mesh.vertices.push(Vec3::new(
                s * params.extent_x - half_x,
                sample(i, j) * params.height_scale + params.ground_offset,
                t * params.extent_z - half_z,
            ));
            mesh.tex_coords.push(Vec2::new(s, t));
        }
    }

    mesh.compute_smooth_normals();
    mesh
}

/// Two triangles per grid quad with the fixed winding
/// `(v, v+w+1, v+1)` and `(v, v+w, v+w+1)`.
pub fn grid_indices(width: usize, height: usize) -> Vec<u32> {
    if width < 2 || height < 2 {
        return Vec::new();
    }
    let w = width as u32;
    let mut indices = Vec::with_capacity((width - 1) * (height - 1) * 6);
    for j in 0..(height - 1) as u32 {
        for i in 0..(width - 1) as u32 {
            let v = j * w + i;
            indices.extend_from_slice(&[v, v + w + 1, v + 1, v, v + w, v + w + 1]);
        }
    }
    indices
}
