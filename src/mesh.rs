use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// CPU-side geometry shared by every generator and every backend.
///
/// `normals` is either empty or as long as `vertices`, `tex_coords` likewise.
/// `indices` is a triangle list; it may be empty for meshes laid out as strips.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshBuffer {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl MeshBuffer {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Checks the structural invariants: attribute lengths agree with the vertex
    /// count and the index list is whole triangles referencing existing vertices.
    pub fn is_consistent(&self) -> bool {
        let count = self.vertices.len();
        (self.normals.is_empty() || self.normals.len() == count)
            && (self.tex_coords.is_empty() || self.tex_coords.len() == count)
            && self.indices.len() % 3 == 0
            && self.indices.iter().all(|&index| (index as usize) < count)
    }

    /// Rebuilds `normals` as the normalized sum of the face normals of every
    /// triangle touching each vertex.
    ///
    /// Degenerate faces contribute nothing and vertices whose face normals
    /// cancel out are left as the zero vector.
    pub fn compute_smooth_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.vertices.len()];

        for triangle in self.indices.chunks_exact(3) {
            let a = triangle[0] as usize;
            let b = triangle[1] as usize;
            let c = triangle[2] as usize;
            let p0 = self.vertices[a];
            let normal = (self.vertices[b] - p0)
                .cross(self.vertices[c] - p0)
                .normalize_or_zero();
            accum[a] += normal;
            accum[b] += normal;
            accum[c] += normal;
        }

        self.normals = accum.into_iter().map(Vec3::normalize_or_zero).collect();
    }
}

/// How a mesh's vertex stream is assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Indexed triangle list.
    Triangles,
    /// `strips` consecutive, independent triangle strips of `strip_len` vertices each.
    Strips { strips: u32, strip_len: u32 },
}

/// Unit cube with per-face normals, used in place of meshes that fail to load.
pub fn unit_cube() -> MeshBuffer {
    const FACES: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    ];

    let mut mesh = MeshBuffer::default();
    for (normal, right, up) in FACES {
        let base = mesh.vertices.len() as u32;
        let center = normal * 0.5;
        for (s, t) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            mesh.vertices.push(center + right * s + up * t);
            mesh.normals.push(normal);
            mesh.tex_coords.push(Vec2::new(s + 0.5, t + 0.5));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_is_consistent_and_faces_outward() {
        let cube = unit_cube();
        assert!(cube.is_consistent());
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        for triangle in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| cube.vertices[triangle[k] as usize]);
            let face = (b - a).cross(c - a).normalize();
            let stored = cube.normals[triangle[0] as usize];
            assert!(face.abs_diff_eq(stored, 1e-6), "{face} vs {stored}");
        }
    }

    #[test]
    fn smooth_normals_are_unit_length() {
        let mut mesh = MeshBuffer {
            vertices: vec![
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            indices: vec![0, 1, 2, 0, 3, 1],
            ..MeshBuffer::default()
        };
        mesh.compute_smooth_normals();
        for normal in &mesh.normals[..2] {
            assert!((normal.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn degenerate_triangle_leaves_zero_normal() {
        let mut mesh = MeshBuffer {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0],
            indices: vec![0, 1, 2],
            ..MeshBuffer::default()
        };
        mesh.compute_smooth_normals();
        assert!(mesh.normals.iter().all(|n| *n == Vec3::ZERO));
    }

    #[test]
    fn out_of_range_index_is_inconsistent() {
        let mesh = MeshBuffer {
            vertices: vec![Vec3::ZERO; 3],
            indices: vec![0, 1, 3],
            ..MeshBuffer::default()
        };
        assert!(!mesh.is_consistent());
    }
}
