//! Bicubic Bezier patches.
//!
//! A patch is described by 16 control points laid out row-major on a 4x4 grid
//! (point `(i, j)` lives at index `4 * i + j`). The surface is sampled on a
//! regular `n x n` parameter grid and handed to the renderer as `n - 1`
//! triangle strips, one per pair of neighbouring parameter rows.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::mesh::{MeshBuffer, Topology};

/// Points per parametric curve used for the detailed surface.
pub const DETAILED_RESOLUTION: usize = 7;
/// Points per parametric curve used when simple patches are requested.
pub const SIMPLE_RESOLUTION: usize = 4;

/// Cross products shorter than this are left unnormalized.
const NORMAL_EPSILON: f32 = 1e-12;

/// Evaluates the cubic Bernstein polynomial at `t`.
pub fn curve_point(t: f32, p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3) -> Vec3 {
    let s = 1.0 - t;
    s * s * s * p0 + 3.0 * s * s * t * p1 + 3.0 * s * t * t * p2 + t * t * t * p3
}

/// Derivative of [`curve_point`] with respect to `t`.
pub fn curve_tangent(t: f32, p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3) -> Vec3 {
    let s = 1.0 - t;
    -3.0 * s * s * p0 + 3.0 * s * s * p1 - 6.0 * t * s * p1 + 6.0 * t * s * p2
        - 3.0 * t * t * p2
        + 3.0 * t * t * p3
}

/// Samples a single cubic curve at `count` evenly spaced parameters.
///
/// Returns nothing for fewer than two points.
pub fn curve_points(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, count: usize) -> Vec<Vec3> {
    parameters(count)
        .map(|t| curve_point(t, p0, p1, p2, p3))
        .collect()
}

/// One evaluated surface sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Evaluates position and normal of the surface at `(u, v)`.
///
/// A flat control grid has a vanishing tangent along one direction; the
/// resulting zero normal is returned as-is instead of being normalized.
pub fn surface_point(u: f32, v: f32, pts: &[Vec3; 16]) -> SurfacePoint {
    let row = |i: usize| curve_point(u, pts[4 * i], pts[4 * i + 1], pts[4 * i + 2], pts[4 * i + 3]);
    let column = |j: usize| curve_point(v, pts[j], pts[4 + j], pts[8 + j], pts[12 + j]);

    let (q0, q1, q2, q3) = (row(0), row(1), row(2), row(3));
    let (r0, r1, r2, r3) = (column(0), column(1), column(2), column(3));

    let position = curve_point(v, q0, q1, q2, q3);
    let tangent_v = curve_tangent(v, q0, q1, q2, q3);
    let tangent_u = curve_tangent(u, r0, r1, r2, r3);
    let normal = tangent_u.cross(tangent_v);
    let normal = if normal.length_squared() > NORMAL_EPSILON {
        normal.normalize()
    } else {
        normal
    };

    SurfacePoint { position, normal }
}

/// Evaluated `n x n` sample grid, indexed `[u][v]` in row-major order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatchGrid {
    resolution: usize,
    points: Vec<SurfacePoint>,
}

impl PatchGrid {
    /// Samples the patch at `resolution` points per curve.
    ///
    /// Resolutions below two produce an empty grid.
    pub fn generate(pts: &[Vec3; 16], resolution: usize) -> Self {
        let points = parameters(resolution)
            .flat_map(|u| parameters(resolution).map(move |v| surface_point(u, v, pts)))
            .collect();
        Self {
            resolution: if resolution < 2 { 0 } else { resolution },
            points,
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn points(&self) -> &[SurfacePoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, u_index: usize, v_index: usize) -> Option<&SurfacePoint> {
        if u_index >= self.resolution || v_index >= self.resolution {
            return None;
        }
        self.points.get(u_index * self.resolution + v_index)
    }

    /// Arranges the grid as `n - 1` strips of `2n` vertices. Strip `k`
    /// alternates between parameter rows `v = k` and `v = k + 1` while walking `u`.
    pub fn to_strip_mesh(&self) -> (MeshBuffer, Topology) {
        let n = self.resolution;
        let mut mesh = MeshBuffer::default();
        if n < 2 {
            return (
                mesh,
                Topology::Strips {
                    strips: 0,
                    strip_len: 0,
                },
            );
        }

        mesh.vertices.reserve(2 * n * (n - 1));
        mesh.normals.reserve(2 * n * (n - 1));
        for strip in 0..n - 1 {
            for u_index in 0..n {
                for v_index in [strip, strip + 1] {
                    let sample = self.points[u_index * n + v_index];
                    mesh.vertices.push(sample.position);
                    mesh.normals.push(sample.normal);
                }
            }
        }

        (
            mesh,
            Topology::Strips {
                strips: (n - 1) as u32,
                strip_len: (2 * n) as u32,
            },
        )
    }
}

/// Curved surface object placed in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BezierPatch {
    pub control_points: [Vec3; 16],
    pub position: Vec3,
    simple: bool,
}

impl BezierPatch {
    pub fn new(position: Vec3, control_points: [Vec3; 16]) -> Self {
        Self {
            control_points,
            position,
            simple: false,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    pub fn resolution(&self) -> usize {
        if self.simple {
            SIMPLE_RESOLUTION
        } else {
            DETAILED_RESOLUTION
        }
    }

    /// Switches the level of detail. The caller regenerates the mesh afterwards.
    pub fn set_simple(&mut self, simple: bool) {
        self.simple = simple;
    }

    pub fn to_world(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    pub fn generate_mesh(&self) -> (MeshBuffer, Topology) {
        PatchGrid::generate(&self.control_points, self.resolution()).to_strip_mesh()
    }
}

fn parameters(count: usize) -> impl Iterator<Item = f32> {
    let steps = count.saturating_sub(1).max(1) as f32;
    let count = if count < 2 { 0 } else { count };
    (0..count).map(move |index| index as f32 / steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_grid() -> [Vec3; 16] {
        let mut pts = [Vec3::ZERO; 16];
        for i in 0..4 {
            for j in 0..4 {
                pts[4 * i + j] = Vec3::new(j as f32 * 3.0, 0.0, i as f32 * -3.0);
            }
        }
        pts
    }

    fn bumpy_grid() -> [Vec3; 16] {
        let mut pts = flat_grid();
        pts[5].y = 1.0;
        pts[6].y = 0.5;
        pts[9].y = -1.0;
        pts[10].y = 2.0;
        pts[3].y = 0.25;
        pts
    }

    #[test]
    fn curve_interpolates_its_endpoints() {
        let p0 = Vec3::new(-9.0, 0.3, 9.0);
        let p1 = Vec3::new(-6.0, 1.0, 6.0);
        let p2 = Vec3::new(-3.0, -0.5, 3.1);
        let p3 = Vec3::new(0.7, 0.0, 0.0);
        assert_eq!(curve_point(0.0, p0, p1, p2, p3), p0);
        assert_eq!(curve_point(1.0, p0, p1, p2, p3), p3);
    }

    #[test]
    fn tangent_matches_finite_difference() {
        let p0 = Vec3::new(0.0, 0.0, 0.0);
        let p1 = Vec3::new(1.0, 2.0, 0.0);
        let p2 = Vec3::new(2.0, -1.0, 1.0);
        let p3 = Vec3::new(3.0, 0.0, 0.0);
        let t = 0.4;
        let h = 1e-3;
        let numeric =
            (curve_point(t + h, p0, p1, p2, p3) - curve_point(t - h, p0, p1, p2, p3)) / (2.0 * h);
        assert!(curve_tangent(t, p0, p1, p2, p3).abs_diff_eq(numeric, 1e-2));
    }

    #[test]
    fn curve_points_respects_count() {
        let points = curve_points(Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE, 5);
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], Vec3::ZERO);
        assert_eq!(points[4], Vec3::ONE);
        assert!(curve_points(Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE, 1).is_empty());
    }

    #[test]
    fn corners_reproduce_control_points() {
        let pts = bumpy_grid();
        for n in 2..=9 {
            let grid = PatchGrid::generate(&pts, n);
            assert_eq!(grid.points().len(), n * n);
            assert_eq!(grid.get(0, 0).unwrap().position, pts[0]);
            assert_eq!(grid.get(n - 1, 0).unwrap().position, pts[3]);
            assert_eq!(grid.get(0, n - 1).unwrap().position, pts[12]);
            assert_eq!(grid.get(n - 1, n - 1).unwrap().position, pts[15]);
        }
    }

    #[test]
    fn flat_patch_stays_in_plane() {
        let grid = PatchGrid::generate(&flat_grid(), 7);
        assert_eq!(grid.points().len(), 49);
        assert!(grid.points().iter().all(|p| p.position.y == 0.0));
        for point in grid.points() {
            assert!(point.normal.abs_diff_eq(Vec3::Y, 1e-5), "{}", point.normal);
        }
    }

    #[test]
    fn collapsed_patch_does_not_panic() {
        let grid = PatchGrid::generate(&[Vec3::ONE; 16], 4);
        assert!(grid.points().iter().all(|p| p.normal == Vec3::ZERO));
    }

    #[test]
    fn low_resolution_is_empty() {
        assert!(PatchGrid::generate(&flat_grid(), 1).is_empty());
        assert!(PatchGrid::generate(&flat_grid(), 0).is_empty());
        let (mesh, topology) = PatchGrid::generate(&flat_grid(), 1).to_strip_mesh();
        assert!(mesh.is_empty());
        assert_eq!(
            topology,
            Topology::Strips {
                strips: 0,
                strip_len: 0
            }
        );
    }

    #[test]
    fn strips_interleave_neighbouring_rows() {
        let grid = PatchGrid::generate(&bumpy_grid(), 7);
        let (mesh, topology) = grid.to_strip_mesh();
        assert_eq!(
            topology,
            Topology::Strips {
                strips: 6,
                strip_len: 14
            }
        );
        assert_eq!(mesh.vertices.len(), 6 * 14);
        assert_eq!(mesh.normals.len(), mesh.vertices.len());
        // strip 2, third pair: u index 2, rows v = 2 and v = 3
        assert_eq!(mesh.vertices[2 * 14 + 4], grid.get(2, 2).unwrap().position);
        assert_eq!(mesh.vertices[2 * 14 + 5], grid.get(2, 3).unwrap().position);
    }

    #[test]
    fn level_of_detail_changes_resolution() {
        let mut patch = BezierPatch::new(Vec3::new(180.0, -4.8, -5.0), bumpy_grid());
        assert_eq!(patch.generate_mesh().0.vertices.len(), 2 * 7 * 6);
        patch.set_simple(true);
        assert_eq!(patch.generate_mesh().0.vertices.len(), 2 * 4 * 3);
        assert_eq!(
            patch.to_world().transform_point3(Vec3::ZERO),
            Vec3::new(180.0, -4.8, -5.0)
        );
    }
}
