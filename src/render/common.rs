//! GPU-facing data layouts shared by the wgpu pipelines.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec4};

use super::{DrawCommand, FrameUniforms, Shading, WaterUniforms};
use crate::mesh::MeshBuffer;

/// Interleaved vertex: position, normal, texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Interleaves a mesh; missing normals or texture coordinates become zero.
pub fn interleave(mesh: &MeshBuffer) -> Vec<Vertex> {
    mesh.vertices
        .iter()
        .enumerate()
        .map(|(index, position)| Vertex {
            position: position.to_array(),
            normal: mesh
                .normals
                .get(index)
                .map(|n| n.to_array())
                .unwrap_or_default(),
            tex_coord: mesh
                .tex_coords
                .get(index)
                .map(|t| t.to_array())
                .unwrap_or_default(),
        })
        .collect()
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUniform {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub light_direction: [f32; 4],
    pub light_color: [f32; 4],
    pub clip_plane: [f32; 4],
    /// x: clip plane enabled, y: toon shading.
    pub flags: [f32; 4],
}

impl GlobalUniform {
    pub fn from_frame(frame: &FrameUniforms) -> Self {
        let clip = frame.clip_plane.unwrap_or(Vec4::ZERO);
        Self {
            projection: frame.projection.to_cols_array_2d(),
            view: frame.view.to_cols_array_2d(),
            camera_position: frame.camera_position.extend(1.0).into(),
            light_direction: frame.light.direction.normalize_or_zero().extend(0.0).into(),
            light_color: frame.light.color.extend(1.0).into(),
            clip_plane: clip.into(),
            flags: [
                if frame.clip_plane.is_some() { 1.0 } else { 0.0 },
                if frame.toon { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 3],
    pub color: [f32; 4],
    /// ambient, diffuse, specular, shininess
    pub material: [f32; 4],
}

impl ObjectConstants {
    pub fn from_draw(draw: &DrawCommand) -> Self {
        let alpha = match draw.shading {
            Shading::Lit => 1.0,
            // negative alpha tells the shader to skip lighting
            Shading::Unlit => -1.0,
        };
        Self {
            model: draw.model.to_cols_array_2d(),
            normal: normal_matrix(draw.model),
            color: draw.material.color.extend(alpha).into(),
            material: draw.material.coefficients().into(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct WaterConstants {
    pub model: [[f32; 4]; 4],
    /// move factor, water level, near plane, far plane
    pub params: [f32; 4],
}

impl WaterConstants {
    pub fn from_water(water: &WaterUniforms) -> Self {
        Self {
            model: water.model.to_cols_array_2d(),
            params: [water.move_factor, water.level, water.near, water.far],
        }
    }
}

/// Inverse-transpose of the model's upper 3x3, padded to `mat3x4` columns.
/// Singular matrices fall back to the plain upper 3x3.
pub fn normal_matrix(model: Mat4) -> [[f32; 4]; 3] {
    let upper = Mat3::from_mat4(model);
    let normal = if upper.determinant().abs() > f32::EPSILON {
        upper.inverse().transpose()
    } else {
        upper
    };
    let cols = normal.to_cols_array();
    [
        [cols[0], cols[1], cols[2], 0.0],
        [cols[3], cols[4], cols[5], 0.0],
        [cols[6], cols[7], cols[8], 0.0],
    ]
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3};

    use super::*;
    use crate::render::{Light, Material, MeshHandle};

    #[test]
    fn interleave_fills_missing_attributes() {
        let mesh = MeshBuffer {
            vertices: vec![Vec3::X, Vec3::Y],
            tex_coords: vec![Vec2::new(0.25, 0.75), Vec2::ONE],
            ..MeshBuffer::default()
        };
        let vertices = interleave(&mesh);
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[0].normal, [0.0; 3]);
        assert_eq!(vertices[0].tex_coord, [0.25, 0.75]);
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn clip_flag_follows_plane() {
        let mut frame = FrameUniforms {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            light: Light::default(),
            clip_plane: None,
            toon: true,
        };
        let globals = GlobalUniform::from_frame(&frame);
        assert_eq!(globals.flags[0], 0.0);
        assert_eq!(globals.flags[1], 1.0);

        frame.clip_plane = Some(Vec4::new(0.0, 1.0, 0.0, 5.99));
        let globals = GlobalUniform::from_frame(&frame);
        assert_eq!(globals.flags[0], 1.0);
        assert_eq!(globals.clip_plane, [0.0, 1.0, 0.0, 5.99]);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let normal = normal_matrix(model);
        assert_eq!(normal[0][0], 0.5);
        assert_eq!(normal[1][1], 1.0);
        assert_eq!(normal_matrix(Mat4::ZERO), [[0.0; 4]; 3]);
    }

    #[test]
    fn unlit_draws_flag_alpha() {
        let draw = DrawCommand {
            mesh: MeshHandle::new(0),
            model: Mat4::IDENTITY,
            material: Material::default(),
            shading: Shading::Unlit,
        };
        assert_eq!(ObjectConstants::from_draw(&draw).color[3], -1.0);
    }
}
