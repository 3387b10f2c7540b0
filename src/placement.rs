use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Axis used by [`Placement::spin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpinAxis {
    X,
    #[default]
    Y,
    Z,
    /// Spinning only re-applies position and scale.
    None,
}

impl SpinAxis {
    pub fn vector(self) -> Option<Vec3> {
        match self {
            Self::X => Some(Vec3::X),
            Self::Y => Some(Vec3::Y),
            Self::Z => Some(Vec3::Z),
            Self::None => None,
        }
    }
}

/// World matrix of a placed object together with the bookkeeping its
/// editing operations need: tracked position, uniform scale and spin angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    matrix: Mat4,
    position: Vec3,
    scale: f32,
    base_scale: f32,
    spin_axis: SpinAxis,
    /// Degrees, kept within `(-360, 360]`.
    angle: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Placement {
    /// Starts from a plain scale; `reset_scale` returns to this value.
    pub fn new(base_scale: f32) -> Self {
        Self {
            matrix: Mat4::from_scale(Vec3::splat(base_scale)),
            position: Vec3::ZERO,
            scale: base_scale,
            base_scale,
            spin_axis: SpinAxis::default(),
            angle: 0.0,
        }
    }

    pub fn with_spin_axis(mut self, axis: SpinAxis) -> Self {
        self.spin_axis = axis;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.matrix = Mat4::from_translation(offset) * self.matrix;
        self.position += offset;
    }

    /// Scales about the object's own position.
    pub fn resize(&mut self, amount: f32) {
        self.matrix = self.about_position(Mat4::from_scale(Vec3::splat(amount))) * self.matrix;
        self.scale *= amount;
    }

    /// Rotates about the object's own position. `angle` is in radians.
    pub fn rotate(&mut self, axis: Vec3, angle: f32) {
        let Some(axis) = axis.try_normalize() else {
            return;
        };
        let scale = Mat4::from_scale(Vec3::splat(self.scale));
        let inverse_scale = if self.scale != 0.0 {
            Mat4::from_scale(Vec3::splat(1.0 / self.scale))
        } else {
            Mat4::IDENTITY
        };
        let local = scale * Mat4::from_axis_angle(axis, angle) * inverse_scale;
        self.matrix = self.about_position(local) * self.matrix;
    }

    /// Rotates the whole placement, position included, about the world origin.
    pub fn rotate_about_origin(&mut self, axis: Vec3, angle: f32) {
        let Some(axis) = axis.try_normalize() else {
            return;
        };
        let rotation = Mat4::from_axis_angle(axis, angle);
        self.matrix = rotation * self.matrix;
        self.position = rotation.transform_point3(self.position);
    }

    /// Advances the spin angle by `degrees` and rebuilds the matrix as
    /// position, spin rotation and scale. Angles past a full turn restart at zero.
    pub fn spin(&mut self, degrees: f32) {
        self.angle += degrees;
        if self.angle > 360.0 || self.angle < -360.0 {
            self.angle = 0.0;
        }
        let rotation = self
            .spin_axis
            .vector()
            .map(|axis| Mat4::from_axis_angle(axis, self.angle.to_radians()))
            .unwrap_or(Mat4::IDENTITY);
        self.matrix = Mat4::from_translation(self.position)
            * rotation
            * Mat4::from_scale(Vec3::splat(self.scale));
    }

    pub fn reset_position(&mut self) {
        self.matrix = Mat4::from_translation(-self.position) * self.matrix;
        self.position = Vec3::ZERO;
    }

    /// Drops every rotation while keeping position and scale.
    pub fn reset_rotation(&mut self) {
        self.matrix =
            Mat4::from_translation(self.position) * Mat4::from_scale(Vec3::splat(self.scale));
        self.angle = 0.0;
    }

    pub fn reset_scale(&mut self) {
        if self.scale != 0.0 {
            self.resize(self.base_scale / self.scale);
        }
        self.scale = self.base_scale;
    }

    fn about_position(&self, transform: Mat4) -> Mat4 {
        Mat4::from_translation(self.position) * transform * Mat4::from_translation(-self.position)
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn origin_of(placement: &Placement) -> Vec3 {
        placement.matrix().transform_point3(Vec3::ZERO)
    }

    #[test]
    fn translate_tracks_position() {
        let mut placement = Placement::default();
        placement.translate(Vec3::new(180.0, -1.8, -5.0));
        assert_eq!(placement.position(), Vec3::new(180.0, -1.8, -5.0));
        assert_eq!(origin_of(&placement), placement.position());
    }

    #[test]
    fn resize_and_rotate_keep_the_object_in_place() {
        let mut placement = Placement::default();
        placement.translate(Vec3::new(4.0, 0.0, 2.0));
        placement.resize(2.0);
        placement.rotate(Vec3::Y, FRAC_PI_2);
        assert!(origin_of(&placement).abs_diff_eq(Vec3::new(4.0, 0.0, 2.0), 1e-5));
        assert_eq!(placement.scale(), 2.0);
        let tip = placement.matrix().transform_point3(Vec3::X);
        assert!(tip.abs_diff_eq(Vec3::new(4.0, 0.0, 0.0), 1e-5), "{tip}");
    }

    #[test]
    fn rotating_about_origin_moves_position() {
        let mut placement = Placement::default();
        placement.translate(Vec3::new(1.0, 0.0, 0.0));
        placement.rotate_about_origin(Vec3::Y, FRAC_PI_2);
        assert!(placement
            .position()
            .abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
        assert!(origin_of(&placement).abs_diff_eq(placement.position(), 1e-6));
    }

    #[test]
    fn spin_wraps_past_a_full_turn() {
        let mut placement = Placement::default().with_spin_axis(SpinAxis::Y);
        placement.spin(350.0);
        assert_eq!(placement.angle(), 350.0);
        placement.spin(20.0);
        assert_eq!(placement.angle(), 0.0);
        placement.spin(-90.0);
        assert_eq!(placement.angle(), -90.0);
    }

    #[test]
    fn reset_rotation_keeps_position_and_scale() {
        let mut placement = Placement::default();
        placement.resize(3.0);
        placement.rotate(Vec3::ONE, 0.7);
        placement.translate(Vec3::new(2.0, 5.0, -1.0));
        placement.reset_rotation();
        let expected =
            Mat4::from_translation(Vec3::new(2.0, 5.0, -1.0)) * Mat4::from_scale(Vec3::splat(3.0));
        assert!(placement.matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn reset_position_and_scale() {
        let mut placement = Placement::new(0.5);
        placement.translate(Vec3::new(1.0, 2.0, 3.0));
        placement.resize(4.0);
        placement.reset_scale();
        assert_eq!(placement.scale(), 0.5);
        placement.reset_position();
        assert_eq!(placement.position(), Vec3::ZERO);
        assert!(placement
            .matrix()
            .abs_diff_eq(Mat4::from_scale(Vec3::splat(0.5)), 1e-6));
    }
}
