use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::render::Viewport;

/// Distance from the look-at point after a zoom reset.
pub const RESET_DISTANCE: f32 = 20.0;
/// World units of vertical pan per pixel of right-drag.
pub const PAN_SPEED: f32 = 0.2;
/// Radians of rotation per unit of travel on the trackball sphere.
pub const TRACKBALL_GAIN: f32 = 1.0;

/// Mirrors a height about the water plane at `level`.
pub fn mirror_y(y: f32, level: f32) -> f32 {
    2.0 * level - y
}

/// Look-at camera. `projection` and `view` are derived state, refreshed with
/// [`Camera::set_viewport`] and [`Camera::update_view`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub look_at: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    #[serde(skip, default = "identity")]
    projection: Mat4,
    #[serde(skip, default = "identity")]
    view: Mat4,
}

fn identity() -> Mat4 {
    Mat4::IDENTITY
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(182.0, 0.0, -5.0), Vec3::new(-1.0, 0.0, -300.0), Vec3::Y)
    }
}

impl Camera {
    pub fn new(position: Vec3, look_at: Vec3, up: Vec3) -> Self {
        let mut camera = Self {
            position,
            look_at,
            up,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 1000.0,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        };
        camera.update_view();
        camera
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    /// Recomputes the projection for a new viewport. Zero-height viewports
    /// (minimized windows) keep the previous projection.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport.height == 0 {
            return;
        }
        self.projection = Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            viewport.aspect(),
            self.near,
            self.far,
        );
    }

    pub fn update_view(&mut self) {
        self.view = Mat4::look_at_rh(self.position, self.look_at, self.up);
    }

    /// Reflects eye and target through the horizontal plane `y = level`.
    pub fn mirror_about(&mut self, level: f32) {
        self.position.y = mirror_y(self.position.y, level);
        self.look_at.y = mirror_y(self.look_at.y, level);
    }

    pub fn direction(&self) -> Vec3 {
        (self.look_at - self.position).normalize_or_zero()
    }

    pub fn move_forward(&mut self, amount: f32) {
        let step = self.direction() * amount;
        self.position += step;
        self.look_at += step;
    }

    pub fn strafe(&mut self, amount: f32) {
        let right = self.direction().cross(self.up).normalize_or_zero();
        self.position += right * amount;
        self.look_at += right * amount;
    }

    /// Places the eye [`RESET_DISTANCE`] units from the look-at point along
    /// the current view direction.
    pub fn reset_zoom(&mut self) {
        self.position = self.look_at - self.direction() * RESET_DISTANCE;
    }

    /// Rotates the view direction in place from a left-drag between two
    /// cursor positions.
    pub fn trackball(&mut self, from: Vec2, to: Vec2, viewport: Viewport) {
        if viewport.is_empty() {
            return;
        }
        let prev = trackball_point(from, viewport);
        let next = trackball_point(to, viewport);
        let travel = (next - prev).length();
        if travel <= 1e-4 {
            return;
        }
        let axis = prev.cross(next).normalize_or_zero();
        if axis == Vec3::ZERO {
            return;
        }
        let rotation = Mat4::from_axis_angle(axis, -travel * TRACKBALL_GAIN);
        let offset = rotation.transform_vector3(self.look_at - self.position);
        self.look_at = self.position + offset;
    }

    /// Moves eye and target along `up` from a right-drag of `dy` pixels.
    pub fn pan(&mut self, dy: f32) {
        let shift = self.up * (dy * PAN_SPEED);
        self.position -= shift;
        self.look_at -= shift;
    }

    /// Dollies along the view direction; zooming in never passes the look-at point.
    pub fn scroll(&mut self, offset: f32) {
        let step = self.direction() * offset;
        if offset < 0.0 || self.position.distance(self.look_at) > step.length() {
            self.position += step;
        }
    }
}

/// Maps a cursor position onto the unit hemisphere facing the viewer.
pub fn trackball_point(cursor: Vec2, viewport: Viewport) -> Vec3 {
    let width = viewport.width as f32;
    let height = viewport.height as f32;
    let mut point = Vec3::new(
        (2.0 * cursor.x - width) / width,
        (height - 2.0 * cursor.y) / height,
        0.0,
    );
    let d = point.length().min(1.0);
    point.z = (1.001 - d * d).sqrt();
    point.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_is_an_involution() {
        for &(y, level) in &[(0.0, -6.0), (12.5, -6.0), (-3.25, 2.0), (100.0, 0.0)] {
            assert_eq!(mirror_y(mirror_y(y, level), level), y);
        }
        assert_eq!(mirror_y(0.0, -6.0), -12.0);
    }

    #[test]
    fn mirroring_camera_twice_restores_it() {
        let mut camera = Camera::new(Vec3::new(4.0, 2.5, 1.0), Vec3::new(0.0, -0.75, -8.0), Vec3::Y);
        let original = camera.clone();
        camera.mirror_about(-6.0);
        assert_eq!(camera.position.y, -14.5);
        camera.mirror_about(-6.0);
        assert_eq!(camera, original);
    }

    #[test]
    fn projection_ignores_zero_height() {
        let mut camera = Camera::default();
        camera.set_viewport(Viewport::new(640, 480));
        let projection = camera.projection();
        camera.set_viewport(Viewport::new(640, 0));
        assert_eq!(camera.projection(), projection);
    }

    #[test]
    fn moving_keeps_eye_to_target_offset() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -10.0), Vec3::Y);
        camera.move_forward(1.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(camera.look_at, Vec3::new(0.0, 0.0, -11.0));
        camera.strafe(2.0);
        assert_eq!(camera.position, Vec3::new(2.0, 0.0, -1.0));
    }

    #[test]
    fn reset_zoom_places_eye_at_fixed_distance() {
        let mut camera = Camera::default();
        camera.reset_zoom();
        assert!((camera.position.distance(camera.look_at) - RESET_DISTANCE).abs() < 1e-3);
    }

    #[test]
    fn scroll_never_passes_target() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -3.0), Vec3::Y);
        camera.scroll(2.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, -2.0));
        camera.scroll(2.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, -2.0));
        camera.scroll(-1.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn pan_moves_against_cursor() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        camera.pan(10.0);
        assert_eq!(camera.position, Vec3::new(0.0, -2.0, 0.0));
        assert_eq!(camera.look_at, Vec3::new(0.0, -2.0, -1.0));
    }

    #[test]
    fn trackball_keeps_eye_and_distance() {
        let viewport = Viewport::new(800, 600);
        let mut camera = Camera::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -10.0), Vec3::Y);
        camera.trackball(Vec2::new(400.0, 300.0), Vec2::new(500.0, 300.0), viewport);
        assert_eq!(camera.position, Vec3::ZERO);
        assert!((camera.look_at.length() - 10.0).abs() < 1e-3);
        assert!(camera.look_at.x.abs() > 0.1);

        let before = camera.look_at;
        camera.trackball(Vec2::new(10.0, 10.0), Vec2::new(10.0, 10.0), viewport);
        assert_eq!(camera.look_at, before);
    }

    #[test]
    fn trackball_points_are_unit_length() {
        let viewport = Viewport::new(300, 200);
        for cursor in [Vec2::ZERO, Vec2::new(150.0, 100.0), Vec2::new(300.0, 0.0)] {
            let p = trackball_point(cursor, viewport);
            assert!((p.length() - 1.0).abs() < 1e-5);
            assert!(p.z > 0.0);
        }
    }
}
