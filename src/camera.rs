use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::transform;

/// Degrees of yaw per unit of horizontal mouse travel.
pub const LOOK_SENSITIVITY: f32 = 0.05;

/// Parameters of a perspective frustum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub fov_y_radians: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        transform::perspective(self.fov_y_radians, self.aspect_ratio, self.near, self.far)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    eye: Vec3,
    view_direction: Vec3,
    up: Vec3,
    last_mouse: Option<Vec2>,
    projection: Option<(Projection, Mat4)>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::ZERO,
            view_direction: Vec3::NEG_Z,
            up: Vec3::Y,
            last_mouse: None,
            projection: None,
        }
    }
}

impl Camera {
    /// Camera at the origin looking down -Z with +Y up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the camera at `eye` looking along `view_direction`.
    pub fn looking(eye: Vec3, view_direction: Vec3) -> Self {
        Self {
            eye,
            view_direction,
            ..Self::default()
        }
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn view_direction(&self) -> Vec3 {
        self.view_direction
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Unit vector pointing to the camera's right.
    pub fn right(&self) -> Vec3 {
        self.view_direction.cross(self.up).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        transform::view_matrix(self.eye, self.view_direction, self.up)
    }

    /// Feeds an absolute mouse position.
    ///
    /// The first sample only seeds the reference position. Every later sample
    /// yaws the view direction by `LOOK_SENSITIVITY * (previous.x - current.x)`
    /// degrees.
    pub fn look(&mut self, mouse_x: i32, mouse_y: i32) {
        let current = Vec2::new(mouse_x as f32, mouse_y as f32);
        let Some(previous) = self.last_mouse.replace(current) else {
            return;
        };
        let delta = (previous - current) * LOOK_SENSITIVITY;
        self.view_direction = transform::rotate_about_axis(self.view_direction, delta.x, self.up);
    }

    /// Not normalized: a longer view direction moves further per call.
    pub fn move_forward(&mut self, speed: f32) {
        self.eye += self.view_direction * speed;
    }

    pub fn move_backward(&mut self, speed: f32) {
        self.eye -= self.view_direction * speed;
    }

    pub fn move_left(&mut self, speed: f32) {
        self.eye -= self.right() * speed;
    }

    pub fn move_right(&mut self, speed: f32) {
        self.eye += self.right() * speed;
    }

    /// Computes and caches the perspective matrix, replacing any earlier one.
    pub fn set_projection(&mut self, fov_y_radians: f32, aspect_ratio: f32, near: f32, far: f32) {
        self.set_projection_params(Projection {
            fov_y_radians,
            aspect_ratio,
            near,
            far,
        });
    }

    pub fn set_projection_params(&mut self, projection: Projection) {
        self.projection = Some((projection, projection.matrix()));
    }

    pub fn projection(&self) -> Option<Projection> {
        self.projection.map(|(params, _)| params)
    }

    /// `None` until [`Camera::set_projection`] has been called.
    pub fn projection_matrix(&self) -> Option<Mat4> {
        self.projection.map(|(_, matrix)| matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaw_degrees(direction: Vec3) -> f32 {
        // 0 looking down -Z, positive turning toward -X
        (-direction.x).atan2(-direction.z).to_degrees()
    }

    #[test]
    fn first_look_only_seeds_reference() {
        let mut camera = Camera::new();
        camera.look(500, 20);
        assert_eq!(camera.view_direction(), Vec3::NEG_Z);
    }

    #[test]
    fn later_looks_yaw_by_scaled_delta() {
        let mut camera = Camera::new();
        camera.look(320, 240);
        camera.look(300, 240);
        assert!((yaw_degrees(camera.view_direction()) - 1.0).abs() < 1e-4);

        camera.look(340, 240);
        // previous 300, current 340 -> -2 degrees, net -1
        assert!((yaw_degrees(camera.view_direction()) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn vertical_motion_does_not_pitch_or_roll() {
        let mut camera = Camera::new();
        camera.look(320, 240);
        camera.look(320, 0);
        camera.look(200, 480);
        assert_eq!(camera.view_direction().y, 0.0);
        assert_eq!(camera.up(), Vec3::Y);
    }

    #[test]
    fn forward_then_backward_restores_eye() {
        let mut camera = Camera::looking(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.3, 0.0, -0.9));
        let start = camera.eye();
        camera.move_forward(0.1);
        assert_ne!(camera.eye(), start);
        camera.move_backward(0.1);
        assert!(camera.eye().abs_diff_eq(start, 1e-6));
    }

    #[test]
    fn movement_is_not_normalized() {
        let mut camera = Camera::looking(Vec3::ZERO, Vec3::new(0.0, 0.0, -2.0));
        camera.move_forward(0.5);
        assert!(camera.eye().abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
    }

    #[test]
    fn strafing_uses_right_vector() {
        let mut camera = Camera::new();
        camera.move_right(0.25);
        assert!(camera.eye().abs_diff_eq(Vec3::new(0.25, 0.0, 0.0), 1e-6));
        camera.move_left(0.5);
        assert!(camera.eye().abs_diff_eq(Vec3::new(-0.25, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn default_view_is_identity() {
        assert!(Camera::new().view_matrix().abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn projection_is_unset_until_requested_and_overwritable() {
        let mut camera = Camera::new();
        assert!(camera.projection_matrix().is_none());

        camera.set_projection(45f32.to_radians(), 4.0 / 3.0, 0.1, 10.0);
        let first = camera.projection_matrix().unwrap();
        camera.set_projection(45f32.to_radians(), 16.0 / 9.0, 0.1, 10.0);
        let second = camera.projection_matrix().unwrap();

        assert_ne!(first, second);
        assert_eq!(camera.projection().unwrap().aspect_ratio, 16.0 / 9.0);
    }
}
