use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Per-instance placement of a mesh in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub translation: Vec3,
    /// Spin about +Y, in degrees.
    pub rotation_degrees: f32,
    /// Uniform scale factor.
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation_degrees: 0.0,
            scale: 1.0,
        }
    }
}

impl Transform {
    pub fn new(translation: Vec3, rotation_degrees: f32, scale: f32) -> Self {
        Self {
            translation,
            rotation_degrees,
            scale,
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        model_matrix(self.translation, self.rotation_degrees, self.scale)
    }
}

/// `translate * rotate_y * scale`, so vertices are scaled first and translated last.
pub fn model_matrix(translation: Vec3, rotation_degrees: f32, scale: f32) -> Mat4 {
    Mat4::from_translation(translation)
        * Mat4::from_rotation_y(rotation_degrees.to_radians())
        * Mat4::from_scale(Vec3::splat(scale))
}

/// Right-handed look-at matrix targeting `eye + direction`.
pub fn view_matrix(eye: Vec3, direction: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, eye + direction, up)
}

/// Right-handed perspective projection with a 0..1 depth range.
pub fn perspective(fov_y_radians: f32, aspect_ratio: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(fov_y_radians, aspect_ratio.max(0.01), near, far)
}

/// Rotates `vector` counter-clockwise about `axis` by `degrees`.
pub fn rotate_about_axis(vector: Vec3, degrees: f32, axis: Vec3) -> Vec3 {
    let axis = axis.normalize_or_zero();
    if axis == Vec3::ZERO {
        return vector;
    }
    Quat::from_axis_angle(axis, degrees.to_radians()) * vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn model_matrix_scales_then_rotates_then_translates() {
        let model = model_matrix(Vec3::new(0.0, 0.0, -2.0), 90.0, 0.5);
        let point = model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        // x axis scaled to 0.5, rotated onto -z, then pushed back by 2
        assert!(point.truncate().abs_diff_eq(Vec3::new(0.0, 0.0, -2.5), 1e-5));
    }

    #[test]
    fn default_transform_is_identity() {
        assert!(Transform::default()
            .model_matrix()
            .abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn looking_down_negative_z_from_origin_is_identity() {
        let view = view_matrix(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        assert!(view.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn view_matrix_moves_world_opposite_to_eye() {
        let view = view_matrix(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, Vec3::Y);
        let origin = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(origin.truncate().abs_diff_eq(Vec3::new(0.0, 0.0, -3.0), 1e-5));
    }

    #[test]
    fn rotation_about_up_turns_left_for_positive_angles() {
        let rotated = rotate_about_axis(Vec3::NEG_Z, 90.0, Vec3::Y);
        assert!(rotated.abs_diff_eq(Vec3::NEG_X, 1e-5));
    }

    #[test]
    fn perspective_maps_near_plane_to_zero_depth() {
        let projection = perspective(45f32.to_radians(), 640.0 / 480.0, 0.1, 10.0);
        let clip = projection * Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-5);
    }
}
