//! Camera system

use glam::{Mat4, Vec3};

/// First-person camera looking along `front`
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub front: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            front: -Vec3::Z,
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, front: Vec3) -> Self {
        Self {
            position,
            front: front.normalize_or_zero(),
            ..Default::default()
        }
    }

    /// Right vector: front crossed with world up.
    pub fn right(&self) -> Vec3 {
        self.front.cross(Vec3::Y).normalize_or_zero()
    }

    /// Camera up vector, orthogonal to front and right.
    pub fn up(&self) -> Vec3 {
        self.right().cross(self.front)
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up())
    }

    /// Get the projection matrix for a width / height ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_default_basis() {
        let camera = Camera::default();
        assert!(camera.right().abs_diff_eq(Vec3::X, 1e-6));
        assert!(camera.up().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn test_point_ahead_is_in_front_of_near_plane() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        let clip = camera.view_projection_matrix(16.0 / 9.0) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
