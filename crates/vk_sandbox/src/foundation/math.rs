//! Math utilities and types
//!
//! Column-major `nalgebra` matrices, laid out the way GLSL `mat4` uniforms expect.

pub use nalgebra::{Matrix4, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Extension trait for Mat4 with additional convenience methods
pub trait Mat4Ext {
    /// Create a rotation matrix around the X axis
    fn rotation_x(angle: f32) -> Mat4;

    /// Create a rotation matrix around the Y axis
    fn rotation_y(angle: f32) -> Mat4;

    /// Create a translation matrix
    fn translation(offset: Vec3) -> Mat4;

    /// Right-handed perspective projection with OpenGL clip conventions
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Flip Y so a GL-style projection renders upright in Vulkan clip space
    fn vulkan_y_flip() -> Mat4;

    /// Column-major array suitable for uploading as a GLSL `mat4`
    fn to_cols_array_2d(&self) -> [[f32; 4]; 4];
}

impl Mat4Ext for Mat4 {
    fn rotation_x(angle: f32) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::x_axis(), angle)
    }

    fn rotation_y(angle: f32) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::y_axis(), angle)
    }

    fn translation(offset: Vec3) -> Mat4 {
        Mat4::new_translation(&offset)
    }

    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_perspective(aspect, fov_y, near, far)
    }

    fn vulkan_y_flip() -> Mat4 {
        Mat4::new_nonuniform_scaling(&Vec3::new(1.0, -1.0, 1.0))
    }

    fn to_cols_array_2d(&self) -> [[f32; 4]; 4] {
        (*self).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rotations_match_axis_angle() {
        let angle = std::f32::consts::FRAC_PI_2;
        let rotated = Mat4::rotation_x(angle).transform_vector(&Vec3::y());
        assert_relative_eq!(rotated, Vec3::z(), epsilon = 1e-6);

        let rotated = Mat4::rotation_y(angle).transform_vector(&Vec3::z());
        assert_relative_eq!(rotated, Vec3::x(), epsilon = 1e-6);
    }

    #[test]
    fn test_y_flip_only_touches_y() {
        let flipped = Mat4::vulkan_y_flip().transform_vector(&Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(flipped, Vec3::new(1.0, -2.0, 3.0));
    }

    #[test]
    fn test_columns_are_column_major() {
        let m = Mat4::translation(Vec3::new(4.0, 5.0, 6.0));
        let cols = m.to_cols_array_2d();
        assert_relative_eq!(cols[3][0], 4.0);
        assert_relative_eq!(cols[3][1], 5.0);
        assert_relative_eq!(cols[3][2], 6.0);
        assert_relative_eq!(cols[0][3], 0.0);
    }

    #[test]
    fn test_perspective_maps_near_plane_to_minus_one() {
        let projection = Mat4::perspective(1.5708, 1.0, 0.1, 100.0);
        let clip = projection * nalgebra::Vector4::new(0.0, 0.0, -0.1, 1.0);
        assert_relative_eq!(clip.z / clip.w, -1.0, epsilon = 1e-4);
    }
}
