// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees per second the model spins around +Y.
pub const SPIN_DEG_PER_SEC: f32 = 45.0;
pub const FOV_Y_DEG: f32 = 35.0;
pub const Z_NEAR: f32 = 0.01;
pub const Z_FAR: f32 = 75.0;

const EYE: Vec3 = Vec3::new(0.0, 12.0, 60.0);
const TARGET: Vec3 = Vec3::new(0.0, 12.0, 0.0);

/// Per-frame uniform block. Layout matches the vertex shader's
/// `std140` block: three column-major mat4.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformFrameData {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformFrameData {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Fixed animation: spin about Y, static camera, Vulkan clip space
    /// (depth 0..1, Y pointing down).
    pub fn animate(elapsed_secs: f32, width: u32, height: u32) -> Self {
        let aspect = width.max(1) as f32 / height.max(1) as f32;

        let model = Mat4::from_rotation_y(elapsed_secs * SPIN_DEG_PER_SEC.to_radians());
        let view = Mat4::look_at_rh(EYE, TARGET, Vec3::Y);
        let mut proj = Mat4::perspective_rh(FOV_Y_DEG.to_radians(), aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn block_is_three_mat4() {
        assert_eq!(UniformFrameData::SIZE, 3 * 64);
        let u = UniformFrameData::animate(0.0, 1280, 720);
        assert_eq!(u.as_bytes().len(), 192);
    }

    #[test]
    fn model_starts_at_identity_and_spins() {
        let u = UniformFrameData::animate(0.0, 1280, 720);
        assert!(u.model.abs_diff_eq(Mat4::IDENTITY, EPS));

        // 2s at 45 deg/s = quarter turn: +X goes to -Z
        let u = UniformFrameData::animate(2.0, 1280, 720);
        let x = u.model.transform_vector3(Vec3::X);
        assert!(x.abs_diff_eq(Vec3::NEG_Z, EPS), "{x:?}");
    }

    #[test]
    fn view_puts_eye_at_origin() {
        let u = UniformFrameData::animate(0.0, 800, 600);
        let p = u.view.transform_point3(EYE);
        assert!(p.abs_diff_eq(Vec3::ZERO, EPS), "{p:?}");
        // target lies straight ahead, down -Z
        let t = u.view.transform_point3(TARGET);
        assert!(t.z < 0.0 && t.x.abs() < EPS && t.y.abs() < EPS);
    }

    #[test]
    fn projection_is_flipped_for_vulkan() {
        let u = UniformFrameData::animate(0.0, 800, 800);
        assert!(u.proj.y_axis.y < 0.0);
        assert!((u.proj.x_axis.x + u.proj.y_axis.y).abs() < EPS);
    }

    #[test]
    fn zero_height_does_not_produce_nan() {
        let u = UniformFrameData::animate(1.0, 640, 0);
        assert!(u.proj.to_cols_array().iter().all(|v| v.is_finite()));
    }
}
