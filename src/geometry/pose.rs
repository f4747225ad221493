//! Target-to-camera rigid transform.

use nalgebra::{Matrix3, Matrix3x4, Point2, Vector3};
use serde::{Deserialize, Serialize};

use super::camera::CameraModel;
use super::so3::exp_so3;

/// 3x4 `[R | t]` mapping target coordinates to camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelViewTransform(pub Matrix3x4<f64>);

impl ModelViewTransform {
    pub fn identity() -> Self {
        Self(Matrix3x4::identity())
    }

    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        m.set_column(3, translation);
        Self(m)
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.0.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.0.column(3).into_owned()
    }

    /// Target point to camera frame.
    pub fn transform(&self, x: f64, y: f64, z: f64) -> Vector3<f64> {
        self.rotation() * Vector3::new(x, y, z) + self.translation()
    }

    /// `K [R | t]`.
    pub fn projection(&self, camera: &CameraModel) -> Matrix3x4<f64> {
        camera.k() * self.0
    }

    /// Project a point of the target plane into the image.
    pub fn project(&self, camera: &CameraModel, x: f64, y: f64) -> Option<Point2<f64>> {
        project_mvp(&self.projection(camera), x, y)
    }

    /// Right-multiply by the increment `[exp(ω) | v]`, with `delta = (ω, v)`.
    pub fn compose_increment(&self, omega: &Vector3<f64>, v: &Vector3<f64>) -> Self {
        let r = self.rotation();
        let t = self.translation();
        Self::from_parts(&(r * exp_so3(omega)), &(r * v + t))
    }

    /// Row-major entries, used by the output filter.
    pub fn to_array(&self) -> [f64; 12] {
        let mut out = [0.0; 12];
        for row in 0..3 {
            for col in 0..4 {
                out[row * 4 + col] = self.0[(row, col)];
            }
        }
        out
    }

    pub fn from_array(values: &[f64; 12]) -> Self {
        Self(Matrix3x4::from_row_slice(values))
    }

    /// Column-major OpenGL model matrix for a target of height `target_height`.
    ///
    /// Flips Y and Z into the rendering frame and moves the origin to the
    /// target's bottom-left corner.
    pub fn gl_world_matrix(&self, target_height: f64) -> [f64; 16] {
        let m = &self.0;
        [
            m[(0, 0)],
            -m[(1, 0)],
            -m[(2, 0)],
            0.0,
            -m[(0, 1)],
            m[(1, 1)],
            m[(2, 1)],
            0.0,
            -m[(0, 2)],
            m[(1, 2)],
            m[(2, 2)],
            0.0,
            m[(0, 1)] * target_height + m[(0, 3)],
            -(m[(1, 1)] * target_height + m[(1, 3)]),
            -(m[(2, 1)] * target_height + m[(2, 3)]),
            1.0,
        ]
    }
}

/// Project `(x, y, 0)` through a 3x4 projection. `None` when it lands at infinity.
#[inline]
pub fn project_mvp(mvp: &Matrix3x4<f64>, x: f64, y: f64) -> Option<Point2<f64>> {
    let u = mvp[(0, 0)] * x + mvp[(0, 1)] * y + mvp[(0, 3)];
    let v = mvp[(1, 0)] * x + mvp[(1, 1)] * y + mvp[(1, 3)];
    let w = mvp[(2, 0)] * x + mvp[(2, 1)] * y + mvp[(2, 3)];
    if w.abs() < 1e-12 {
        return None;
    }
    Some(Point2::new(u / w, v / w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parts_round_trip() {
        let r = exp_so3(&Vector3::new(0.1, -0.2, 0.3));
        let t = Vector3::new(1.0, 2.0, 300.0);
        let pose = ModelViewTransform::from_parts(&r, &t);
        assert_relative_eq!(pose.rotation(), r, epsilon = 1e-12);
        assert_relative_eq!(pose.translation(), t, epsilon = 1e-12);
        assert_eq!(ModelViewTransform::from_array(&pose.to_array()), pose);
    }

    #[test]
    fn test_projection_of_fronto_parallel_target() {
        let cam = CameraModel::from_resolution(640, 480);
        let pose = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(-128.0, -128.0, cam.fx));
        let p = pose.project(&cam, 128.0, 128.0).unwrap();
        assert_relative_eq!(p.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 240.0, epsilon = 1e-9);
        let q = pose.project(&cam, 0.0, 0.0).unwrap();
        assert_relative_eq!(q.x, 192.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_increment_is_identity() {
        let pose = ModelViewTransform::from_parts(&exp_so3(&Vector3::new(0.2, 0.0, 0.1)), &Vector3::new(3.0, 4.0, 5.0));
        let same = pose.compose_increment(&Vector3::zeros(), &Vector3::zeros());
        assert_relative_eq!(same.0, pose.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gl_world_matrix_flips_axes() {
        let pose = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(1.0, 2.0, 10.0));
        let m = pose.gl_world_matrix(100.0);
        assert_relative_eq!(m[5], 1.0);
        assert_relative_eq!(m[10], 1.0);
        assert_relative_eq!(m[12], 1.0);
        assert_relative_eq!(m[13], -102.0);
        assert_relative_eq!(m[14], -10.0);
        assert_relative_eq!(m[15], 1.0);
    }
}
