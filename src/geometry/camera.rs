//! Pinhole camera model derived from the input resolution.
//!
//! # Frame Conventions
//!
//! ## Target Frame
//! ```text
//!      +------ +X (right, target pixels)
//!      |
//!      |
//!      +Y (down)
//! ```
//! The target lies in the `Z = 0` plane, one unit per target pixel.
//!
//! ## Camera Frame (computer vision convention)
//! - X: Right
//! - Y: Down
//! - Z: Forward (optical axis)
//!
//! ## Rendering Frame (OpenGL convention)
//! - X: Right
//! - Y: Up
//! - Z: Backward
//!
//! [`CameraModel::gl_projection_matrix`] and
//! `ModelViewTransform::gl_world_matrix` convert to the rendering frame.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Vertical field of view assumed for every input.
pub const DEFAULT_FOVY_DEG: f64 = 45.0;
pub const DEFAULT_NEAR: f64 = 10.0;
pub const DEFAULT_FAR: f64 = 100_000.0;

/// Pinhole intrinsics. Stable for a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: usize,
    pub height: usize,
}

impl CameraModel {
    /// Square-pixel camera with the default vertical field of view.
    pub fn from_resolution(width: usize, height: usize) -> Self {
        Self::with_fovy(width, height, DEFAULT_FOVY_DEG)
    }

    pub fn with_fovy(width: usize, height: usize, fovy_deg: f64) -> Self {
        let f = (height as f64 / 2.0) / (fovy_deg.to_radians() / 2.0).tan();
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
            width,
            height,
        }
    }

    /// Intrinsics matrix K.
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Project a camera-frame point. `None` behind or on the camera plane.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-9 {
            return None;
        }
        Some(Point2::new(self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy))
    }

    /// Column-major OpenGL projection matrix.
    pub fn gl_projection_matrix(&self, near: f64, far: f64) -> [f64; 16] {
        let (w, h) = (self.width as f64, self.height as f64);
        let rows = [
            [2.0 * self.fx / w, 0.0, -(2.0 * self.cx / w - 1.0), 0.0],
            [0.0, 2.0 * self.fy / h, -(2.0 * self.cy / h - 1.0), 0.0],
            [0.0, 0.0, -(far + near) / (far - near), -2.0 * far * near / (far - near)],
            [0.0, 0.0, -1.0, 0.0],
        ];
        let mut out = [0.0; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = rows[row][col];
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_focal_length_from_fov() {
        let cam = CameraModel::from_resolution(640, 480);
        assert_relative_eq!(cam.fx, 240.0 / (22.5f64.to_radians()).tan(), epsilon = 1e-9);
        assert_relative_eq!(cam.cx, 320.0);
        assert_relative_eq!(cam.cy, 240.0);
    }

    #[test]
    fn test_project_principal_point() {
        let cam = CameraModel::from_resolution(640, 480);
        let p = cam.project(&Vector3::new(0.0, 0.0, 5.0)).unwrap();
        assert_relative_eq!(p.x, 320.0);
        assert_relative_eq!(p.y, 240.0);
        assert!(cam.project(&Vector3::new(1.0, 1.0, -1.0)).is_none());
    }

    #[test]
    fn test_gl_projection_layout() {
        let cam = CameraModel::from_resolution(640, 480);
        let m = cam.gl_projection_matrix(DEFAULT_NEAR, DEFAULT_FAR);
        // Column-major: element (3, 2) is -1.
        assert_relative_eq!(m[2 * 4 + 3], -1.0);
        assert_relative_eq!(m[0], 2.0 * cam.fx / 640.0);
        // Principal point at the image centre gives no skew term.
        assert_relative_eq!(m[2 * 4], 0.0);
    }
}
