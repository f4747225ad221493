//! Initial pose from a plane-to-image homography.

use nalgebra::{Matrix3, Vector3};

use crate::geometry::{CameraModel, ModelViewTransform};
use crate::matching::homography::solve_homography;
use crate::matching::Correspondence;

/// Decompose the world-plane-to-screen homography of `correspondences` into
/// `[R | t]`.
///
/// `K⁻¹H` is split into two rotation columns and a translation; both columns
/// are normalized, the third axis is their cross product, and the translation
/// is divided by the mean column norm. The solution is flipped when it would
/// place the target behind the camera.
///
/// `None` when the homography cannot be solved or decomposes degenerately.
pub fn estimate(correspondences: &[Correspondence], camera: &CameraModel) -> Option<ModelViewTransform> {
    let world: Vec<[f64; 2]> = correspondences.iter().map(|c| [c.world.x, c.world.y]).collect();
    let screen: Vec<[f64; 2]> = correspondences.iter().map(|c| [c.screen.x, c.screen.y]).collect();
    let h = solve_homography(&world, &screen)?;
    decompose(&h, camera)
}

/// Pose from a homography mapping target `(x, y)` to pixels.
pub fn decompose(h: &Matrix3<f64>, camera: &CameraModel) -> Option<ModelViewTransform> {
    let k_inv = camera.k().try_inverse()?;
    let m = k_inv * h;

    let c1: Vector3<f64> = m.column(0).into_owned();
    let c2: Vector3<f64> = m.column(1).into_owned();
    let c3: Vector3<f64> = m.column(2).into_owned();

    let norm1 = c1.norm();
    let norm2 = c2.norm();
    if norm1 < 1e-12 || norm2 < 1e-12 || !norm1.is_finite() || !norm2.is_finite() {
        return None;
    }

    let mut r1 = c1 / norm1;
    let mut r2 = c2 / norm2;
    let mut t = c3 / ((norm1 + norm2) / 2.0);

    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }

    let r3 = r1.cross(&r2);
    let n3 = r3.norm();
    if n3 < 1e-9 {
        return None;
    }
    let r3 = r3 / n3;

    let rotation = Matrix3::from_columns(&[r1, r2, r3]);
    Some(ModelViewTransform::from_parts(&rotation, &t))
}
