//! Synthetic images for tests.

use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geometry::{CameraModel, ModelViewTransform};
use crate::image::GreyImage;

/// Mid-grey canvas covered with random Gaussian blobs of both polarities.
pub fn textured_image(width: usize, height: usize, seed: u64) -> GreyImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut acc = vec![128.0f64; width * height];
    let blobs = (width * height / 440).max(8);
    for _ in 0..blobs {
        let cx = rng.gen_range(0.0..width as f64);
        let cy = rng.gen_range(0.0..height as f64);
        let sigma: f64 = rng.gen_range(4.0..16.0);
        let amp = if rng.gen_bool(0.5) { 90.0 } else { -90.0 } * rng.gen_range(0.4..1.0);
        let reach = (3.0 * sigma).ceil() as i64;
        let two_s2 = 2.0 * sigma * sigma;
        for y in (cy as i64 - reach).max(0)..(cy as i64 + reach + 1).min(height as i64) {
            for x in (cx as i64 - reach).max(0)..(cx as i64 + reach + 1).min(width as i64) {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                acc[y as usize * width + x as usize] += amp * (-d2 / two_s2).exp();
            }
        }
    }
    GreyImage {
        width,
        height,
        data: acc.into_iter().map(|v| v.clamp(0.0, 255.0) as f32).collect(),
    }
}

/// Render `target` into a `frame_width` x `frame_height` frame seen from `pose`.
///
/// Target pixel `(i, j)` covers the world square `[i, i+1) x [j, j+1)`.
pub fn warp_with_pose(
    target: &GreyImage,
    camera: &CameraModel,
    pose: &ModelViewTransform,
    frame_width: usize,
    frame_height: usize,
    background: f32,
) -> GreyImage {
    let r = pose.rotation();
    let t = pose.translation();
    let h = camera.k() * Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
    let h_inv = h.try_inverse().unwrap();

    let mut out = GreyImage::filled(frame_width, frame_height, background);
    for v in 0..frame_height {
        for u in 0..frame_width {
            let p = h_inv * Vector3::new(u as f64, v as f64, 1.0);
            if p.z.abs() < 1e-12 {
                continue;
            }
            let (x, y) = (p.x / p.z, p.y / p.z);
            if x < 0.0 || y < 0.0 || x >= target.width as f64 || y >= target.height as f64 {
                continue;
            }
            out.set(u, v, target.sample(x - 0.5, y - 0.5));
        }
    }
    out
}
