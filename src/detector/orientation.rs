//! Dominant gradient orientation from a smoothed 36-bin histogram.

use std::f64::consts::PI;

use crate::image::GreyImage;

pub const NUM_BINS: usize = 36;
const SMOOTHING_ITERATIONS: usize = 5;
const GAUSSIAN_EXPANSION_FACTOR: f64 = 3.0;
const REGION_EXPANSION_FACTOR: f64 = 1.5;

/// Orientation in `[0, 2π)` of a feature at octave coordinates `(x, y)`.
pub fn dominant_orientation(image: &GreyImage, x: f64, y: f64, relative_scale: f64) -> f64 {
    let mut hist = histogram(image, x, y, relative_scale);
    for _ in 0..SMOOTHING_ITERATIONS {
        smooth_circular(&mut hist);
    }
    peak_angle(&hist)
}

fn histogram(image: &GreyImage, x: f64, y: f64, relative_scale: f64) -> [f64; NUM_BINS] {
    let mut hist = [0.0f64; NUM_BINS];

    let gw_sigma = (GAUSSIAN_EXPANSION_FACTOR * relative_scale).max(1.0);
    let gw_scale = -1.0 / (2.0 * gw_sigma * gw_sigma);
    let radius = REGION_EXPANSION_FACTOR * gw_sigma;
    let radius2 = radius * radius;
    let r = radius.ceil() as i64;

    let (cx, cy) = (x.round() as i64, y.round() as i64);
    let (w, h) = (image.width as i64, image.height as i64);

    for yp in (cy - r).max(1)..=(cy + r).min(h - 2) {
        for xp in (cx - r).max(1)..=(cx + r).min(w - 2) {
            let dx = xp as f64 - x;
            let dy = yp as f64 - y;
            let d2 = dx * dx + dy * dy;
            if d2 > radius2 {
                continue;
            }

            let gx = (image.get((xp + 1) as usize, yp as usize) - image.get((xp - 1) as usize, yp as usize)) as f64;
            let gy = (image.get(xp as usize, (yp + 1) as usize) - image.get(xp as usize, (yp - 1) as usize)) as f64;
            let mag = (gx * gx + gy * gy).sqrt();
            if mag == 0.0 {
                continue;
            }
            let angle = gy.atan2(gx) + PI;
            let weight = (d2 * gw_scale).exp() * mag;

            let fbin = NUM_BINS as f64 * angle / (2.0 * PI);
            let bin = (fbin - 0.5).floor();
            let w2 = fbin - bin - 0.5;
            let w1 = 1.0 - w2;
            let b1 = (bin as i64).rem_euclid(NUM_BINS as i64) as usize;
            let b2 = (b1 + 1) % NUM_BINS;
            hist[b1] += w1 * weight;
            hist[b2] += w2 * weight;
        }
    }
    hist
}

fn smooth_circular(hist: &mut [f64; NUM_BINS]) {
    let prev = *hist;
    for i in 0..NUM_BINS {
        let left = prev[(i + NUM_BINS - 1) % NUM_BINS];
        let right = prev[(i + 1) % NUM_BINS];
        hist[i] = 0.25 * left + 0.5 * prev[i] + 0.25 * right;
    }
}

/// Quadratic interpolation around the strongest bin. Ties go to the lowest bin.
fn peak_angle(hist: &[f64; NUM_BINS]) -> f64 {
    let mut best = 0;
    for i in 1..NUM_BINS {
        if hist[i] > hist[best] {
            best = i;
        }
    }
    let p0 = hist[(best + NUM_BINS - 1) % NUM_BINS];
    let p1 = hist[best];
    let p2 = hist[(best + 1) % NUM_BINS];

    let denom = p0 - 2.0 * p1 + p2;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (p0 - p2) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    let angle = (best as f64 + offset + 0.5) * 2.0 * PI / NUM_BINS as f64;
    angle.rem_euclid(2.0 * PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angle_diff(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(2.0 * PI);
        d.min(2.0 * PI - d)
    }

    fn ramp(gx: f64, gy: f64) -> GreyImage {
        let data = (0..41 * 41)
            .map(|i| {
                let x = (i % 41) as f64;
                let y = (i / 41) as f64;
                (100.0 + gx * x + gy * y) as f32
            })
            .collect();
        GreyImage::new(41, 41, data).unwrap()
    }

    #[test]
    fn test_ramp_orientation_follows_gradient() {
        let a = dominant_orientation(&ramp(1.0, 0.0), 20.0, 20.0, 1.0);
        let b = dominant_orientation(&ramp(0.0, 1.0), 20.0, 20.0, 1.0);
        // Rotating the gradient by 90 degrees rotates the orientation by 90 degrees.
        assert!(angle_diff(b - a, PI / 2.0) < 0.05, "a={a} b={b}");
    }

    #[test]
    fn test_orientation_in_range() {
        let a = dominant_orientation(&ramp(-0.7, -0.7), 20.0, 20.0, 1.3);
        assert!((0.0..2.0 * PI).contains(&a));
    }

    #[test]
    fn test_flat_patch_is_deterministic() {
        let flat = GreyImage::filled(21, 21, 3.0);
        assert_eq!(dominant_orientation(&flat, 10.0, 10.0, 1.0), dominant_orientation(&flat, 10.0, 10.0, 1.0));
    }
}
