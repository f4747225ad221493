//! Hough voting over similarity transforms.
//!
//! Each correspondence predicts where the keyframe centre lands in the query
//! image, plus a relative rotation and log-scale. Votes go to the 16 bins
//! surrounding that 4D location; only correspondences near the winning bin
//! survive.

use std::collections::HashMap;
use std::f64::consts::PI;

use super::PointMatch;

const NUM_ANGLE_BINS: usize = 12;
const NUM_SCALE_BINS: usize = 10;
const MIN_LOG_SCALE: f64 = -1.0;
const MAX_LOG_SCALE: f64 = 1.0;
/// Query extent covered by the offset bins, as a multiple of the query size.
const RANGE_FACTOR: f64 = 1.2;
const MIN_XY_BINS: usize = 5;
const MIN_VOTES: u32 = 3;
/// Survivors must lie within this many bins of the peak centre on every axis.
const BIN_DELTA: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct BinLocation {
    x: f64,
    y: f64,
    angle: f64,
    scale: f64,
}

/// Similarity transform implied by one correspondence, applied to the keyframe centre.
fn map_correspondence(m: &PointMatch<'_>, center_x: f64, center_y: f64) -> (f64, f64, f64, f64) {
    let mut angle = m.query.angle - m.key.angle;
    if angle <= -PI {
        angle += 2.0 * PI;
    } else if angle > PI {
        angle -= 2.0 * PI;
    }
    let scale = m.query.scale / m.key.scale;

    let c = scale * angle.cos();
    let s = scale * angle.sin();
    let tx = m.query.x - (c * m.key.x - s * m.key.y);
    let ty = m.query.y - (s * m.key.x + c * m.key.y);

    (c * center_x - s * center_y + tx, s * center_x + c * center_y + ty, angle, scale.log10())
}

/// Index of the "median" projected dimension.
///
/// Kept as `n/2 - (n even) - 1`, which sits one below the usual lower median;
/// the bin size was tuned against this choice. Clamped at zero for tiny inputs.
fn median_index(n: usize) -> usize {
    let even = usize::from(n % 2 == 0);
    (n / 2).saturating_sub(even).saturating_sub(1)
}

/// Keep the correspondences consistent with the dominant similarity transform.
pub fn filter<'a>(
    matches: &[PointMatch<'a>],
    key_width: usize,
    key_height: usize,
    query_width: usize,
    query_height: usize,
) -> Vec<PointMatch<'a>> {
    if matches.is_empty() {
        return Vec::new();
    }

    let max_x = query_width as f64 * RANGE_FACTOR;
    let min_x = -max_x;
    let max_y = query_height as f64 * RANGE_FACTOR;
    let min_y = -max_y;

    let max_dim = key_width.max(key_height) as f64;
    let center_x = (key_width / 2) as f64;
    let center_y = (key_height / 2) as f64;

    // Step 1: bin size from the median projected keyframe size
    let mut projected: Vec<f64> = matches
        .iter()
        .map(|m| m.query.scale / m.key.scale * max_dim)
        .collect();
    projected.sort_by(|a, b| a.total_cmp(b));
    let bin_size = 0.25 * projected[median_index(projected.len())];
    if !(bin_size > 0.0) {
        return Vec::new();
    }

    let num_x = MIN_XY_BINS.max(((max_x - min_x) / bin_size).ceil() as usize);
    let num_y = MIN_XY_BINS.max(((max_y - min_y) / bin_size).ceil() as usize);
    let num_xy = num_x * num_y;
    let num_xya = num_xy * NUM_ANGLE_BINS;

    // Step 2: voting
    let mut locations: Vec<Option<BinLocation>> = Vec::with_capacity(matches.len());
    let mut votes: HashMap<usize, u32> = HashMap::new();
    for m in matches {
        let (x, y, angle, scale) = map_correspondence(m, center_x, center_y);
        if x < min_x
            || x >= max_x
            || y < min_y
            || y >= max_y
            || angle <= -PI
            || angle > PI
            || scale < MIN_LOG_SCALE
            || scale >= MAX_LOG_SCALE
        {
            locations.push(None);
            continue;
        }

        let loc = BinLocation {
            x: num_x as f64 * (x - min_x) / (max_x - min_x),
            y: num_y as f64 * (y - min_y) / (max_y - min_y),
            angle: NUM_ANGLE_BINS as f64 * (angle + PI) / (2.0 * PI),
            scale: NUM_SCALE_BINS as f64 * (scale - MIN_LOG_SCALE) / (MAX_LOG_SCALE - MIN_LOG_SCALE),
        };

        let bx = (loc.x - 0.5).floor() as i64;
        let by = (loc.y - 0.5).floor() as i64;
        let bs = (loc.scale - 0.5).floor() as i64;
        let ba = ((loc.angle - 0.5).floor() as i64).rem_euclid(NUM_ANGLE_BINS as i64) as usize;

        if bx < 0 || bx + 1 >= num_x as i64 || by < 0 || by + 1 >= num_y as i64 || bs < 0 || bs + 1 >= NUM_SCALE_BINS as i64 {
            locations.push(None);
            continue;
        }
        let (bx, by, bs) = (bx as usize, by as usize, bs as usize);

        for dx in 0..2 {
            for dy in 0..2 {
                for da in 0..2 {
                    for ds in 0..2 {
                        let a = (ba + da) % NUM_ANGLE_BINS;
                        let index = (bx + dx) + (by + dy) * num_x + a * num_xy + (bs + ds) * num_xya;
                        *votes.entry(index).or_insert(0) += 1;
                    }
                }
            }
        }
        locations.push(Some(loc));
    }

    // Step 3: peak, ties broken by the lowest bin index
    let Some((&peak, &peak_votes)) = votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
    else {
        return Vec::new();
    };
    if peak_votes < MIN_VOTES {
        return Vec::new();
    }

    let peak_x = peak % num_x;
    let peak_y = (peak % num_xy) / num_x;
    let peak_a = (peak % num_xya) / num_xy;
    let peak_s = peak / num_xya;

    // Step 4: survivors
    matches
        .iter()
        .zip(&locations)
        .filter_map(|(m, loc)| {
            let loc = loc.as_ref()?;
            if (loc.x - (peak_x as f64 + 0.5)).abs() >= BIN_DELTA {
                return None;
            }
            if (loc.y - (peak_y as f64 + 0.5)).abs() >= BIN_DELTA {
                return None;
            }
            if (loc.scale - (peak_s as f64 + 0.5)).abs() >= BIN_DELTA {
                return None;
            }
            let d = (loc.angle - (peak_a as f64 + 0.5)).abs();
            if d.min(NUM_ANGLE_BINS as f64 - d) >= BIN_DELTA {
                return None;
            }
            Some(*m)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Descriptor, FeaturePoint};

    fn fp(x: f64, y: f64, scale: f64, angle: f64) -> FeaturePoint {
        FeaturePoint {
            maxima: true,
            x,
            y,
            scale,
            angle,
            descriptor: Descriptor::zeros(),
        }
    }

    #[test]
    fn test_median_index() {
        assert_eq!(median_index(1), 0);
        assert_eq!(median_index(2), 0);
        assert_eq!(median_index(6), 1);
        assert_eq!(median_index(7), 2);
    }

    #[test]
    fn test_consistent_translation_survives_outlier_rejected() {
        // Keyframe points translated by (40, 30) with equal scale and angle.
        let keys: Vec<FeaturePoint> = (0..20)
            .map(|i| fp(10.0 + (i * 7 % 100) as f64, 12.0 + (i * 13 % 90) as f64, 2.0, 1.0))
            .collect();
        let mut queries: Vec<FeaturePoint> = keys.iter().map(|k| fp(k.x + 40.0, k.y + 30.0, 2.0, 1.0)).collect();
        // Two wildly inconsistent correspondences.
        queries[3] = fp(5.0, 180.0, 2.0, 1.0);
        queries[11] = fp(keys[11].x + 40.0, keys[11].y + 30.0, 2.0, 2.5);

        let matches: Vec<PointMatch<'_>> = keys
            .iter()
            .zip(&queries)
            .map(|(key, query)| PointMatch { query, key })
            .collect();
        let kept = filter(&matches, 128, 128, 256, 256);

        assert_eq!(kept.len(), 18);
        assert!(!kept.iter().any(|m| std::ptr::eq(m.query, &queries[3])));
        assert!(!kept.iter().any(|m| std::ptr::eq(m.query, &queries[11])));
    }

    #[test]
    fn test_too_few_votes() {
        let k = fp(10.0, 10.0, 1.0, 0.0);
        let q = fp(20.0, 20.0, 1.0, 0.0);
        let matches = vec![PointMatch { query: &q, key: &k }, PointMatch { query: &q, key: &k }];
        assert!(filter(&matches, 64, 64, 128, 128).is_empty());
    }
}
