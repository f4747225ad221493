//! Selection of distinctive template locations for the frame tracker.
//!
//! 1. Gradient magnitude map and 4-neighbour maxima
//! 2. Histogram cut keeping the strongest ~2% of pixels
//! 3. Self-similarity map: how well each candidate's template matches its
//!    own surroundings (low is distinctive)
//! 4. Greedy selection with an occupancy exclusion zone

use rayon::prelude::*;

use crate::correlation::{similarity, IntegralImage, TemplateStats};
use crate::image::GreyImage;
use crate::target::TrackingPoint;

const TEMPLATE_SIZE: usize = 6;
const SEARCH_SIZE1: i64 = 10;
const SEARCH_SIZE2: i64 = 2;
const MAX_SIM_THRESH: f64 = 0.95;
const MAX_THRESH: f64 = 0.9;
const MIN_THRESH: f64 = 0.55;
const SD_THRESH: f64 = 8.0;
const TEMPLATE_SD_THRESH: f64 = 5.0;
const OCCUPANCY_DIV: usize = 10;
const HISTOGRAM_BINS: usize = 1000;
const KEEP_FRACTION: f64 = 0.02;

/// Extract tracking points from a tracking keyframe image.
pub fn extract(image: &GreyImage) -> Vec<TrackingPoint> {
    let (w, h) = (image.width, image.height);
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let integral = IntegralImage::new(image);

    let gradient = gradient_map(image);
    let candidates = strongest_maxima(&gradient, w, h);
    let feature_map = self_similarity_map(image, &integral, &candidates);
    select(image, &integral, feature_map)
}

/// Mean gradient magnitude over a 3x3 neighbourhood, `-1` on the border.
fn gradient_map(image: &GreyImage) -> Vec<f64> {
    let (w, h) = (image.width, image.height);
    let mut out = vec![-1.0; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        if y == 0 || y + 1 == h {
            return;
        }
        for x in 1..w - 1 {
            let mut dx = 0.0f64;
            let mut dy = 0.0f64;
            for k in -1i64..=1 {
                let (xi, yi) = (x as i64, y as i64);
                dx += (image.get_clamped(xi + 1, yi + k) - image.get_clamped(xi - 1, yi + k)) as f64;
                dy += (image.get_clamped(xi + k, yi + 1) - image.get_clamped(xi + k, yi - 1)) as f64;
            }
            dx /= 3.0 * 256.0;
            dy /= 3.0 * 256.0;
            row[x] = ((dx * dx + dy * dy) / 2.0).sqrt();
        }
    });
    out
}

/// Strict 4-neighbour maxima of the gradient map surviving the histogram cut.
fn strongest_maxima(d: &[f64], w: usize, h: usize) -> Vec<bool> {
    let mut selected = vec![false; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let p = y * w + x;
            let v = d[p];
            selected[p] = v > 0.0 && v > d[p - 1] && v > d[p + 1] && v > d[p - w] && v > d[p + w];
        }
    }

    let bin = |v: f64| ((v * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
    let mut hist = vec![0usize; HISTOGRAM_BINS];
    for (p, &s) in selected.iter().enumerate() {
        if s {
            hist[bin(d[p])] += 1;
        }
    }

    let max_points = KEEP_FRACTION * (w * h) as f64;
    let mut cut = HISTOGRAM_BINS;
    let mut count = 0usize;
    while cut > 0 {
        count += hist[cut - 1];
        if count as f64 > max_points {
            break;
        }
        cut -= 1;
    }

    // Keep bins strictly above the one that overflowed the budget.
    for (p, s) in selected.iter_mut().enumerate() {
        if *s && bin(d[p]) < cut {
            *s = false;
        }
    }
    selected
}

/// Highest similarity between a candidate's template and the ring around it.
///
/// Non-candidates, flat templates and out-of-image windows score `1.0`.
fn self_similarity_map(image: &GreyImage, integral: &IntegralImage, candidates: &[bool]) -> Vec<f64> {
    let w = image.width;
    let mut map = vec![1.0; candidates.len()];
    map.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            if !candidates[y * w + x] {
                continue;
            }
            let (cx, cy) = (x as i64, y as i64);
            let Some(stats) = TemplateStats::from_integral(integral, cx, cy, TEMPLATE_SIZE, TEMPLATE_SD_THRESH) else {
                continue;
            };
            let mut max = -1.0f64;
            'search: for sy in -SEARCH_SIZE1..=SEARCH_SIZE1 {
                for sx in -SEARCH_SIZE1..=SEARCH_SIZE1 {
                    if sx.abs() <= SEARCH_SIZE2 && sy.abs() <= SEARCH_SIZE2 {
                        continue;
                    }
                    let Some(sim) = similarity(image, integral, cx + sx, cy + sy, image, cx, cy, TEMPLATE_SIZE, &stats)
                    else {
                        continue;
                    };
                    if sim > max {
                        max = sim;
                        if max > MAX_SIM_THRESH {
                            break 'search;
                        }
                    }
                }
            }
            *out = max;
        }
    });
    map
}

/// Greedy pick of the least self-similar locations.
fn select(image: &GreyImage, integral: &IntegralImage, mut map: Vec<f64>) -> Vec<TrackingPoint> {
    let (w, h) = (image.width, image.height);
    let occupancy = (w.min(h) / OCCUPANCY_DIV).max(1);
    let div_size = (2 * TEMPLATE_SIZE + 1) * 3;
    let max_features = (w / occupancy) * (h / occupancy) + (w / div_size) * (h / div_size);

    let mut points = Vec::new();
    while points.len() < max_features {
        // Step 1: most distinctive remaining location
        let mut min_sim = MAX_THRESH;
        let mut best = None;
        for (p, &v) in map.iter().enumerate() {
            if v < min_sim {
                min_sim = v;
                best = Some(p);
            }
        }
        let Some(p) = best else {
            break;
        };
        let (cx, cy) = ((p % w) as i64, (p / w) as i64);

        // Step 2: enough texture
        let Some(stats) = TemplateStats::from_integral(integral, cx, cy, TEMPLATE_SIZE, SD_THRESH) else {
            map[p] = 1.0;
            continue;
        };

        // Step 3: distinct from its immediate neighbourhood, but not a flat copy of it
        let mut min = 1.0f64;
        let mut max = -1.0f64;
        for j in -SEARCH_SIZE2..=SEARCH_SIZE2 {
            for i in -SEARCH_SIZE2..=SEARCH_SIZE2 {
                if i * i + j * j > SEARCH_SIZE2 * SEARCH_SIZE2 || (i == 0 && j == 0) {
                    continue;
                }
                let Some(sim) = similarity(image, integral, cx + i, cy + j, image, cx, cy, TEMPLATE_SIZE, &stats) else {
                    continue;
                };
                min = min.min(sim);
                max = max.max(sim);
            }
        }
        if (min < min_sim && min < MIN_THRESH) || max > 0.99 {
            map[p] = 1.0;
            continue;
        }

        points.push(TrackingPoint {
            x: cx as f64,
            y: cy as f64,
        });

        // Step 4: occupancy exclusion
        let occ = occupancy as i64;
        for j in (cy - occ).max(0)..=(cy + occ).min(h as i64 - 1) {
            for i in (cx - occ).max(0)..=(cx + occ).min(w as i64 - 1) {
                map[j as usize * w + i as usize] = 1.0;
            }
        }
    }
    points
}
