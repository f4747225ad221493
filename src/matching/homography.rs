//! Homography estimation: normalized DLT, geometric vetting and preemptive
//! robust hypothesis selection.
//!
//! Provides:
//! - [`solve_homography`]: DLT from ≥4 correspondences with centroid / unit-RMS
//!   normalization.
//! - [`estimate_robust`]: random 4-point hypotheses scored preemptively with a
//!   Cauchy cost.
//! - [`find_inliers`]: reprojection-error gate.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Robust selection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyConfig {
    pub num_hypotheses: usize,
    /// Sampling attempts allowed per wanted hypothesis.
    pub trials_per_hypothesis: usize,
    /// Correspondences scored per preemption round.
    pub chunk_size: usize,
    pub cauchy_scale: f64,
    pub seed: u64,
}

impl Default for HomographyConfig {
    fn default() -> Self {
        Self {
            num_hypotheses: 20,
            trials_per_hypothesis: 2,
            chunk_size: 10,
            cauchy_scale: 0.01,
            seed: 1234,
        }
    }
}

// ── Projection ───────────────────────────────────────────────────────────

/// Project a 2D point through a homography. `None` at infinity.
#[inline]
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some([p[0] / p[2], p[1] / p[2]])
}

/// Inverse of a 3x3 matrix, `None` when `|det| < threshold`.
pub fn matrix_inverse33(m: &Matrix3<f64>, threshold: f64) -> Option<Matrix3<f64>> {
    if m.determinant().abs() < threshold {
        return None;
    }
    m.try_inverse()
}

// ── Normalization ────────────────────────────────────────────────────────

/// Translate the centroid to the origin and scale to unit RMS distance.
fn normalize_points(pts: &[[f64; 2]]) -> Option<(Matrix3<f64>, Vec<[f64; 2]>)> {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let ms = pts
        .iter()
        .map(|p| (p[0] - cx).powi(2) + (p[1] - cy).powi(2))
        .sum::<f64>()
        / n;
    if ms < 1e-18 {
        return None;
    }
    let s = 1.0 / ms.sqrt();

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    Some((t, normalized))
}

// ── DLT ──────────────────────────────────────────────────────────────────

/// Homography `H` with `dst ≈ H src`, normalized so `H[2][2] = 1`.
///
/// Returns `None` for fewer than four points or degenerate configurations.
pub fn solve_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }

    let (t_src, src_n) = normalize_points(src)?;
    let (t_dst, dst_n) = normalize_points(dst)?;

    // Build 2n × 9 matrix A
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        // Row 2i:   [  0  0  0 | -sx -sy -1 | dy*sx  dy*sy  dy ]
        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        // Row 2i+1: [ sx  sy  1 |  0  0  0 | -dx*sx -dx*sy -dx ]
        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue.
    let ata = a.transpose() * &a;
    let eig = SymmetricEigen::new(ata);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))?;
    let h = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let h = t_dst.try_inverse()? * h_norm * t_src;
    normalize_homography(&h)
}

/// Scale so that `H[2][2] = 1`.
pub fn normalize_homography(h: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 || !s.is_finite() {
        return None;
    }
    Some(h / s)
}

// ── Planar geometry checks ───────────────────────────────────────────────

/// Signed area test: positive when `c` is left of `a → b`.
#[inline]
fn line_point_side(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn three_points_consistent(p: [&[f64; 2]; 3], q: [&[f64; 2]; 3]) -> bool {
    (line_point_side(p[0], p[1], p[2]) > 0.0) == (line_point_side(q[0], q[1], q[2]) > 0.0)
}

/// Every triple of the four source points keeps its orientation in the destination.
pub fn four_points_consistent(src: [&[f64; 2]; 4], dst: [&[f64; 2]; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().all(|t| {
        three_points_consistent([src[t[0]], src[t[1]], src[t[2]]], [dst[t[0]], dst[t[1]], dst[t[2]]])
    })
}

pub fn quadrilateral_convex(q: &[[f64; 2]; 4]) -> bool {
    let first = line_point_side(&q[0], &q[1], &q[2]) <= 0.0;
    (1..4).all(|i| (line_point_side(&q[i], &q[(i + 1) % 4], &q[(i + 2) % 4]) <= 0.0) == first)
}

pub fn smallest_triangle_area(q: &[[f64; 2]; 4]) -> f64 {
    let v = |a: usize, b: usize| [q[b][0] - q[a][0], q[b][1] - q[a][1]];
    let area = |u: [f64; 2], w: [f64; 2]| (u[0] * w[1] - u[1] * w[0]).abs() * 0.5;
    let (v12, v13, v14, v32, v34) = (v(0, 1), v(0, 2), v(0, 3), v(2, 1), v(2, 3));
    area(v12, v13).min(area(v13, v14)).min(area(v12, v14)).min(area(v32, v34))
}

fn corners(width: f64, height: f64) -> [[f64; 2]; 4] {
    [[0.0, 0.0], [width, 0.0], [width, height], [0.0, height]]
}

/// Corners mapped through `h` keep the orientation of every consecutive triple.
fn corners_consistent(h: &Matrix3<f64>, quad: &[[f64; 2]; 4]) -> bool {
    let mut mapped = [[0.0; 2]; 4];
    for (m, c) in mapped.iter_mut().zip(quad) {
        match project(h, c[0], c[1]) {
            Some(p) => *m = p,
            None => return false,
        }
    }
    (0..4).all(|i| {
        let (a, b, c) = (i, (i + 1) % 4, (i + 2) % 4);
        three_points_consistent([&quad[a], &quad[b], &quad[c]], [&mapped[a], &mapped[b], &mapped[c]])
    })
}

/// The keyframe outline mapped by `h` is convex and not collapsed.
fn passes_heuristics(h: &Matrix3<f64>, key_width: f64, key_height: f64) -> bool {
    let quad = corners(key_width, key_height);
    let mut mapped = [[0.0; 2]; 4];
    for (m, c) in mapped.iter_mut().zip(&quad) {
        match project(h, c[0], c[1]) {
            Some(p) => *m = p,
            None => return false,
        }
    }
    if smallest_triangle_area(&mapped) < key_width * key_height * 1e-4 {
        return false;
    }
    quadrilateral_convex(&mapped)
}

// ── Robust estimation ────────────────────────────────────────────────────

#[inline]
fn cauchy_cost(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2], one_over_scale2: f64) -> f64 {
    match project(h, src[0], src[1]) {
        Some(p) => {
            let d2 = (p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2);
            (1.0 + d2 * one_over_scale2).ln()
        }
        None => f64::INFINITY,
    }
}

/// Partial Fisher-Yates: shuffle the first `count` entries of `perm`.
fn shuffle_prefix(perm: &mut [usize], count: usize, rng: &mut StdRng) {
    let n = perm.len();
    for i in 0..count.min(n) {
        let j = rng.gen_range(i..n);
        perm.swap(i, j);
    }
}

/// Select a homography from keyframe points `src` to query points `dst`.
///
/// Hypotheses come from random orientation-consistent 4-point samples. They
/// accumulate Cauchy reprojection cost over chunks of correspondences, and the
/// worse half is dropped after each chunk. The best survivor passing the
/// outline heuristics wins.
pub fn estimate_robust(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    key_width: f64,
    key_height: f64,
    config: &HomographyConfig,
) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let outline = corners(key_width, key_height);
    let one_over_scale2 = 1.0 / (config.cauchy_scale * config.cauchy_scale);
    let chunk = config.chunk_size.clamp(1, n);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut perm: Vec<usize> = (0..n).collect();
    shuffle_prefix(&mut perm, n, &mut rng);

    // Step 1: hypotheses
    let max_trials = config.num_hypotheses * config.trials_per_hypothesis;
    let mut hypotheses: Vec<(Matrix3<f64>, f64)> = Vec::with_capacity(config.num_hypotheses);
    let mut trial = 0;
    while trial < max_trials && hypotheses.len() < config.num_hypotheses {
        trial += 1;
        shuffle_prefix(&mut perm, 4, &mut rng);
        let s = [&src[perm[0]], &src[perm[1]], &src[perm[2]], &src[perm[3]]];
        let d = [&dst[perm[0]], &dst[perm[1]], &dst[perm[2]], &dst[perm[3]]];
        if !four_points_consistent(s, d) {
            continue;
        }
        let Some(h) = solve_homography(&s.map(|p| *p), &d.map(|p| *p)) else {
            continue;
        };
        if !corners_consistent(&h, &outline) {
            continue;
        }
        hypotheses.push((h, 0.0));
    }
    if hypotheses.is_empty() {
        return None;
    }

    // Step 2: preemptive scoring
    let mut start = 0;
    while start < n && hypotheses.len() > 2 {
        let end = (start + chunk).min(n);
        for (h, cost) in hypotheses.iter_mut() {
            for &k in &perm[start..end] {
                *cost += cauchy_cost(h, &src[k], &dst[k], one_over_scale2);
            }
        }
        hypotheses.sort_by(|a, b| a.1.total_cmp(&b.1));
        let keep = hypotheses.len() - (hypotheses.len() + 1) / 2;
        hypotheses.truncate(keep);
        start = end;
    }

    // Step 3: first survivor passing the heuristics
    hypotheses
        .iter()
        .filter_map(|(h, _)| normalize_homography(h))
        .find(|h| passes_heuristics(h, key_width, key_height))
}

/// Indices of correspondences whose reprojection error is within `threshold` pixels.
pub fn find_inliers(h: &Matrix3<f64>, src: &[[f64; 2]], dst: &[[f64; 2]], threshold: f64) -> Vec<usize> {
    let t2 = threshold * threshold;
    src.iter()
        .zip(dst)
        .enumerate()
        .filter_map(|(i, (s, d))| {
            let p = project(h, s[0], s[1])?;
            let d2 = (p[0] - d[0]).powi(2) + (p[1] - d[1]).powi(2);
            (d2 <= t2).then_some(i)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn known_h() -> Matrix3<f64> {
        Matrix3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 0.0004, -0.0002, 1.0)
    }

    fn map(h: &Matrix3<f64>, pts: &[[f64; 2]]) -> Vec<[f64; 2]> {
        pts.iter().map(|p| project(h, p[0], p[1]).unwrap()).collect()
    }

    #[test]
    fn test_four_point_round_trip() {
        let h = known_h();
        let src = [[0.0, 0.0], [100.0, 5.0], [90.0, 120.0], [-10.0, 80.0]];
        let dst = map(&h, &src);
        let est = solve_homography(&src, &dst).unwrap();
        assert_relative_eq!(est, h, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let h = known_h();
        let inv = matrix_inverse33(&h, 1e-5).unwrap();
        assert_relative_eq!(inv * h, Matrix3::identity(), epsilon = 1e-9);
        assert!(matrix_inverse33(&Matrix3::zeros(), 1e-5).is_none());
    }

    #[test]
    fn test_degenerate_input_rejected() {
        let same = [[5.0, 5.0]; 4];
        let dst = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert!(solve_homography(&same, &dst).is_none());
        assert!(solve_homography(&dst[..3], &dst[..3]).is_none());
    }

    #[test]
    fn test_geometry_checks() {
        let square = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        assert!(quadrilateral_convex(&square));
        assert_relative_eq!(smallest_triangle_area(&square), 50.0);

        let bowtie = [[0.0, 0.0], [10.0, 10.0], [10.0, 0.0], [0.0, 10.0]];
        assert!(!quadrilateral_convex(&bowtie));

        let mirrored = [[0.0, 0.0], [-10.0, 0.0], [-10.0, 10.0], [0.0, 10.0]];
        let s = [&square[0], &square[1], &square[2], &square[3]];
        let m = [&mirrored[0], &mirrored[1], &mirrored[2], &mirrored[3]];
        assert!(!four_points_consistent(s, m));
        assert!(four_points_consistent(s, s));
    }

    #[test]
    fn test_robust_estimate_with_outliers() {
        let h = known_h();
        let mut src = Vec::new();
        for i in 0..8 {
            for j in 0..8 {
                src.push([10.0 + i as f64 * 25.0, 8.0 + j as f64 * 27.0]);
            }
        }
        let mut dst = map(&h, &src);
        // Corrupt a quarter of the correspondences.
        for k in (0..dst.len()).step_by(4) {
            dst[k][0] += 40.0 + k as f64;
            dst[k][1] -= 25.0;
        }
        let est = estimate_robust(&src, &dst, 200.0, 200.0, &HomographyConfig::default()).unwrap();
        let inliers = find_inliers(&est, &src, &dst, 3.0);
        assert_eq!(inliers.len(), 48);
        for p in [[50.0, 50.0], [150.0, 120.0]] {
            let a = project(&est, p[0], p[1]).unwrap();
            let b = project(&h, p[0], p[1]).unwrap();
            assert_relative_eq!(a[0], b[0], epsilon = 1e-3);
            assert_relative_eq!(a[1], b[1], epsilon = 1e-3);
        }
    }
}
