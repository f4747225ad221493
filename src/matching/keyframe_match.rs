//! Two-pass matching against a single keyframe.

use nalgebra::Matrix3;

use crate::debug::KeyframeMatchDebug;
use crate::detector::FeaturePoint;
use crate::target::Keyframe;

use super::homography::{estimate_robust, find_inliers, matrix_inverse33, project};
use super::hough;
use super::matcher::MatcherConfig;
use super::PointMatch;

/// Verified matches against one keyframe.
#[derive(Debug, Clone)]
pub struct KeyframeMatch<'a> {
    /// Keyframe-to-query homography.
    pub homography: Matrix3<f64>,
    pub matches: Vec<PointMatch<'a>>,
}

/// Best and second-best Hamming distance over candidate keypoints.
///
/// Accepts the best when no second candidate exists or `best / second` is
/// below the ratio threshold.
fn ratio_test<'a>(
    query: &FeaturePoint,
    keypoints: &'a [FeaturePoint],
    candidates: impl Iterator<Item = usize>,
    ratio: f64,
) -> Option<&'a FeaturePoint> {
    let mut best: Option<usize> = None;
    let mut d1 = u32::MAX;
    let mut d2 = u32::MAX;
    for k in candidates {
        let d = keypoints[k].descriptor.distance(&query.descriptor);
        if d < d1 {
            d2 = d1;
            d1 = d;
            best = Some(k);
        } else if d < d2 {
            d2 = d;
        }
    }
    let best = best?;
    if d2 == u32::MAX || (d1 as f64) / (d2 as f64) < ratio {
        Some(&keypoints[best])
    } else {
        None
    }
}

fn endpoints(matches: &[PointMatch<'_>]) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    matches
        .iter()
        .map(|m| ([m.key.x, m.key.y], [m.query.x, m.query.y]))
        .unzip()
}

/// Hough filter, robust homography, inlier gate.
fn verify<'a>(
    matches: &[PointMatch<'a>],
    keyframe: &Keyframe,
    query_size: (usize, usize),
    config: &MatcherConfig,
) -> Option<(Matrix3<f64>, Vec<PointMatch<'a>>, usize)> {
    let hough_matches = hough::filter(matches, keyframe.width, keyframe.height, query_size.0, query_size.1);
    let (src, dst) = endpoints(&hough_matches);
    let h = estimate_robust(
        &src,
        &dst,
        keyframe.width as f64,
        keyframe.height as f64,
        &config.homography,
    )?;
    let inliers = find_inliers(&h, &src, &dst, config.inlier_threshold)
        .into_iter()
        .map(|i| hough_matches[i])
        .collect();
    Some((h, inliers, hough_matches.len()))
}

/// Match `query` points against `keyframe`.
///
/// Pass 1 searches the hierarchical index. Pass 2 re-searches every keypoint
/// within `second_pass_radius` of each query point mapped back through the
/// pass-1 homography. Each pass is verified by Hough voting and a homography.
pub fn match_keyframe<'a>(
    keyframe: &'a Keyframe,
    query: &'a [FeaturePoint],
    query_size: (usize, usize),
    config: &MatcherConfig,
    debug: Option<&mut KeyframeMatchDebug>,
) -> Option<KeyframeMatch<'a>> {
    let mut scratch = KeyframeMatchDebug::default();
    let stats = debug.unwrap_or(&mut scratch);

    // Step 1: index search
    let mut matches = Vec::new();
    for q in query {
        let keypoints = keyframe.points(q.maxima);
        if keypoints.is_empty() {
            continue;
        }
        let candidates = keyframe.index(q.maxima).query(keypoints, &q.descriptor, config.max_pops);
        if let Some(key) = ratio_test(q, keypoints, candidates.into_iter().map(|i| i as usize), config.hamming_ratio) {
            matches.push(PointMatch { query: q, key });
        }
    }
    stats.first_pass_matches = matches.len();
    if matches.len() < config.min_inliers {
        return None;
    }

    let (h, inliers, hough_count) = verify(&matches, keyframe, query_size, config)?;
    stats.first_pass_hough = hough_count;
    stats.first_pass_inliers = inliers.len();
    if inliers.len() < config.min_inliers {
        return None;
    }

    // Step 2: spatially gated search through the inverse homography
    let h_inv = matrix_inverse33(&h, 1e-5)?;
    let radius2 = config.second_pass_radius * config.second_pass_radius;
    let mut matches2 = Vec::new();
    for q in query {
        let Some(mapped) = project(&h_inv, q.x, q.y) else {
            continue;
        };
        let keypoints = keyframe.points(q.maxima);
        let nearby = keypoints.iter().enumerate().filter_map(|(k, kp)| {
            let d2 = (kp.x - mapped[0]).powi(2) + (kp.y - mapped[1]).powi(2);
            (d2 <= radius2).then_some(k)
        });
        if let Some(key) = ratio_test(q, keypoints, nearby, config.hamming_ratio) {
            matches2.push(PointMatch { query: q, key });
        }
    }
    stats.second_pass_matches = matches2.len();

    let (h2, inliers2, hough_count2) = verify(&matches2, keyframe, query_size, config)?;
    stats.second_pass_hough = hough_count2;
    stats.second_pass_inliers = inliers2.len();

    Some(KeyframeMatch {
        homography: h2,
        matches: inliers2,
    })
}
