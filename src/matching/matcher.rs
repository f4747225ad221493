//! Target-level matching: pick the keyframe with the most verified inliers.

use nalgebra::{Matrix3, Point2, Point3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::debug::{KeyframeMatchDebug, MatchDebug};
use crate::detector::FeaturePoint;
use crate::target::Keyframe;

use super::homography::HomographyConfig;
use super::keyframe_match::match_keyframe;
use super::Correspondence;

/// Matcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Best/second-best Hamming ratio required to accept a match.
    pub hamming_ratio: f64,
    pub min_inliers: usize,
    /// Homography reprojection gate, in query pixels.
    pub inlier_threshold: f64,
    /// Spatial gate of the second pass, in keyframe pixels.
    pub second_pass_radius: f64,
    /// Queued index branches expanded after the initial descent.
    pub max_pops: usize,
    pub homography: HomographyConfig,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            hamming_ratio: 0.7,
            min_inliers: 6,
            inlier_threshold: 3.0,
            second_pass_radius: 10.0,
            max_pops: 8,
            homography: HomographyConfig::default(),
        }
    }
}

/// Winning keyframe and its screen/world correspondences.
#[derive(Debug, Clone)]
pub struct DetectionMatch {
    pub keyframe_index: usize,
    pub homography: Matrix3<f64>,
    pub correspondences: Vec<Correspondence>,
}

/// Matches query features against the keyframes of one target.
#[derive(Debug, Clone)]
pub struct Matcher {
    query_width: usize,
    query_height: usize,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(query_width: usize, query_height: usize, config: MatcherConfig) -> Self {
        Self {
            query_width,
            query_height,
            config,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Match `points` against every keyframe. `None` when no keyframe reaches
    /// the minimum inlier count.
    pub fn match_detection(
        &self,
        keyframes: &[Keyframe],
        points: &[FeaturePoint],
        debug: Option<&mut MatchDebug>,
    ) -> Option<DetectionMatch> {
        let query_size = (self.query_width, self.query_height);
        let results: Vec<_> = keyframes
            .par_iter()
            .enumerate()
            .map(|(i, keyframe)| {
                let mut stats = KeyframeMatchDebug {
                    keyframe_index: i,
                    ..Default::default()
                };
                let found = match_keyframe(keyframe, points, query_size, &self.config, Some(&mut stats));
                (found, stats)
            })
            .collect();

        let mut best: Option<(usize, super::KeyframeMatch<'_>)> = None;
        let mut per_keyframe = Vec::with_capacity(results.len());
        for (i, (found, stats)) in results.into_iter().enumerate() {
            per_keyframe.push(stats);
            let Some(m) = found else {
                continue;
            };
            if m.matches.len() < self.config.min_inliers {
                continue;
            }
            if best.as_ref().map_or(true, |(_, b)| b.matches.len() < m.matches.len()) {
                best = Some((i, m));
            }
        }

        if let Some(debug) = debug {
            debug.keyframes = per_keyframe;
            debug.best_keyframe = best.as_ref().map(|(i, _)| *i);
        }

        let (keyframe_index, m) = best?;
        let keyframe = &keyframes[keyframe_index];
        let correspondences = m
            .matches
            .iter()
            .map(|pm| Correspondence {
                screen: Point2::new(pm.query.x, pm.query.y),
                world: Point3::new(
                    (pm.key.x + 0.5) / keyframe.scale,
                    (pm.key.y + 0.5) / keyframe.scale,
                    0.0,
                ),
            })
            .collect();

        Some(DetectionMatch {
            keyframe_index,
            homography: m.homography,
            correspondences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_target;
    use crate::detector::{Descriptor, DESCRIPTOR_BYTES};
    use crate::test_support::textured_image;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_random_points_do_not_match() {
        let target = compile_target(&textured_image(192, 192, 21));
        let mut rng = StdRng::seed_from_u64(99);
        let points: Vec<FeaturePoint> = (0..300)
            .map(|_| FeaturePoint {
                maxima: rng.gen(),
                x: rng.gen_range(0.0..256.0),
                y: rng.gen_range(0.0..256.0),
                scale: 2f64.powf(rng.gen_range(0.0..3.0)),
                angle: rng.gen_range(0.0..std::f64::consts::TAU),
                descriptor: Descriptor((0..DESCRIPTOR_BYTES).map(|_| rng.gen()).collect()),
            })
            .collect();

        let matcher = Matcher::new(256, 256, MatcherConfig::default());
        let mut debug = MatchDebug::default();
        assert!(matcher.match_detection(&target.keyframes, &points, Some(&mut debug)).is_none());
        assert_eq!(debug.keyframes.len(), target.keyframes.len());
        assert!(debug.best_keyframe.is_none());
    }

    #[test]
    fn test_target_matches_its_own_features() {
        let image = textured_image(256, 256, 22);
        let target = compile_target(&image);
        // Full-resolution keyframe comes first.
        let finest = &target.keyframes[0];
        assert_eq!((finest.width, finest.height), (256, 256));

        let mut points = finest.maxima_points.clone();
        points.extend(finest.minima_points.iter().cloned());

        let matcher = Matcher::new(256, 256, MatcherConfig::default());
        let found = matcher.match_detection(&target.keyframes, &points, None).unwrap();
        assert_eq!(found.keyframe_index, 0);
        assert!(found.correspondences.len() >= 20);
        for c in &found.correspondences {
            assert!((c.world.x - (c.screen.x + 0.5)).abs() < 1e-9);
            assert!((c.world.y - (c.screen.y + 0.5)).abs() < 1e-9);
        }
    }
}
