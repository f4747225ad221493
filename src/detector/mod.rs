//! Multiscale feature detection with binary descriptors.
//!
//! Pipeline per image:
//! 1. Binomial pyramid and DoG levels ([`pyramid`])
//! 2. 26-neighbour extrema on interior octaves, edge rejection ([`extrema`])
//! 3. Bucket pruning to bound the point count
//! 4. Sub-pixel localization ([`localize`])
//! 5. Orientation assignment ([`orientation`])
//! 6. FREAK-style descriptors ([`freak`])
//!
//! Detection is deterministic: the same image always yields the same points.

pub mod crop;
pub mod descriptor;
pub mod extrema;
pub mod freak;
pub mod localize;
pub mod orientation;
pub mod pyramid;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::debug::DetectorDebug;
use crate::image::GreyImage;
use crate::kernels::{KernelCache, KernelKey, KernelOp};

pub use crop::CropDetector;
pub use descriptor::{hamming_distance, Descriptor, DESCRIPTOR_BYTES};

use extrema::ExtremaThresholds;
use pyramid::{octave_to_base, Pyramid, PyramidPlan};

/// A detected feature in full-resolution image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePoint {
    /// DoG maximum (`true`) or minimum (`false`). Maxima are only ever
    /// matched against maxima.
    pub maxima: bool,
    pub x: f64,
    pub y: f64,
    /// Absolute scale, `2^(octave + offset)`.
    pub scale: f64,
    /// Orientation in radians, `[0, 2π)`.
    pub angle: f64,
    pub descriptor: Descriptor,
}

impl AsRef<Descriptor> for FeaturePoint {
    fn as_ref(&self) -> &Descriptor {
        &self.descriptor
    }
}

/// Detector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Octaves stop once either side drops below this size.
    pub min_pyramid_size: usize,
    pub max_octaves: usize,
    /// Minimum |DoG| for an extremum.
    pub laplacian_threshold: f32,
    /// Principal curvature ratio above which a point is treated as an edge.
    pub edge_threshold: f32,
    pub buckets_per_dimension: usize,
    pub max_features_per_bucket: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_pyramid_size: 8,
            max_octaves: 5,
            laplacian_threshold: 3.0,
            edge_threshold: 4.0,
            buckets_per_dimension: 10,
            max_features_per_bucket: 5,
        }
    }
}

/// Output of one detection call.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub points: Vec<FeaturePoint>,
    pub debug: Option<DetectorDebug>,
}

/// Feature detector. Keeps pyramid plans per input shape.
#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    plans: KernelCache<PyramidPlan>,
    debug: bool,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            plans: KernelCache::new(),
            debug: false,
        }
    }

    /// Attach a [`DetectorDebug`] to every detection.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect features on a greyscale image.
    pub fn detect(&mut self, image: &GreyImage) -> Detection {
        let config = &self.config;
        let key = KernelKey::new(KernelOp::Pyramid, image.width, image.height);
        let plan = self
            .plans
            .get_or_build(key, || {
                PyramidPlan::new(image.width, image.height, config.min_pyramid_size, config.max_octaves)
            })
            .clone();

        // Step 1: pyramid
        let pyramid = Pyramid::build(image, &plan);

        // Step 2: extrema
        let thresholds = ExtremaThresholds {
            laplacian: config.laplacian_threshold,
            edge_ratio: config.edge_threshold,
        };
        let per_octave = extrema::find_extrema(&pyramid, &thresholds);

        // Step 3: pruning
        let pruned = extrema::prune(
            &per_octave,
            &plan.octave_sizes,
            config.buckets_per_dimension,
            config.max_features_per_bucket,
        );

        // Step 4-6: localize, orient, describe
        let localized: Vec<_> = pruned
            .par_iter()
            .filter_map(|e| localize::localize(&pyramid, e))
            .collect();
        let points: Vec<FeaturePoint> = localized
            .par_iter()
            .map(|loc| describe(&pyramid, loc))
            .collect();

        debug!(
            octaves = plan.num_octaves(),
            pruned = pruned.len(),
            points = points.len(),
            "detected features"
        );

        let debug = self.debug.then(|| DetectorDebug {
            octave_sizes: plan.octave_sizes.clone(),
            extrema_per_octave: per_octave.iter().map(Vec::len).collect(),
            pruned: pruned.len(),
            localized: localized.len(),
            crop_origin: None,
        });

        Detection { points, debug }
    }
}

fn describe(pyramid: &Pyramid, loc: &localize::Localized) -> FeaturePoint {
    let image = &pyramid.octaves[loc.octave].blurred;
    let angle = orientation::dominant_orientation(image, loc.x, loc.y, loc.relative_scale);
    let descriptor = freak::compute(image, loc.x, loc.y, loc.relative_scale, angle);

    FeaturePoint {
        maxima: loc.maxima,
        x: octave_to_base(loc.x, loc.octave),
        y: octave_to_base(loc.y, loc.octave),
        scale: (1u64 << loc.octave) as f64 * loc.relative_scale,
        angle,
        descriptor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::textured_image;

    #[test]
    fn test_detection_is_deterministic() {
        let img = textured_image(200, 160, 3);
        let a = Detector::new(DetectorConfig::default()).detect(&img);
        let b = Detector::new(DetectorConfig::default()).detect(&img);
        assert!(!a.points.is_empty());
        assert_eq!(a.points, b.points);
    }

    #[test]
    fn test_points_bounded_and_inside_image() {
        let img = textured_image(256, 256, 5);
        let config = DetectorConfig::default();
        let limit = config.buckets_per_dimension.pow(2) * config.max_features_per_bucket;
        let det = Detector::new(config).detect(&img);
        assert!(det.points.len() <= limit);
        for p in &det.points {
            assert!(p.x > -1.0 && p.x < 257.0 && p.y > -1.0 && p.y < 257.0);
            assert!(p.scale >= 1.0);
            assert_eq!(p.descriptor.len(), DESCRIPTOR_BYTES);
        }
        assert!(det.points.iter().any(|p| p.maxima));
        assert!(det.points.iter().any(|p| !p.maxima));
    }

    #[test]
    fn test_tiny_image_yields_nothing() {
        let img = GreyImage::filled(6, 6, 10.0);
        let det = Detector::new(DetectorConfig::default()).with_debug(true).detect(&img);
        assert!(det.points.is_empty());
        assert_eq!(det.debug.unwrap().octave_sizes.len(), 0);
    }

    #[test]
    fn test_plan_reused_across_calls() {
        let img = textured_image(64, 64, 1);
        let mut detector = Detector::new(DetectorConfig::default());
        detector.detect(&img);
        detector.detect(&img);
        assert_eq!(detector.plans.len(), 1);
    }
}
