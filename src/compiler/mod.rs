//! Offline target compilation.
//!
//! A target image becomes:
//! - matching keyframes: features and both polarity indexes at every scale of
//!   [`image_list::matching_scales`]
//! - tracking keyframes: quantized images and tracking points at the scales of
//!   [`image_list::tracking_scales`]
//!
//! Compiled targets are persisted with [`container`].

pub mod container;
pub mod image_list;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detector::{Detector, DetectorConfig};
use crate::image::GreyImage;
use crate::index::IndexParams;
use crate::target::{Keyframe, Target, TrackingKeyframe};
use crate::tracking::extract;

pub use container::{ContainerError, CONTAINER_VERSION};

/// Compilation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub detector: DetectorConfig,
    pub index: IndexParams,
}

/// Compile one target with default settings.
pub fn compile_target(image: &GreyImage) -> Target {
    compile_target_with(image, &CompileConfig::default())
}

pub fn compile_target_with(image: &GreyImage, config: &CompileConfig) -> Target {
    let keyframes: Vec<Keyframe> = image_list::matching_scales(image.width, image.height)
        .into_par_iter()
        .map(|scale| {
            let resized = image.resize(scale);
            let mut detector = Detector::new(config.detector.clone());
            let points = detector.detect(&resized).points;
            debug!(scale, width = resized.width, height = resized.height, points = points.len(), "matching keyframe");
            Keyframe::new(resized.width, resized.height, scale, points, &config.index)
        })
        .collect();

    let tracking: Vec<TrackingKeyframe> = image_list::tracking_scales(image.width, image.height)
        .into_par_iter()
        .map(|scale| {
            let resized = image.resize(scale);
            let points = extract::extract(&resized);
            debug!(scale, points = points.len(), "tracking keyframe");
            TrackingKeyframe {
                width: resized.width,
                height: resized.height,
                scale,
                pixels: resized.to_luma8(),
                points,
            }
        })
        .collect();

    Target {
        width: image.width,
        height: image.height,
        keyframes,
        tracking,
    }
}

/// Compile several targets in parallel, preserving order.
pub fn compile_targets(images: &[GreyImage], config: &CompileConfig) -> Vec<Target> {
    images
        .par_iter()
        .enumerate()
        .map(|(i, image)| {
            let target = compile_target_with(image, config);
            info!(
                target = i,
                width = target.width,
                height = target.height,
                keyframes = target.keyframes.len(),
                tracking_points = target.tracking.first().map_or(0, |t| t.points.len()),
                "compiled target"
            );
            target
        })
        .collect()
}
