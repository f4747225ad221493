//! Compiled target data: matching keyframes and tracking keyframes.

use serde::{Deserialize, Serialize};

use crate::detector::FeaturePoint;
use crate::image::GreyImage;
use crate::index::{HierarchicalIndex, IndexParams};

/// One scale level of a target prepared for descriptor matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub width: usize,
    pub height: usize,
    /// Keyframe pixels per target pixel.
    pub scale: f64,
    pub maxima_points: Vec<FeaturePoint>,
    pub minima_points: Vec<FeaturePoint>,
    pub maxima_index: HierarchicalIndex,
    pub minima_index: HierarchicalIndex,
}

impl Keyframe {
    /// Split points by polarity and index each set.
    pub fn new(width: usize, height: usize, scale: f64, points: Vec<FeaturePoint>, params: &IndexParams) -> Self {
        let (maxima_points, minima_points): (Vec<_>, Vec<_>) = points.into_iter().partition(|p| p.maxima);
        let maxima_index = HierarchicalIndex::build(&maxima_points, params);
        let minima_index = HierarchicalIndex::build(&minima_points, params);
        Self {
            width,
            height,
            scale,
            maxima_points,
            minima_points,
            maxima_index,
            minima_index,
        }
    }

    /// Points of the given polarity.
    pub fn points(&self, maxima: bool) -> &[FeaturePoint] {
        if maxima {
            &self.maxima_points
        } else {
            &self.minima_points
        }
    }

    pub fn index(&self, maxima: bool) -> &HierarchicalIndex {
        if maxima {
            &self.maxima_index
        } else {
            &self.minima_index
        }
    }

    pub fn num_points(&self) -> usize {
        self.maxima_points.len() + self.minima_points.len()
    }
}

/// A tracking feature location in tracking-keyframe pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingPoint {
    pub x: f64,
    pub y: f64,
}

/// Low-resolution target image with distinctive template locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingKeyframe {
    pub width: usize,
    pub height: usize,
    /// Keyframe pixels per target pixel.
    pub scale: f64,
    pub pixels: Vec<u8>,
    pub points: Vec<TrackingPoint>,
}

impl TrackingKeyframe {
    pub fn image(&self) -> GreyImage {
        GreyImage {
            width: self.width,
            height: self.height,
            data: self.pixels.iter().map(|&p| p as f32).collect(),
        }
    }
}

/// A compiled target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub width: usize,
    pub height: usize,
    /// Matching keyframes, finest first.
    pub keyframes: Vec<Keyframe>,
    /// Tracking keyframes, finest first.
    pub tracking: Vec<TrackingKeyframe>,
}

impl Target {
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}
