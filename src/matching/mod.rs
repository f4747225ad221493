//! Geometric matching of live features against compiled keyframes.
//!
//! - [`keyframe_match`]: descriptor search, Hough filtering and homography
//!   verification against one keyframe, in two passes
//! - [`hough`]: similarity-transform voting
//! - [`homography`]: DLT and robust hypothesis selection
//! - [`matcher`]: best keyframe of a target, producing 2D-3D correspondences

pub mod homography;
pub mod hough;
pub mod keyframe_match;
pub mod matcher;

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::detector::FeaturePoint;

pub use homography::{matrix_inverse33, HomographyConfig};
pub use keyframe_match::{match_keyframe, KeyframeMatch};
pub use matcher::{DetectionMatch, Matcher, MatcherConfig};

/// A query point paired with a keyframe point of the same polarity.
#[derive(Debug, Clone, Copy)]
pub struct PointMatch<'a> {
    pub query: &'a FeaturePoint,
    pub key: &'a FeaturePoint,
}

/// Screen location paired with a point on the target plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub screen: Point2<f64>,
    pub world: Point3<f64>,
}
