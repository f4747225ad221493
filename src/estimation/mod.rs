//! Pose estimation from 2D-3D correspondences.
//!
//! - [`estimate`]: initial pose by homography decomposition
//! - [`refine`]: robust iterative refinement from a prior pose

pub mod estimate;
pub mod refine;

use serde::{Deserialize, Serialize};

use crate::geometry::{CameraModel, ModelViewTransform};
use crate::matching::Correspondence;

/// Refinement tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Inlier probability of each robustness stage, tried in order. `1.0`
    /// disables reweighting.
    pub inlier_probs: Vec<f64>,
    pub max_iterations: usize,
    /// Mean squared error (px²) that ends a stage early.
    pub break_error: f64,
    /// Error ratio between iterations above which a stage has stalled.
    pub break_ratio: f64,
    /// Stage error below which the refined pose is accepted.
    pub success_error: f64,
    pub k2_factor: f64,
    pub k2_min: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            inlier_probs: vec![1.0, 0.8, 0.6, 0.4, 0.0],
            max_iterations: 10,
            break_error: 0.1,
            break_ratio: 0.99,
            success_error: 4.0,
            k2_factor: 4.0,
            k2_min: 16.0,
        }
    }
}

/// Estimator bound to one camera.
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    camera: CameraModel,
    config: RefineConfig,
}

impl PoseEstimator {
    pub fn new(camera: CameraModel, config: RefineConfig) -> Self {
        Self { camera, config }
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Initial pose, `None` when the homography is degenerate.
    pub fn estimate(&self, correspondences: &[Correspondence]) -> Option<ModelViewTransform> {
        estimate::estimate(correspondences, &self.camera)
    }

    /// Refined pose, `None` when refinement fails.
    pub fn refine(&self, prior: &ModelViewTransform, correspondences: &[Correspondence]) -> Option<ModelViewTransform> {
        refine::refine(prior, correspondences, &self.camera, &self.config)
    }
}
