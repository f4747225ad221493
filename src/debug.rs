//! Optional per-frame diagnostics, populated only when debug mode is on.

use serde::Serialize;

/// Feature detector statistics for one detection call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectorDebug {
    /// `(width, height)` of every pyramid octave.
    pub octave_sizes: Vec<(usize, usize)>,
    /// Extrema found per octave before bucket pruning.
    pub extrema_per_octave: Vec<usize>,
    /// Extrema surviving bucket pruning.
    pub pruned: usize,
    /// Points surviving sub-pixel localization.
    pub localized: usize,
    /// Top-left corner of the detection crop in frame coordinates.
    pub crop_origin: Option<(usize, usize)>,
}

/// Matcher statistics for one keyframe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyframeMatchDebug {
    pub keyframe_index: usize,
    pub first_pass_matches: usize,
    pub first_pass_hough: usize,
    pub first_pass_inliers: usize,
    pub second_pass_matches: usize,
    pub second_pass_hough: usize,
    pub second_pass_inliers: usize,
}

/// Matcher statistics for one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchDebug {
    pub target_index: usize,
    pub keyframes: Vec<KeyframeMatchDebug>,
    pub best_keyframe: Option<usize>,
}

/// Frame tracker statistics for one tracked target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerDebug {
    pub target_index: usize,
    pub attempted: usize,
    pub accepted: usize,
    pub mean_similarity: f64,
}

/// Diagnostics attached to a `FrameDone` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugSnapshot {
    pub frame_index: u64,
    pub detector: Option<DetectorDebug>,
    pub matches: Vec<MatchDebug>,
    pub trackers: Vec<TrackerDebug>,
}
