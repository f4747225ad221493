//! Messages between the tracking loop and the pose worker.
//!
//! Every payload is owned plain data. Each request carries a [`RequestTag`];
//! the response echoes it so the loop can discard anything stale.

use crate::debug::MatchDebug;
use crate::detector::FeaturePoint;
use crate::estimation::RefineConfig;
use crate::geometry::{CameraModel, ModelViewTransform};
use crate::matching::{Correspondence, MatcherConfig};
use crate::target::Keyframe;

/// Identity of a request: a unique id, the slot it concerns and that slot's
/// epoch when the request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTag {
    pub id: u64,
    /// `None` for detection requests covering several slots.
    pub target: Option<usize>,
    pub epoch: u64,
}

/// One-shot worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerSetup {
    pub camera: CameraModel,
    pub query_width: usize,
    pub query_height: usize,
    /// Matching keyframes of every target.
    pub targets: Vec<Vec<Keyframe>>,
    pub matcher: MatcherConfig,
    pub refine: RefineConfig,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub enum WorkerRequest {
    Setup(Box<WorkerSetup>),
    /// Match query features against the candidate targets, in order.
    Match {
        tag: RequestTag,
        points: Vec<FeaturePoint>,
        candidates: Vec<usize>,
    },
    RefinePose {
        tag: RequestTag,
        prior: ModelViewTransform,
        correspondences: Vec<Correspondence>,
    },
    Shutdown,
}

/// A successful detection.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub target_index: usize,
    pub keyframe_index: usize,
    pub pose: ModelViewTransform,
}

#[derive(Debug, Clone)]
pub enum WorkerResponse {
    Matched {
        tag: RequestTag,
        result: Option<MatchOutcome>,
        /// Per-candidate statistics, empty unless debug is on.
        debug: Vec<MatchDebug>,
    },
    Refined {
        tag: RequestTag,
        pose: Option<ModelViewTransform>,
    },
}

impl WorkerResponse {
    pub fn tag(&self) -> &RequestTag {
        match self {
            Self::Matched { tag, .. } | Self::Refined { tag, .. } => tag,
        }
    }
}
