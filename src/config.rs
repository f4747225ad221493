//! Session configuration.
//!
//! Every section has tuned defaults; a JSON file only needs the fields it
//! overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::detector::DetectorConfig;
use crate::estimation::RefineConfig;
use crate::geometry::camera::DEFAULT_FOVY_DEG;
use crate::matching::MatcherConfig;
use crate::tracking::state::Hysteresis;
use crate::tracking::TrackerParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub detector: DetectorConfig,
    pub matcher: MatcherConfig,
    pub tracker: TrackerParams,
    pub refine: RefineConfig,
    /// Maximum number of targets tracked at once.
    pub max_track: usize,
    pub warmup_tolerance: usize,
    pub miss_tolerance: usize,
    pub filter_min_cutoff: f64,
    pub filter_beta: f64,
    /// Attach a `DebugSnapshot` to every `FrameDone`.
    pub debug: bool,
    pub worker_timeout_ms: u64,
    /// Restrict acquisition to one target.
    pub interested_target: Option<usize>,
    /// Run matching and pose estimation on the loop thread instead of a worker.
    pub inline_worker: bool,
    pub fovy_deg: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            matcher: MatcherConfig::default(),
            tracker: TrackerParams::default(),
            refine: RefineConfig::default(),
            max_track: 1,
            warmup_tolerance: 5,
            miss_tolerance: 5,
            filter_min_cutoff: 0.001,
            filter_beta: 1000.0,
            debug: false,
            worker_timeout_ms: 2000,
            interested_target: None,
            inline_worker: false,
            fovy_deg: DEFAULT_FOVY_DEG,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        config.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.detector.buckets_per_dimension == 0 {
            bail!("detector.buckets_per_dimension must be at least 1");
        }
        if self.tracker.search_size < 0 {
            bail!("tracker.search_size must not be negative, got {}", self.tracker.search_size);
        }
        if self.tracker.search_gap < 1 {
            bail!("tracker.search_gap must be at least 1, got {}", self.tracker.search_gap);
        }
        if !(self.fovy_deg > 0.0 && self.fovy_deg < 180.0) {
            bail!("fovy_deg must lie in (0, 180), got {}", self.fovy_deg);
        }
        Ok(())
    }

    pub fn hysteresis(&self) -> Hysteresis {
        Hysteresis {
            warmup_tolerance: self.warmup_tolerance,
            miss_tolerance: self.miss_tolerance,
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}
