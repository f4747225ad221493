//! Per-target tracking state machine.
//!
//! ```text
//! Idle ──offered──▶ Acquiring ──match──▶ Warming ──N > warmup──▶ Showing
//!  ▲                    │                  │                      │  ▲
//!  │                    │ no match         │ miss                 │  │ hit
//!  │◀───────────────────┘                  │                      ▼  │
//!  │◀──────────────────────────────────────┘                    Missing
//!  │◀─────────────────────M > miss tolerance──────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::ModelViewTransform;

use super::motion_filter::OneEuroFilter;

/// Observable phase of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotPhase {
    #[default]
    Idle,
    /// Offered to detection, waiting for the matcher.
    Acquiring,
    /// Tracked, not yet shown.
    Warming,
    Showing,
    /// Shown, but lost for fewer than `miss_tolerance` frames.
    Missing,
}

/// Warmup and miss tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hysteresis {
    pub warmup_tolerance: usize,
    pub miss_tolerance: usize,
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self {
            warmup_tolerance: 5,
            miss_tolerance: 5,
        }
    }
}

/// What a slot reports to the consumer after a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotOutput {
    /// Smoothed pose of a shown target.
    Pose(ModelViewTransform),
    /// The target has just been hidden.
    Lost,
}

/// Tracking state of one target.
#[derive(Debug, Clone)]
pub struct TrackingSlot {
    pub is_tracking: bool,
    pub is_showing: bool,
    acquiring: bool,
    pose: Option<ModelViewTransform>,
    pub track_count: usize,
    pub miss_count: usize,
    filter: OneEuroFilter,
    /// Bumped whenever the tracked pose is replaced or dropped. Worker
    /// responses carrying an older epoch are stale.
    epoch: u64,
}

impl TrackingSlot {
    pub fn new(filter: OneEuroFilter) -> Self {
        Self {
            is_tracking: false,
            is_showing: false,
            acquiring: false,
            pose: None,
            track_count: 0,
            miss_count: 0,
            filter,
            epoch: 0,
        }
    }

    pub fn phase(&self) -> SlotPhase {
        match (self.is_tracking, self.is_showing) {
            (false, false) if self.acquiring => SlotPhase::Acquiring,
            (false, false) => SlotPhase::Idle,
            (true, false) => SlotPhase::Warming,
            (true, true) => SlotPhase::Showing,
            (false, true) => SlotPhase::Missing,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Last tracked (unfiltered) pose.
    pub fn pose(&self) -> Option<&ModelViewTransform> {
        self.pose.as_ref()
    }

    /// The slot has been offered to detection this frame.
    pub fn begin_acquire(&mut self) {
        self.acquiring = true;
    }

    /// Detection finished; `pose` is the estimated pose on success.
    pub fn finish_acquire(&mut self, pose: Option<ModelViewTransform>) {
        self.acquiring = false;
        if let Some(pose) = pose {
            self.is_tracking = true;
            self.pose = Some(pose);
            self.epoch += 1;
        }
    }

    /// Result of this frame's tracking update for a tracking slot.
    pub fn record_track(&mut self, pose: Option<ModelViewTransform>) {
        match pose {
            Some(pose) => self.pose = Some(pose),
            None => {
                self.is_tracking = false;
                self.epoch += 1;
            }
        }
    }

    /// Apply the warmup/miss hysteresis at the end of a frame.
    ///
    /// `timestamp_ms` drives the output filter.
    pub fn advance(&mut self, hysteresis: &Hysteresis, timestamp_ms: f64) -> Option<SlotOutput> {
        // Step 1: warming
        if !self.is_showing {
            if self.is_tracking {
                self.miss_count = 0;
                self.track_count += 1;
                if self.track_count > hysteresis.warmup_tolerance {
                    self.is_showing = true;
                    self.filter.reset();
                }
            } else {
                self.track_count = 0;
            }
        }

        // Step 2: missing
        if self.is_showing {
            if self.is_tracking {
                self.miss_count = 0;
            } else {
                self.track_count = 0;
                self.miss_count += 1;
                if self.miss_count > hysteresis.miss_tolerance {
                    self.is_showing = false;
                    self.miss_count = 0;
                    self.pose = None;
                    return Some(SlotOutput::Lost);
                }
            }
        }

        // Step 3: smoothed output
        if self.is_showing {
            let pose = self.pose?;
            let filtered = self.filter.filter(timestamp_ms, &pose.to_array());
            return Some(SlotOutput::Pose(ModelViewTransform::from_array(&filtered)));
        }
        None
    }
}
