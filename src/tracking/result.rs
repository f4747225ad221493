//! Events delivered to the session consumer.
//!
//! Per processed frame the consumer receives:
//! - zero or more `PoseUpdated` events, one per shown or just-lost target
//! - exactly one `FrameDone`, carrying diagnostics in debug mode

use crate::debug::DebugSnapshot;
use crate::geometry::ModelViewTransform;

/// Output of the tracking loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// Smoothed pose of a shown target, or `None` once when it is lost.
    PoseUpdated {
        target_index: usize,
        pose: Option<ModelViewTransform>,
    },
    FrameDone {
        debug: Option<Box<DebugSnapshot>>,
    },
}

impl TrackingEvent {
    pub fn is_frame_done(&self) -> bool {
        matches!(self, Self::FrameDone { .. })
    }
}
