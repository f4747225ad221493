//! Frame-to-frame tracking of an already acquired target.
//!
//! - `extract`: tracking-point selection at compile time
//! - `tracker`: projective template search around the last pose
//! - `state`: per-target warmup/miss hysteresis
//! - `motion_filter`: one-euro smoothing of emitted poses
//! - `result`: events delivered to session callbacks

pub mod extract;
pub mod motion_filter;
pub mod result;
pub mod state;
pub mod tracker;

pub use motion_filter::OneEuroFilter;
pub use result::TrackingEvent;
pub use state::{Hysteresis, SlotPhase, TrackingSlot};
pub use tracker::{FrameTracker, TrackResult, TrackerParams};
