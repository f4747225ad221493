//! Tracking session controller: the per-frame orchestration.
//!
//! Each frame:
//! 1. If fewer than `max_track` slots are tracking, run the crop detector and
//!    ask the worker to match the non-tracking slots
//! 2. For every tracking slot, run the frame tracker from its last pose and
//!    ask the worker to refine
//! 3. Apply warmup/miss hysteresis, emit smoothed poses and `FrameDone`
//!
//! Worker responses are checked against the request id and the slot epoch;
//! anything stale is dropped.

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::debug::DebugSnapshot;
use crate::detector::{CropDetector, Detection, FeaturePoint};
use crate::geometry::{CameraModel, ModelViewTransform};
use crate::image::GreyImage;
use crate::matching::Correspondence;
use crate::target::Target;
use crate::tracking::motion_filter::OneEuroFilter;
use crate::tracking::result::TrackingEvent;
use crate::tracking::state::{Hysteresis, SlotOutput, TrackingSlot};
use crate::tracking::tracker::{FrameTracker, TrackResult};

use super::messages::{MatchOutcome, RequestTag, WorkerRequest, WorkerResponse, WorkerSetup};
use super::shared_state::{SessionStatus, SlotStatus};
use super::worker::PoseBackend;

/// Minimum correspondences worth sending to refinement.
const MIN_TRACK_POINTS: usize = 4;

pub struct Controller {
    camera: CameraModel,
    width: usize,
    height: usize,
    max_track: usize,
    hysteresis: Hysteresis,
    debug: bool,
    interested_target: Option<usize>,
    detector: CropDetector,
    tracker: FrameTracker,
    slots: Vec<TrackingSlot>,
    backend: Box<dyn PoseBackend>,
    next_request_id: u64,
    frame_index: u64,
}

impl Controller {
    /// Build the controller for `width` x `height` frames and hand the
    /// matching data to `backend`.
    pub fn new(
        config: &SessionConfig,
        width: usize,
        height: usize,
        targets: &[Target],
        mut backend: Box<dyn PoseBackend>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("invalid frame size {width}x{height}");
        }
        config.validate()?;
        let camera = CameraModel::with_fovy(width, height, config.fovy_deg);

        backend.setup(WorkerSetup {
            camera,
            query_width: width,
            query_height: height,
            targets: targets.iter().map(|t| t.keyframes.clone()).collect(),
            matcher: config.matcher,
            refine: config.refine.clone(),
            debug: config.debug,
        })?;

        let slots = targets
            .iter()
            .map(|_| TrackingSlot::new(OneEuroFilter::new(config.filter_min_cutoff, config.filter_beta)))
            .collect();

        info!(width, height, targets = targets.len(), fx = camera.fx, "controller ready");
        Ok(Self {
            camera,
            width,
            height,
            max_track: config.max_track,
            hysteresis: config.hysteresis(),
            debug: config.debug,
            interested_target: config.interested_target,
            detector: CropDetector::new(width, height, config.detector.clone(), config.debug),
            tracker: FrameTracker::new(camera, targets, config.tracker),
            slots,
            backend,
            next_request_id: 0,
            frame_index: 0,
        })
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn num_targets(&self) -> usize {
        self.slots.len()
    }

    pub fn set_interested_target(&mut self, target: Option<usize>) {
        self.interested_target = target;
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            frames_processed: self.frame_index,
            slots: self
                .slots
                .iter()
                .enumerate()
                .map(|(target_index, s)| SlotStatus {
                    target_index,
                    phase: s.phase(),
                    track_count: s.track_count,
                    miss_count: s.miss_count,
                })
                .collect(),
        }
    }

    /// Run detector and tracker once so that every kernel plan exists before
    /// the first live frame.
    pub fn warm_up(&mut self, frame: &GreyImage) -> Result<()> {
        self.check_frame(frame)?;
        self.detector.detect(frame);
        let pose = ModelViewTransform::from_parts(
            &nalgebra::Matrix3::identity(),
            &nalgebra::Vector3::new(0.0, 0.0, self.camera.fx),
        );
        for i in 0..self.slots.len() {
            self.tracker.track(frame, &pose, i);
        }
        debug!(plans = self.tracker.cached_plans(), "warm-up done");
        Ok(())
    }

    /// Process one frame and return the events it produced.
    pub fn process_frame(&mut self, frame: &GreyImage, timestamp_ms: f64) -> Result<Vec<TrackingEvent>> {
        self.check_frame(frame)?;
        let mut snapshot = self.debug.then(|| DebugSnapshot {
            frame_index: self.frame_index,
            ..Default::default()
        });

        // Step 1: acquisition
        let tracking = self.slots.iter().filter(|s| s.is_tracking).count();
        if tracking < self.max_track {
            let candidates: Vec<usize> = (0..self.slots.len())
                .filter(|&i| !self.slots[i].is_tracking)
                .filter(|&i| self.interested_target.map_or(true, |t| t == i))
                .collect();
            if !candidates.is_empty() {
                self.acquire(frame, &candidates, snapshot.as_mut())?;
            }
        }

        // Step 2: tracking update
        let mut stale = vec![false; self.slots.len()];
        for i in 0..self.slots.len() {
            if !self.slots[i].is_tracking {
                continue;
            }
            let Some(&prior) = self.slots[i].pose() else {
                continue;
            };
            let result = self.tracker.track(frame, &prior, i);
            if let Some(s) = snapshot.as_mut() {
                s.trackers.push(result.debug.clone());
            }
            let refined = if result.correspondences.len() < MIN_TRACK_POINTS {
                Some(None)
            } else {
                self.request_refine(i, prior, result.correspondences)?
            };
            match refined {
                Some(pose) => self.slots[i].record_track(pose),
                None => {
                    debug!(target = i, "refine response dropped");
                    stale[i] = true;
                }
            }
        }

        // Step 3: hysteresis and output. A slot whose response was dropped
        // keeps its counters for this frame.
        let mut events = Vec::new();
        for (target_index, slot) in self.slots.iter_mut().enumerate() {
            if stale[target_index] {
                continue;
            }
            let before = slot.phase();
            match slot.advance(&self.hysteresis, timestamp_ms) {
                Some(SlotOutput::Pose(pose)) => events.push(TrackingEvent::PoseUpdated {
                    target_index,
                    pose: Some(pose),
                }),
                Some(SlotOutput::Lost) => events.push(TrackingEvent::PoseUpdated {
                    target_index,
                    pose: None,
                }),
                None => {}
            }
            let after = slot.phase();
            if before != after {
                info!(target = target_index, ?before, ?after, "slot transition");
            }
        }
        events.push(TrackingEvent::FrameDone {
            debug: snapshot.map(Box::new),
        });
        self.frame_index += 1;
        Ok(events)
    }

    /// Detect on a crop of `frame`. One-shot helper.
    pub fn detect(&mut self, frame: &GreyImage) -> Result<Detection> {
        self.check_frame(frame)?;
        Ok(self.detector.detect(frame))
    }

    /// Match `points` against `candidates`. One-shot helper.
    pub fn match_points(&mut self, points: Vec<FeaturePoint>, candidates: Vec<usize>) -> Result<Option<MatchOutcome>> {
        Ok(self.request_match(points, candidates)?.0)
    }

    /// Frame-tracker correspondences for `target_index` from `pose`. One-shot helper.
    pub fn track(&mut self, frame: &GreyImage, pose: &ModelViewTransform, target_index: usize) -> Result<TrackResult> {
        self.check_frame(frame)?;
        Ok(self.tracker.track(frame, pose, target_index))
    }

    /// Refine `pose` from tracked correspondences. One-shot helper.
    pub fn track_update(&mut self, pose: &ModelViewTransform, result: &TrackResult) -> Result<Option<ModelViewTransform>> {
        if result.correspondences.len() < MIN_TRACK_POINTS {
            return Ok(None);
        }
        let tag = self.next_tag(None, 0);
        match self.backend.request(WorkerRequest::RefinePose {
            tag,
            prior: *pose,
            correspondences: result.correspondences.clone(),
        })? {
            Some(WorkerResponse::Refined { pose, .. }) => Ok(pose),
            _ => Ok(None),
        }
    }

    fn check_frame(&self, frame: &GreyImage) -> Result<()> {
        if (frame.width, frame.height) != (self.width, self.height) {
            bail!(
                "frame is {}x{}, controller expects {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            );
        }
        Ok(())
    }

    fn next_tag(&mut self, target: Option<usize>, epoch: u64) -> RequestTag {
        self.next_request_id += 1;
        RequestTag {
            id: self.next_request_id,
            target,
            epoch,
        }
    }

    fn acquire(&mut self, frame: &GreyImage, candidates: &[usize], snapshot: Option<&mut DebugSnapshot>) -> Result<()> {
        for &i in candidates {
            self.slots[i].begin_acquire();
        }
        let detection = self.detector.detect_moving(frame);
        let (outcome, match_debug) = self.request_match(detection.points, candidates.to_vec())?;
        if let Some(s) = snapshot {
            s.detector = detection.debug;
            s.matches = match_debug;
        }

        let outcome = outcome.filter(|o| {
            let relevant = candidates.contains(&o.target_index) && !self.slots[o.target_index].is_tracking;
            if !relevant {
                debug!(target = o.target_index, "dropping stale match");
            }
            relevant
        });
        for &i in candidates {
            let pose = outcome.as_ref().filter(|o| o.target_index == i).map(|o| o.pose);
            if pose.is_some() {
                info!(target = i, "target acquired");
            }
            self.slots[i].finish_acquire(pose);
        }
        Ok(())
    }

    fn request_match(
        &mut self,
        points: Vec<FeaturePoint>,
        candidates: Vec<usize>,
    ) -> Result<(Option<MatchOutcome>, Vec<crate::debug::MatchDebug>)> {
        let tag = self.next_tag(None, 0);
        match self.backend.request(WorkerRequest::Match { tag, points, candidates })? {
            Some(WorkerResponse::Matched { tag: got, result, debug }) if got == tag => Ok((result, debug)),
            _ => Ok((None, Vec::new())),
        }
    }

    /// `Some(pose)` for a current response, `None` when it was stale or lost.
    fn request_refine(
        &mut self,
        target: usize,
        prior: ModelViewTransform,
        correspondences: Vec<Correspondence>,
    ) -> Result<Option<Option<ModelViewTransform>>> {
        let epoch = self.slots[target].epoch();
        let tag = self.next_tag(Some(target), epoch);
        let response = self.backend.request(WorkerRequest::RefinePose {
            tag,
            prior,
            correspondences,
        })?;
        match response {
            Some(WorkerResponse::Refined { tag: got, pose })
                if got.target == Some(target) && got.epoch == self.slots[target].epoch() =>
            {
                Ok(Some(pose))
            }
            // A lost response counts as a failed refinement.
            None => Ok(Some(None)),
            Some(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_target;
    use crate::system::worker::InlineBackend;
    use crate::test_support::{textured_image, warp_with_pose};
    use crate::tracking::state::SlotPhase;
    use nalgebra::{Matrix3, Vector3};

    fn fixture(config: &SessionConfig) -> (Controller, GreyImage, ModelViewTransform) {
        let image = textured_image(256, 256, 41);
        let target = compile_target(&image);
        let cam = CameraModel::with_fovy(640, 480, config.fovy_deg);
        let truth = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(-128.0, -128.0, cam.fx));
        let frame = warp_with_pose(&image, &cam, &truth, 640, 480, 0.0);
        let controller = Controller::new(config, 640, 480, &[target], Box::new(InlineBackend::new())).unwrap();
        (controller, frame, truth)
    }

    #[test]
    fn test_detect_then_match_recovers_pose() {
        let config = SessionConfig::default();
        let (mut controller, frame, truth) = fixture(&config);
        let detection = controller.detect(&frame).unwrap();
        assert!(!detection.points.is_empty());
        let outcome = controller.match_points(detection.points, vec![0]).unwrap().unwrap();
        assert_eq!(outcome.target_index, 0);
        let cam = *controller.camera();
        for (x, y) in [(0.0, 0.0), (256.0, 0.0), (256.0, 256.0), (0.0, 256.0)] {
            let a = outcome.pose.project(&cam, x, y).unwrap();
            let b = truth.project(&cam, x, y).unwrap();
            assert!((a - b).norm() < 4.0, "corner ({x}, {y}) off by {}", (a - b).norm());
        }
    }

    #[test]
    fn test_session_loop_shows_and_loses_target() {
        let config = SessionConfig {
            warmup_tolerance: 2,
            miss_tolerance: 1,
            debug: true,
            ..Default::default()
        };
        let (mut controller, frame, _) = fixture(&config);
        let blank = GreyImage::filled(640, 480, 0.0);

        let mut shown = 0;
        for k in 0..4 {
            let events = controller.process_frame(&frame, k as f64 * 33.0).unwrap();
            assert!(events.last().unwrap().is_frame_done());
            shown += events
                .iter()
                .filter(|e| matches!(e, TrackingEvent::PoseUpdated { pose: Some(_), .. }))
                .count();
        }
        assert!(shown >= 1);

        let mut lost = 0;
        for k in 4..8 {
            let events = controller.process_frame(&blank, k as f64 * 33.0).unwrap();
            lost += events
                .iter()
                .filter(|e| matches!(e, TrackingEvent::PoseUpdated { pose: None, .. }))
                .count();
            match events.last() {
                Some(TrackingEvent::FrameDone { debug: Some(d) }) => assert_eq!(d.frame_index, k),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(lost, 1);
        assert_eq!(controller.status().frames_processed, 8);
        assert_eq!(controller.status().slots[0].phase, SlotPhase::Idle);
    }

    #[test]
    fn test_interested_target_excludes_others() {
        let config = SessionConfig {
            interested_target: Some(5),
            ..Default::default()
        };
        let (mut controller, frame, _) = fixture(&config);
        for k in 0..3 {
            let events = controller.process_frame(&frame, k as f64).unwrap();
            assert_eq!(events.len(), 1);
        }
        assert_eq!(controller.status().slots[0].phase, SlotPhase::Idle);
    }

    /// Answers matches normally but reports refinements under an older epoch.
    struct OldEpochBackend {
        inner: InlineBackend,
    }

    impl PoseBackend for OldEpochBackend {
        fn setup(&mut self, setup: WorkerSetup) -> Result<()> {
            self.inner.setup(setup)
        }

        fn request(&mut self, request: WorkerRequest) -> Result<Option<WorkerResponse>> {
            Ok(match self.inner.request(request)? {
                Some(WorkerResponse::Refined { mut tag, .. }) => {
                    tag.epoch = tag.epoch.wrapping_sub(1);
                    let shifted = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(0.0, 0.0, 1.0e4));
                    Some(WorkerResponse::Refined {
                        tag,
                        pose: Some(shifted),
                    })
                }
                other => other,
            })
        }
    }

    #[test]
    fn test_old_epoch_refinement_is_ignored() {
        let config = SessionConfig {
            warmup_tolerance: 1,
            ..Default::default()
        };
        let image = textured_image(256, 256, 41);
        let target = compile_target(&image);
        let cam = CameraModel::with_fovy(640, 480, config.fovy_deg);
        let truth = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(-128.0, -128.0, cam.fx));
        let frame = warp_with_pose(&image, &cam, &truth, 640, 480, 0.0);
        let backend = Box::new(OldEpochBackend {
            inner: InlineBackend::new(),
        });
        let mut controller = Controller::new(&config, 640, 480, &[target], backend).unwrap();

        let mut k = 0;
        while !controller.slots[0].is_tracking && k < 9 {
            controller.process_frame(&frame, k as f64 * 33.0).unwrap();
            k += 1;
        }
        assert!(controller.slots[0].is_tracking, "target never acquired");
        let acquired = *controller.slots[0].pose().unwrap();
        let epoch = controller.slots[0].epoch();

        for k in k..k + 3 {
            let events = controller.process_frame(&frame, k as f64 * 33.0).unwrap();
            assert_eq!(events.len(), 1, "only FrameDone expected");
        }
        let slot = &controller.slots[0];
        assert_eq!(slot.phase(), SlotPhase::Warming);
        assert_eq!(slot.track_count, 0);
        assert_eq!(slot.epoch(), epoch);
        assert_eq!(slot.pose(), Some(&acquired));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SessionConfig::default();
        config.tracker.search_size = -1;
        let target = compile_target(&textured_image(128, 128, 5));
        assert!(Controller::new(&config, 640, 480, &[target], Box::new(InlineBackend::new())).is_err());
    }

    #[test]
    fn test_wrong_frame_size_is_an_error() {
        let (mut controller, _, _) = fixture(&SessionConfig::default());
        assert!(controller.process_frame(&GreyImage::filled(320, 240, 0.0), 0.0).is_err());
    }
}
