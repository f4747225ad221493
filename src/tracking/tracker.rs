//! Frame tracker: follows an acquired target by template correlation.
//!
//! Per tracked target and frame:
//! 1. Warp the frame into the tracking keyframe's pixel grid through the
//!    prior pose (projection kernel)
//! 2. Around every tracking point, search the warped image for the offset
//!    with the highest NCC against the keyframe template (correlation kernel)
//! 3. Keep points above the similarity threshold as screen/world pairs
//!
//! The result feeds pose refinement; no feature detection is involved.

use nalgebra::{Matrix3x4, Point3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::correlation::{similarity, IntegralImage, TemplateStats};
use crate::debug::TrackerDebug;
use crate::geometry::{project_mvp, CameraModel, ModelViewTransform};
use crate::image::GreyImage;
use crate::kernels::{KernelCache, KernelKey, KernelOp};
use crate::matching::Correspondence;
use crate::target::Target;

/// Frame tracker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Which tracking keyframe of each target is used (0 is the finest).
    pub tracking_keyframe: usize,
    /// Template half-size in keyframe pixels.
    pub template_size: usize,
    /// Search half-size in keyframe pixels.
    pub search_size: i64,
    /// Stride of the search grid.
    pub search_gap: i64,
    pub similarity_threshold: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            tracking_keyframe: 1,
            template_size: 6,
            search_size: 10,
            search_gap: 1,
            similarity_threshold: 0.8,
        }
    }
}

/// Tracked correspondences of one target in one frame.
#[derive(Debug, Clone, Default)]
pub struct TrackResult {
    pub correspondences: Vec<Correspondence>,
    pub debug: TrackerDebug,
}

/// Keyframe pixel-centre coordinates of the projection grid.
#[derive(Debug)]
struct ProjectionPlan {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl ProjectionPlan {
    fn new(width: usize, height: usize) -> Self {
        Self {
            xs: (0..width).map(|i| i as f64 + 0.5).collect(),
            ys: (0..height).map(|j| j as f64 + 0.5).collect(),
        }
    }
}

/// Search offsets visited around each projected point.
#[derive(Debug)]
struct CorrelationPlan {
    offsets: Vec<(i64, i64)>,
}

impl CorrelationPlan {
    fn new(search_size: i64, gap: i64) -> Self {
        let gap = gap.max(1) as usize;
        let mut offsets = Vec::new();
        for dy in (-search_size..=search_size).step_by(gap) {
            for dx in (-search_size..=search_size).step_by(gap) {
                offsets.push((dx, dy));
            }
        }
        Self { offsets }
    }
}

/// Reference data of one target: keyframe image and template statistics.
#[derive(Debug)]
struct TrackingTemplate {
    image: GreyImage,
    scale: f64,
    /// `(x, y, stats)` of every usable tracking point.
    points: Vec<(i64, i64, TemplateStats)>,
}

impl TrackingTemplate {
    fn new(target: &Target, keyframe: usize, template_size: usize) -> Option<Self> {
        let kf = target.tracking.get(keyframe).or_else(|| target.tracking.last())?;
        let image = kf.image();
        let integral = IntegralImage::new(&image);
        let points = kf
            .points
            .iter()
            .filter_map(|p| {
                let (x, y) = (p.x.round() as i64, p.y.round() as i64);
                let stats = TemplateStats::from_integral(&integral, x, y, template_size, 0.0)?;
                Some((x, y, stats))
            })
            .collect();
        Some(Self {
            image,
            scale: kf.scale,
            points,
        })
    }
}

/// Correlation tracker over all loaded targets.
#[derive(Debug)]
pub struct FrameTracker {
    camera: CameraModel,
    params: TrackerParams,
    templates: Vec<Option<TrackingTemplate>>,
    projections: KernelCache<ProjectionPlan>,
    correlations: KernelCache<CorrelationPlan>,
}

impl FrameTracker {
    pub fn new(camera: CameraModel, targets: &[Target], mut params: TrackerParams) -> Self {
        params.search_size = params.search_size.max(0);
        params.search_gap = params.search_gap.max(1);
        let templates = targets
            .iter()
            .map(|t| TrackingTemplate::new(t, params.tracking_keyframe, params.template_size))
            .collect();
        Self {
            camera,
            params,
            templates,
            projections: KernelCache::new(),
            correlations: KernelCache::new(),
        }
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Number of kernel plans synthesized so far.
    pub fn cached_plans(&self) -> usize {
        self.projections.len() + self.correlations.len()
    }

    /// Track `target_index` in `frame` starting from `pose`.
    pub fn track(&mut self, frame: &GreyImage, pose: &ModelViewTransform, target_index: usize) -> TrackResult {
        let mut result = TrackResult {
            debug: TrackerDebug {
                target_index,
                ..Default::default()
            },
            ..Default::default()
        };
        let Some(Some(template)) = self.templates.get(target_index) else {
            return result;
        };

        let (kw, kh) = (template.image.width, template.image.height);
        let mvp = pose.projection(&self.camera);

        // Step 1: projection kernel
        let plan = self
            .projections
            .get_or_build(KernelKey::new(KernelOp::Projection, kw, kh), || ProjectionPlan::new(kw, kh));
        let projected = project_frame(frame, &mvp, plan, template.scale);
        let integral = IntegralImage::new(&projected);

        // Step 2: correlation kernel
        let side = 2 * self.params.search_size as usize + 1;
        let search = self.correlations.get_or_build(KernelKey::new(KernelOp::Correlation, side, side), || {
            CorrelationPlan::new(self.params.search_size, self.params.search_gap)
        });
        let radius = self.params.template_size;
        let best: Vec<Option<(i64, i64, f64)>> = template
            .points
            .par_iter()
            .map(|&(px, py, stats)| {
                let mut best: Option<(i64, i64, f64)> = None;
                for &(dx, dy) in &search.offsets {
                    let (cx, cy) = (px + dx, py + dy);
                    let Some(sim) = similarity(&projected, &integral, cx, cy, &template.image, px, py, radius, &stats)
                    else {
                        continue;
                    };
                    if best.map_or(true, |b| sim > b.2) {
                        best = Some((cx, cy, sim));
                    }
                }
                best
            })
            .collect();

        // Step 3: threshold and map back to the frame
        let mut sim_sum = 0.0;
        for (&(px, py, _), found) in template.points.iter().zip(&best) {
            let Some((bx, by, sim)) = *found else {
                continue;
            };
            if sim <= self.params.similarity_threshold {
                continue;
            }
            let Some(screen) = project_mvp(&mvp, (bx as f64 + 0.5) / template.scale, (by as f64 + 0.5) / template.scale)
            else {
                continue;
            };
            result.correspondences.push(Correspondence {
                screen,
                world: Point3::new((px as f64 + 0.5) / template.scale, (py as f64 + 0.5) / template.scale, 0.0),
            });
            sim_sum += sim;
        }

        result.debug.attempted = template.points.len();
        result.debug.accepted = result.correspondences.len();
        if !result.correspondences.is_empty() {
            result.debug.mean_similarity = sim_sum / result.correspondences.len() as f64;
        }
        result
    }
}

/// Resample `frame` onto the keyframe grid through `mvp`. Samples falling
/// outside the frame are zero.
fn project_frame(frame: &GreyImage, mvp: &Matrix3x4<f64>, plan: &ProjectionPlan, scale: f64) -> GreyImage {
    let (w, h) = (plan.xs.len(), plan.ys.len());
    let mut data = vec![0.0f32; w * h];
    let (fw, fh) = (frame.width as f64, frame.height as f64);
    data.par_chunks_mut(w).enumerate().for_each(|(j, row)| {
        let y = plan.ys[j] / scale;
        for (i, out) in row.iter_mut().enumerate() {
            let Some(p) = project_mvp(mvp, plan.xs[i] / scale, y) else {
                continue;
            };
            if p.x < -0.5 || p.y < -0.5 || p.x > fw - 0.5 || p.y > fh - 0.5 {
                continue;
            }
            *out = frame.sample(p.x, p.y);
        }
    });
    GreyImage {
        width: w,
        height: h,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_target;
    use crate::estimation::{PoseEstimator, RefineConfig};
    use crate::geometry::so3::rot_z;
    use crate::test_support::{textured_image, warp_with_pose};
    use nalgebra::{Matrix3, Vector3};

    fn corner_error(a: &ModelViewTransform, b: &ModelViewTransform, cam: &CameraModel, size: f64) -> f64 {
        let corners = [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)];
        corners
            .iter()
            .map(|&(x, y)| (a.project(cam, x, y).unwrap() - b.project(cam, x, y).unwrap()).norm())
            .sum::<f64>()
            / 4.0
    }

    fn scene() -> (Target, CameraModel, ModelViewTransform, GreyImage) {
        let image = textured_image(256, 256, 31);
        let target = compile_target(&image);
        let cam = CameraModel::from_resolution(640, 480);
        let truth = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(-128.0, -128.0, cam.fx));
        let frame = warp_with_pose(&image, &cam, &truth, 640, 480, 0.0);
        (target, cam, truth, frame)
    }

    #[test]
    fn test_exact_pose_tracks_in_place() {
        let (target, cam, truth, frame) = scene();
        let mut tracker = FrameTracker::new(cam, std::slice::from_ref(&target), TrackerParams::default());
        let result = tracker.track(&frame, &truth, 0);
        assert!(result.correspondences.len() >= 4);
        for c in &result.correspondences {
            let expected = truth.project(&cam, c.world.x, c.world.y).unwrap();
            assert!((c.screen - expected).norm() < 1.5);
        }
        assert!(result.debug.mean_similarity > 0.8);
    }

    #[test]
    fn test_refine_recovers_perturbed_pose() {
        let (target, cam, truth, frame) = scene();
        let prior = ModelViewTransform::from_parts(
            &rot_z(0.03),
            &(truth.translation() + Vector3::new(8.0, -6.0, 0.0)),
        );
        let prior_error = corner_error(&prior, &truth, &cam, 256.0);

        let mut tracker = FrameTracker::new(cam, std::slice::from_ref(&target), TrackerParams::default());
        let estimator = PoseEstimator::new(cam, RefineConfig::default());
        let mut pose = prior;
        for _ in 0..3 {
            let result = tracker.track(&frame, &pose, 0);
            pose = estimator.refine(&pose, &result.correspondences).unwrap();
        }
        let error = corner_error(&pose, &truth, &cam, 256.0);
        assert!(error < 3.0, "corner error {error}");
        assert!(error < prior_error / 2.0);
    }

    #[test]
    fn test_negative_search_size_is_clamped() {
        let (target, cam, truth, frame) = scene();
        let params = TrackerParams {
            search_size: -4,
            search_gap: 0,
            ..Default::default()
        };
        let mut tracker = FrameTracker::new(cam, std::slice::from_ref(&target), params);
        assert_eq!(tracker.params().search_size, 0);
        assert_eq!(tracker.params().search_gap, 1);
        let result = tracker.track(&frame, &truth, 0);
        assert!(!result.correspondences.is_empty());
    }

    #[test]
    fn test_plans_are_cached() {
        let (target, cam, truth, frame) = scene();
        let mut tracker = FrameTracker::new(cam, std::slice::from_ref(&target), TrackerParams::default());
        tracker.track(&frame, &truth, 0);
        assert_eq!(tracker.cached_plans(), 2);
        tracker.track(&frame, &truth, 0);
        assert_eq!(tracker.cached_plans(), 2);
    }

    #[test]
    fn test_unknown_target_yields_nothing() {
        let (target, cam, truth, frame) = scene();
        let mut tracker = FrameTracker::new(cam, std::slice::from_ref(&target), TrackerParams::default());
        assert!(tracker.track(&frame, &truth, 3).correspondences.is_empty());
    }
}
