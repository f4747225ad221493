//! Detection on a square power-of-two crop of the camera frame.
//!
//! Live frames are only searched inside a `crop_size` square. [`CropDetector::detect`]
//! uses the centred crop; [`CropDetector::detect_moving`] steps through a 3x3
//! grid of crop positions around the centre, one per call, so that
//! consecutive frames cover different parts of the view.

use crate::image::GreyImage;

use super::{Detection, Detector, DetectorConfig};

/// Crop positions visited by `detect_moving`; the centre comes first.
const NUM_POSITIONS: usize = 9;
const FIRST_POSITION: usize = 4;

#[derive(Debug)]
pub struct CropDetector {
    detector: Detector,
    frame_width: usize,
    frame_height: usize,
    crop_size: usize,
    next_position: usize,
}

impl CropDetector {
    pub fn new(frame_width: usize, frame_height: usize, config: DetectorConfig, debug: bool) -> Self {
        Self {
            detector: Detector::new(config).with_debug(debug),
            frame_width,
            frame_height,
            crop_size: crop_size_for(frame_width, frame_height),
            next_position: FIRST_POSITION,
        }
    }

    pub fn crop_size(&self) -> usize {
        self.crop_size
    }

    /// Detect on the centred crop.
    pub fn detect(&mut self, frame: &GreyImage) -> Detection {
        let x0 = (self.frame_width.saturating_sub(self.crop_size)) / 2;
        let y0 = (self.frame_height.saturating_sub(self.crop_size)) / 2;
        self.detect_at(frame, x0, y0)
    }

    /// Detect on the next crop position of the 3x3 cycle.
    pub fn detect_moving(&mut self, frame: &GreyImage) -> Detection {
        let (x0, y0) = self.position_origin(self.next_position);
        self.next_position = (self.next_position + 1) % NUM_POSITIONS;
        self.detect_at(frame, x0, y0)
    }

    /// Frame origin of crop position `index` (`0..9`, row-major around the centre).
    pub fn position_origin(&self, index: usize) -> (usize, usize) {
        let c = self.crop_size as i64;
        let dx = (index % 3) as i64;
        let dy = (index / 3) as i64;
        let x = self.frame_width as i64 / 2 - c + dx * c / 2;
        let y = self.frame_height as i64 / 2 - c + dy * c / 2;
        let max_x = (self.frame_width as i64 - c).max(0);
        let max_y = (self.frame_height as i64 - c).max(0);
        (x.clamp(0, max_x) as usize, y.clamp(0, max_y) as usize)
    }

    fn detect_at(&mut self, frame: &GreyImage, x0: usize, y0: usize) -> Detection {
        let size = self.crop_size.min(frame.width - x0).min(frame.height - y0);
        let crop = frame.crop(x0, y0, size, size);
        let mut detection = self.detector.detect(&crop);
        for p in &mut detection.points {
            p.x += x0 as f64;
            p.y += y0 as f64;
        }
        if let Some(debug) = detection.debug.as_mut() {
            debug.crop_origin = Some((x0, y0));
        }
        detection
    }
}

/// `2^round(log2(min(w, h) / 2))`.
pub fn crop_size_for(width: usize, height: usize) -> usize {
    let half_min = width.min(height) as f64 / 2.0;
    if half_min < 1.0 {
        return width.min(height);
    }
    2f64.powi(half_min.log2().round() as i32) as usize
}
