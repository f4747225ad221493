//! Scale ladders used to build keyframes.

/// Smallest side, in pixels, of the coarsest matching keyframe.
pub const MIN_IMAGE_PIXEL_SIZE: f64 = 100.0;

/// Matching keyframe scales, finest first.
///
/// Starts at the scale that brings the shorter side to
/// [`MIN_IMAGE_PIXEL_SIZE`] and grows by 2^(1/3) per step; the first step
/// reaching 0.95 is replaced by full resolution.
pub fn matching_scales(width: usize, height: usize) -> Vec<f64> {
    let min_side = width.min(height).max(1) as f64;
    let step = 2f64.powf(1.0 / 3.0);
    let mut scales = Vec::new();
    let mut c = MIN_IMAGE_PIXEL_SIZE / min_side;
    loop {
        scales.push(c);
        c *= step;
        if c >= 0.95 {
            break;
        }
    }
    scales.push(1.0);
    scales.reverse();
    scales
}

/// Tracking keyframe scales: shorter side at 256 and at 128 pixels.
pub fn tracking_scales(width: usize, height: usize) -> Vec<f64> {
    let min_side = width.min(height).max(1) as f64;
    vec![256.0 / min_side, 128.0 / min_side]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matching_scales_for_square_target() {
        let scales = matching_scales(256, 256);
        assert_eq!(scales.len(), 5);
        assert_relative_eq!(scales[0], 1.0);
        assert_relative_eq!(scales[4], 100.0 / 256.0, epsilon = 1e-12);
        assert!(scales.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_matching_scales_large_image() {
        let scales = matching_scales(1000, 800);
        assert_relative_eq!(*scales.last().unwrap(), 0.125, epsilon = 1e-12);
        assert!(scales[1] < 0.95);
    }

    #[test]
    fn test_tracking_scales() {
        let scales = tracking_scales(512, 1024);
        assert_relative_eq!(scales[0], 0.5);
        assert_relative_eq!(scales[1], 0.25);
    }
}
