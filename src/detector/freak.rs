//! FREAK-style binary descriptor.
//!
//! 37 sample points (six rings of six plus the centre) are read around each
//! feature, rotated by its orientation and scaled by its relative scale. Every
//! pair `(i, j)` with `i < j` contributes one bit: set when sample `i` is
//! brighter than sample `j`.

use crate::image::GreyImage;

use super::descriptor::Descriptor;

/// Pattern spread in octave pixels per unit of relative scale.
pub const EXPANSION_FACTOR: f64 = 7.0;

pub const NUM_POINTS: usize = 37;
pub const NUM_COMPARISONS: usize = NUM_POINTS * (NUM_POINTS - 1) / 2;

/// Unit-radius sample constellation, outermost ring first.
pub const PATTERN: [[f64; 2]; NUM_POINTS] = [
    // ring 5
    [-1.000000, 0.000000],
    [-0.500000, -0.866025],
    [0.500000, -0.866025],
    [1.000000, -0.000000],
    [0.500000, 0.866025],
    [-0.500000, 0.866025],
    // ring 4
    [0.000000, 0.930969],
    [-0.806243, 0.465485],
    [-0.806243, -0.465485],
    [-0.000000, -0.930969],
    [0.806243, -0.465485],
    [0.806243, 0.465485],
    // ring 3
    [0.847306, -0.000000],
    [0.423653, 0.733789],
    [-0.423653, 0.733789],
    [-0.847306, 0.000000],
    [-0.423653, -0.733789],
    [0.423653, -0.733789],
    // ring 2
    [-0.000000, -0.741094],
    [0.641806, -0.370547],
    [0.641806, 0.370547],
    [0.000000, 0.741094],
    [-0.641806, 0.370547],
    [-0.641806, -0.370547],
    // ring 1
    [-0.595502, 0.000000],
    [-0.297751, -0.515720],
    [0.297751, -0.515720],
    [0.595502, -0.000000],
    [0.297751, 0.515720],
    [-0.297751, 0.515720],
    // ring 0
    [0.000000, 0.362783],
    [-0.314179, 0.181391],
    [-0.314179, -0.181391],
    [-0.000000, -0.362783],
    [0.314179, -0.181391],
    [0.314179, 0.181391],
    // centre
    [0.0, 0.0],
];

/// Compute the descriptor of a feature at octave coordinates `(x, y)`.
pub fn compute(image: &GreyImage, x: f64, y: f64, relative_scale: f64, angle: f64) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let radius = EXPANSION_FACTOR * relative_scale;

    let mut samples = [0.0f32; NUM_POINTS];
    for (sample, p) in samples.iter_mut().zip(PATTERN.iter()) {
        let px = radius * p[0];
        let py = radius * p[1];
        let sx = x + cos * px - sin * py;
        let sy = y + sin * px + cos * py;
        *sample = image.sample(sx, sy);
    }

    let mut descriptor = Descriptor::zeros();
    let mut bit = 0;
    for i in 0..NUM_POINTS {
        for j in (i + 1)..NUM_POINTS {
            if samples[i] > samples[j] {
                descriptor.set_bit(bit);
            }
            bit += 1;
        }
    }
    descriptor
}
