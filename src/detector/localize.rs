//! Sub-pixel and sub-octave refinement of DoG extrema.

use nalgebra::{Matrix3, Vector3};

use super::extrema::{DogStack, Extremum};
use super::pyramid::Pyramid;

/// Fits whose Hessian determinant falls below this are rejected.
const MIN_HESSIAN_DET: f64 = 1e-4;

/// Offsets are clamped to this many pixels (or octaves).
const MAX_OFFSET: f64 = 1.0;

/// A refined extremum, still in octave coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Localized {
    pub octave: usize,
    pub x: f64,
    pub y: f64,
    /// Scale relative to the octave, `2^offset`.
    pub relative_scale: f64,
    pub score: f64,
    pub maxima: bool,
}

/// Quadratic Taylor fit around an extremum using the 3x3 Hessian over
/// `(x, y, octave)`. Returns `None` for near-singular fits.
pub fn localize(pyramid: &Pyramid, e: &Extremum) -> Option<Localized> {
    let stack = DogStack::new(pyramid, e.octave);
    let img = stack.current;
    let (x, y) = (e.x, e.y);
    let (fx, fy) = (x as f64, y as f64);

    let own = |dx: i64, dy: i64| img.get((x as i64 + dx) as usize, (y as i64 + dy) as usize) as f64;
    let fine = |dx: f64, dy: f64| stack.finer_at(fx + dx, fy + dy) as f64;
    let coarse = |dx: f64, dy: f64| stack.coarser_at(fx + dx, fy + dy) as f64;

    let c = own(0, 0);

    // Step 1: gradient
    let gx = 0.5 * (own(1, 0) - own(-1, 0));
    let gy = 0.5 * (own(0, 1) - own(0, -1));
    let gs = 0.5 * (coarse(0.0, 0.0) - fine(0.0, 0.0));

    // Step 2: Hessian
    let dxx = own(1, 0) + own(-1, 0) - 2.0 * c;
    let dyy = own(0, 1) + own(0, -1) - 2.0 * c;
    let dss = coarse(0.0, 0.0) + fine(0.0, 0.0) - 2.0 * c;
    let dxy = 0.25 * (own(1, 1) + own(-1, -1) - own(1, -1) - own(-1, 1));
    let dxs = 0.25 * ((coarse(1.0, 0.0) - coarse(-1.0, 0.0)) - (fine(1.0, 0.0) - fine(-1.0, 0.0)));
    let dys = 0.25 * ((coarse(0.0, 1.0) - coarse(0.0, -1.0)) - (fine(0.0, 1.0) - fine(0.0, -1.0)));

    let hessian = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
    if hessian.determinant().abs() < MIN_HESSIAN_DET {
        return None;
    }
    let gradient = Vector3::new(gx, gy, gs);
    let offset = -(hessian.try_inverse()? * gradient);
    let u = offset.map(|v| v.clamp(-MAX_OFFSET, MAX_OFFSET));

    Some(Localized {
        octave: e.octave,
        x: fx + u.x,
        y: fy + u.y,
        relative_scale: 2f64.powf(u.z),
        score: c + 0.5 * gradient.dot(&u),
        maxima: e.maxima,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::pyramid::Octave;
    use crate::image::GreyImage;
    use approx::assert_relative_eq;

    fn octave(dog: GreyImage) -> Octave {
        Octave {
            base: dog.clone(),
            blurred: dog.clone(),
            dog,
        }
    }

    /// Middle DoG level holding a paraboloid with its peak at `(cx, cy)`.
    fn paraboloid_pyramid(cx: f64, cy: f64) -> Pyramid {
        let mut mid = GreyImage::filled(16, 16, 0.0);
        for y in 0..16 {
            for x in 0..16 {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                mid.set(x, y, (40.0 - 2.0 * d2) as f32);
            }
        }
        Pyramid {
            octaves: vec![
                octave(GreyImage::filled(32, 32, 10.0)),
                octave(mid),
                octave(GreyImage::filled(8, 8, 10.0)),
            ],
        }
    }

    #[test]
    fn test_recovers_subpixel_peak() {
        let pyramid = paraboloid_pyramid(8.3, 7.8);
        let e = Extremum {
            octave: 1,
            x: 8,
            y: 8,
            score: 0.0,
            maxima: true,
        };
        let loc = localize(&pyramid, &e).unwrap();
        assert_relative_eq!(loc.x, 8.3, epsilon = 1e-3);
        assert_relative_eq!(loc.y, 7.8, epsilon = 1e-3);
        assert!(loc.relative_scale > 0.5 && loc.relative_scale < 2.0);
    }

    #[test]
    fn test_flat_neighbourhood_rejected() {
        let flat = || octave(GreyImage::filled(16, 16, 5.0));
        let pyramid = Pyramid {
            octaves: vec![octave(GreyImage::filled(32, 32, 5.0)), flat(), octave(GreyImage::filled(8, 8, 5.0))],
        };
        let e = Extremum {
            octave: 1,
            x: 8,
            y: 8,
            score: 5.0,
            maxima: true,
        };
        assert!(localize(&pyramid, &e).is_none());
    }
}
