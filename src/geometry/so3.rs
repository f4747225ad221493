//! SO(3) helpers for pose updates.

use nalgebra::{Matrix3, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map (Rodrigues' formula).
///
/// ```text
/// exp([ω]×) = I + sin θ [k]× + (1 - cos θ) [k]×²,   θ = |ω|, k = ω / θ
/// ```
///
/// Rotations below the small-angle threshold return the identity.
pub fn exp_so3(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity();
    }
    let k = skew(&(omega / theta));
    Matrix3::identity() + theta.sin() * k + (1.0 - theta.cos()) * k * k
}

/// Rotation about the camera's optical axis.
pub fn rot_z(angle: f64) -> Matrix3<f64> {
    exp_so3(&Vector3::new(0.0, 0.0, angle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        let cross_direct = v.cross(&u);
        let cross_skew = skew(&v) * u;

        assert_relative_eq!(cross_direct, cross_skew, epsilon = 1e-12);
    }

    #[test]
    fn test_skew_antisymmetric() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let skew_v = skew(&v);

        assert_relative_eq!(skew_v, -skew_v.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_exp_identity_at_zero() {
        assert_relative_eq!(exp_so3(&Vector3::zeros()), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_exp_is_rotation() {
        let r = exp_so3(&Vector3::new(0.3, -0.2, 0.5));
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_matches_nalgebra() {
        let omega = Vector3::new(0.1, 0.4, -0.25);
        let expected = nalgebra::Rotation3::from_scaled_axis(omega);
        assert_relative_eq!(exp_so3(&omega), *expected.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_rot_z_quarter_turn() {
        let r = rot_z(std::f64::consts::FRAC_PI_2);
        let x = r * Vector3::x();
        assert_relative_eq!(x, Vector3::y(), epsilon = 1e-12);
    }
}
