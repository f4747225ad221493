//! Iterative reprojection-error minimization over the six pose parameters.

use nalgebra::{Matrix2x3, Matrix2x6, Matrix3, Matrix3x6, Matrix6, Point2, Point3, Vector2, Vector3, Vector6};

use crate::geometry::so3::skew;
use crate::geometry::{CameraModel, ModelViewTransform};
use crate::matching::Correspondence;

use super::RefineConfig;

/// Outcome of one robustness stage.
struct Stage {
    pose: ModelViewTransform,
    err: f64,
}

/// Refine `prior` against `correspondences`.
///
/// World points are first moved to their centroid to condition the normal
/// equations. Stages run with decreasing inlier probability; the first stage
/// whose final error is below `success_error` is returned.
///
/// `None` with fewer than four correspondences, on a singular system, or
/// when no stage converges.
pub fn refine(
    prior: &ModelViewTransform,
    correspondences: &[Correspondence],
    camera: &CameraModel,
    config: &RefineConfig,
) -> Option<ModelViewTransform> {
    if correspondences.len() < 4 {
        return None;
    }

    let n = correspondences.len() as f64;
    let center = correspondences
        .iter()
        .fold(Vector3::zeros(), |acc, c| acc + c.world.coords)
        / n;
    let world: Vec<Point3<f64>> = correspondences.iter().map(|c| c.world - center).collect();
    let screen: Vec<Point2<f64>> = correspondences.iter().map(|c| c.screen).collect();

    let r = prior.rotation();
    let mut pose = ModelViewTransform::from_parts(&r, &(r * center + prior.translation()));

    for &prob in &config.inlier_probs {
        let stage = icp(&pose, &world, &screen, camera, prob, config)?;
        pose = stage.pose;
        if stage.err < config.success_error {
            let r = pose.rotation();
            return Some(ModelViewTransform::from_parts(&r, &(pose.translation() - r * center)));
        }
    }
    None
}

/// Squared reprojection error of every point, `None` if one falls behind the camera.
fn residuals(
    pose: &ModelViewTransform,
    world: &[Point3<f64>],
    screen: &[Point2<f64>],
    camera: &CameraModel,
) -> Option<(Vec<Vector2<f64>>, Vec<Vector3<f64>>)> {
    let mut du = Vec::with_capacity(world.len());
    let mut xc = Vec::with_capacity(world.len());
    for (w, s) in world.iter().zip(screen) {
        let p = pose.transform(w.x, w.y, w.z);
        let u = camera.project(&p)?;
        du.push(Vector2::new(s.x - u.x, s.y - u.y));
        xc.push(p);
    }
    Some((du, xc))
}

/// Cauchy scale from the squared errors at the given inlier quantile.
fn robust_scale(errors: &[f64], prob: f64, config: &RefineConfig) -> f64 {
    let mut sorted = errors.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = ((errors.len() as f64 * prob).floor() as usize).saturating_sub(1).max(3);
    let k = k.min(sorted.len() - 1);
    (sorted[k] * config.k2_factor).max(config.k2_min)
}

fn icp(
    initial: &ModelViewTransform,
    world: &[Point3<f64>],
    screen: &[Point2<f64>],
    camera: &CameraModel,
    prob: f64,
    config: &RefineConfig,
) -> Option<Stage> {
    let n = world.len() as f64;
    let robust = prob < 1.0;
    let mut pose = *initial;
    let mut prev_err = f64::INFINITY;
    let mut err = f64::INFINITY;

    for iter in 0..=config.max_iterations {
        let (du, xc) = residuals(&pose, world, screen, camera)?;
        let e: Vec<f64> = du.iter().map(|d| d.norm_squared()).collect();

        // Step 1: error and per-point weights
        let (weights, cur_err) = if robust {
            let k2 = robust_scale(&e, prob, config);
            let w: Vec<f64> = e.iter().map(|&ei| 1.0 / (1.0 + ei / k2)).collect();
            let err = e.iter().map(|&ei| k2 * (ei / k2).ln_1p()).sum::<f64>() / n;
            (w, err)
        } else {
            (vec![1.0; e.len()], e.iter().sum::<f64>() / n)
        };
        err = cur_err;

        if err < config.break_error {
            break;
        }
        if iter > 0 && err / prev_err > config.break_ratio {
            break;
        }
        if iter == config.max_iterations {
            break;
        }
        prev_err = err;

        // Step 2: weighted normal equations
        let r = pose.rotation();
        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();
        for i in 0..world.len() {
            let j = jacobian(&r, &world[i].coords, &xc[i], camera);
            let w = weights[i];
            jtj += j.transpose() * j * w;
            jtr += j.transpose() * du[i] * w;
        }

        // Step 3: solve and apply
        let ds = jtj.cholesky()?.solve(&jtr);
        if ds.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let omega = Vector3::new(ds[0], ds[1], ds[2]);
        let v = Vector3::new(ds[3], ds[4], ds[5]);
        pose = pose.compose_increment(&omega, &v);
    }

    Some(Stage { pose, err })
}

/// d(pixel) / d(ω, v) for the right-multiplied increment `[exp(ω) | v]`.
fn jacobian(r: &Matrix3<f64>, xw: &Vector3<f64>, xc: &Vector3<f64>, camera: &CameraModel) -> Matrix2x6<f64> {
    let z = xc.z;
    let z2 = z * z;
    let j_u_xc = Matrix2x3::new(
        camera.fx / z,
        0.0,
        -camera.fx * xc.x / z2,
        0.0,
        camera.fy / z,
        -camera.fy * xc.y / z2,
    );

    let mut j_xc_s = Matrix3x6::<f64>::zeros();
    j_xc_s.fixed_view_mut::<3, 3>(0, 0).copy_from(&(r * -skew(xw)));
    j_xc_s.fixed_view_mut::<3, 3>(0, 3).copy_from(r);

    j_u_xc * j_xc_s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::so3::exp_so3;
    use approx::assert_relative_eq;

    fn scene(pose: &ModelViewTransform, camera: &CameraModel) -> Vec<Correspondence> {
        let mut out = Vec::new();
        for j in 0..6 {
            for i in 0..6 {
                let (x, y) = (i as f64 * 40.0 + 10.0, j as f64 * 35.0 + 5.0);
                let s = pose.project(camera, x, y).unwrap();
                out.push(Correspondence {
                    screen: s,
                    world: Point3::new(x, y, 0.0),
                });
            }
        }
        out
    }

    fn truth() -> ModelViewTransform {
        ModelViewTransform::from_parts(&exp_so3(&Vector3::new(0.15, -0.1, 0.05)), &Vector3::new(-100.0, -90.0, 650.0))
    }

    #[test]
    fn test_converges_from_perturbed_prior() {
        let cam = CameraModel::from_resolution(640, 480);
        let truth = truth();
        let prior = ModelViewTransform::from_parts(
            &(truth.rotation() * exp_so3(&Vector3::new(0.02, -0.03, 0.04))),
            &(truth.translation() + Vector3::new(6.0, -5.0, 15.0)),
        );
        let refined = refine(&prior, &scene(&truth, &cam), &cam, &RefineConfig::default()).unwrap();
        for c in scene(&truth, &cam) {
            let p = refined.project(&cam, c.world.x, c.world.y).unwrap();
            assert!((p - c.screen).norm() < 0.5);
        }
    }

    #[test]
    fn test_exact_prior_is_kept() {
        let cam = CameraModel::from_resolution(640, 480);
        let truth = truth();
        let refined = refine(&truth, &scene(&truth, &cam), &cam, &RefineConfig::default()).unwrap();
        assert_relative_eq!(refined.0, truth.0, epsilon = 1e-6);
    }

    #[test]
    fn test_outliers_are_downweighted() {
        let cam = CameraModel::from_resolution(640, 480);
        let truth = truth();
        let mut pts = scene(&truth, &cam);
        for c in pts.iter_mut().step_by(18) {
            c.screen.x += 12.0;
            c.screen.y -= 9.0;
        }
        let prior = ModelViewTransform::from_parts(&truth.rotation(), &(truth.translation() + Vector3::new(3.0, 3.0, 0.0)));
        let refined = refine(&prior, &pts, &cam, &RefineConfig::default()).unwrap();
        let c = &scene(&truth, &cam)[7];
        let p = refined.project(&cam, c.world.x, c.world.y).unwrap();
        assert!((p - c.screen).norm() < 2.0);
    }

    #[test]
    fn test_too_few_correspondences() {
        let cam = CameraModel::from_resolution(640, 480);
        let truth = truth();
        let pts = scene(&truth, &cam);
        assert!(refine(&truth, &pts[..3], &cam, &RefineConfig::default()).is_none());
    }

    #[test]
    fn test_robust_scale_floor() {
        let config = RefineConfig::default();
        assert_relative_eq!(robust_scale(&[0.0; 10], 0.8, &config), 16.0);
        let e: Vec<f64> = (0..10).map(|i| i as f64 * 10.0).collect();
        // floor(10 * 0.8) - 1 = 7
        assert_relative_eq!(robust_scale(&e, 0.8, &config), 280.0);
    }
}
