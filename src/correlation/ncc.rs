//! Normalized cross-correlation between square windows.

use crate::image::GreyImage;

use super::integral::IntegralImage;

/// Precomputed statistics of a reference template window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateStats {
    pub mean: f64,
    /// `sqrt(sum((t - mean)^2))`.
    pub norm: f64,
}

impl TemplateStats {
    /// Statistics of the window at `(cx, cy)`, rejected when its standard
    /// deviation is below `min_std_dev`.
    pub fn from_integral(
        integral: &IntegralImage,
        cx: i64,
        cy: i64,
        radius: usize,
        min_std_dev: f64,
    ) -> Option<Self> {
        let stats = integral.window(cx, cy, radius)?;
        if stats.std_dev() < min_std_dev {
            return None;
        }
        let norm = stats.centred_norm();
        if norm <= 0.0 {
            return None;
        }
        Some(Self {
            mean: stats.mean(),
            norm,
        })
    }
}

/// NCC between the window of `image` centred at `(cx, cy)` and the template
/// window of `template` centred at `(tx, ty)`.
///
/// Returns `None` when the image window leaves the image or is flat.
#[allow(clippy::too_many_arguments)]
pub fn similarity(
    image: &GreyImage,
    integral: &IntegralImage,
    cx: i64,
    cy: i64,
    template: &GreyImage,
    tx: i64,
    ty: i64,
    radius: usize,
    template_stats: &TemplateStats,
) -> Option<f64> {
    let stats = integral.window(cx, cy, radius)?;
    let norm = stats.centred_norm();
    if norm <= 1e-9 {
        return None;
    }

    let r = radius as i64;
    let mut sxy = 0.0f64;
    for j in -r..=r {
        let iy = (cy + j) as usize;
        let ty2 = (ty + j) as usize;
        let row_a = &image.data[iy * image.width..(iy + 1) * image.width];
        let row_b = &template.data[ty2 * template.width..(ty2 + 1) * template.width];
        for i in -r..=r {
            sxy += row_a[(cx + i) as usize] as f64 * row_b[(tx + i) as usize] as f64;
        }
    }
    sxy -= template_stats.mean * stats.sum;

    Some(sxy / (norm * template_stats.norm))
}
