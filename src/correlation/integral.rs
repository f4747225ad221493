//! Summed-area tables over pixel values and squared pixel values.

use crate::image::GreyImage;

/// Mean and centred energy of a square window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub sum: f64,
    pub sum_sq: f64,
}

impl WindowStats {
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// `sqrt(sum((p - mean)^2))` over the window.
    pub fn centred_norm(&self) -> f64 {
        let v = self.sum_sq - self.sum * self.sum / self.count as f64;
        v.max(0.0).sqrt()
    }

    /// Standard deviation of the window.
    pub fn std_dev(&self) -> f64 {
        self.centred_norm() / (self.count as f64).sqrt()
    }
}

/// Summed-area table with one extra leading row and column of zeros.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    width: usize,
    height: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl IntegralImage {
    pub fn new(image: &GreyImage) -> Self {
        let (w, h) = (image.width, image.height);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sum_sq = vec![0.0; stride * (h + 1)];

        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = image.get(x, y) as f64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }

        Self {
            width: w,
            height: h,
            sum,
            sum_sq,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Sum over the inclusive rectangle `[x0, x1] x [y0, y1]`.
    #[inline]
    fn rect(table: &[f64], stride: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        table[(y1 + 1) * stride + x1 + 1] - table[y0 * stride + x1 + 1] - table[(y1 + 1) * stride + x0]
            + table[y0 * stride + x0]
    }

    /// Statistics of the `(2r+1)^2` window centred at `(cx, cy)`, or `None`
    /// if it does not fit inside the image.
    pub fn window(&self, cx: i64, cy: i64, radius: usize) -> Option<WindowStats> {
        let r = radius as i64;
        if cx - r < 0 || cy - r < 0 || cx + r >= self.width as i64 || cy + r >= self.height as i64 {
            return None;
        }
        let (x0, y0) = ((cx - r) as usize, (cy - r) as usize);
        let (x1, y1) = ((cx + r) as usize, (cy + r) as usize);
        let stride = self.width + 1;
        let side = 2 * radius + 1;
        Some(WindowStats {
            count: side * side,
            sum: Self::rect(&self.sum, stride, x0, y0, x1, y1),
            sum_sq: Self::rect(&self.sum_sq, stride, x0, y0, x1, y1),
        })
    }
}
