//! Binomial scale pyramid and difference-of-Gaussian levels.
//!
//! Each octave holds:
//! - `base`: the blurred input (octave 0) or the 2x2 box-downsampled
//!   `blurred` image of the previous octave
//! - `blurred`: `base` filtered once more with the 5-tap binomial kernel
//! - `dog`: `base - blurred`
//!
//! Filtering is separable `[1, 4, 6, 4, 1] / 16` with replicated borders.
//! Rows are processed in parallel.

use rayon::prelude::*;

use crate::image::GreyImage;

/// Octave shapes for a given input size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidPlan {
    pub octave_sizes: Vec<(usize, usize)>,
}

impl PyramidPlan {
    /// Halve the size until either side drops below `min_size` or
    /// `max_octaves` is reached.
    pub fn new(width: usize, height: usize, min_size: usize, max_octaves: usize) -> Self {
        let mut octave_sizes = Vec::new();
        let (mut w, mut h) = (width, height);
        while w >= min_size && h >= min_size && octave_sizes.len() < max_octaves {
            octave_sizes.push((w, h));
            w /= 2;
            h /= 2;
        }
        Self { octave_sizes }
    }

    pub fn num_octaves(&self) -> usize {
        self.octave_sizes.len()
    }
}

/// One pyramid octave.
#[derive(Debug, Clone)]
pub struct Octave {
    pub base: GreyImage,
    pub blurred: GreyImage,
    pub dog: GreyImage,
}

#[derive(Debug, Clone)]
pub struct Pyramid {
    pub octaves: Vec<Octave>,
}

impl Pyramid {
    pub fn build(image: &GreyImage, plan: &PyramidPlan) -> Self {
        let mut octaves: Vec<Octave> = Vec::with_capacity(plan.num_octaves());
        for k in 0..plan.num_octaves() {
            let base = match octaves.last() {
                None => binomial_blur(image),
                Some(prev) => downsample(&prev.blurred),
            };
            let blurred = binomial_blur(&base);
            let dog = difference(&base, &blurred);
            debug_assert_eq!((base.width, base.height), plan.octave_sizes[k]);
            octaves.push(Octave { base, blurred, dog });
        }
        Self { octaves }
    }

    pub fn len(&self) -> usize {
        self.octaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.octaves.is_empty()
    }
}

/// Map an octave-`k` coordinate to the full-resolution image.
#[inline]
pub fn octave_to_base(v: f64, octave: usize) -> f64 {
    if octave == 0 {
        return v;
    }
    let s = (1u64 << octave) as f64;
    v * s + s * 0.5 - 0.5
}

#[inline]
fn binomial_row(src: &[f32], dst: &mut [f32]) {
    let w = src.len();
    for x in 0..w {
        let xm1 = x.saturating_sub(1);
        let xm2 = x.saturating_sub(2);
        let xp1 = (x + 1).min(w - 1);
        let xp2 = (x + 2).min(w - 1);
        dst[x] = (src[xm2] + 4.0 * src[xm1] + 6.0 * src[x] + 4.0 * src[xp1] + src[xp2]) * (1.0 / 16.0);
    }
}

/// Separable 5-tap binomial filter.
pub fn binomial_blur(image: &GreyImage) -> GreyImage {
    let (w, h) = (image.width, image.height);

    let mut tmp = vec![0.0f32; w * h];
    tmp.par_chunks_mut(w)
        .zip(image.data.par_chunks(w))
        .for_each(|(dst, src)| binomial_row(src, dst));

    let mut out = vec![0.0f32; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let ym2 = y.saturating_sub(2) * w;
        let ym1 = y.saturating_sub(1) * w;
        let y0 = y * w;
        let yp1 = (y + 1).min(h - 1) * w;
        let yp2 = (y + 2).min(h - 1) * w;
        for x in 0..w {
            dst[x] = (tmp[ym2 + x] + 4.0 * tmp[ym1 + x] + 6.0 * tmp[y0 + x] + 4.0 * tmp[yp1 + x] + tmp[yp2 + x])
                * (1.0 / 16.0);
        }
    });

    GreyImage {
        width: w,
        height: h,
        data: out,
    }
}

/// Average each 2x2 block. Odd trailing rows/columns are dropped.
pub fn downsample(image: &GreyImage) -> GreyImage {
    let (w, h) = (image.width / 2, image.height / 2);
    let src_w = image.width;
    let mut out = vec![0.0f32; w * h];
    out.par_chunks_mut(w.max(1)).enumerate().for_each(|(y, dst)| {
        let r0 = 2 * y * src_w;
        let r1 = r0 + src_w;
        for x in 0..w {
            let c = 2 * x;
            dst[x] = (image.data[r0 + c] + image.data[r0 + c + 1] + image.data[r1 + c] + image.data[r1 + c + 1]) * 0.25;
        }
    });
    GreyImage {
        width: w,
        height: h,
        data: out,
    }
}

fn difference(a: &GreyImage, b: &GreyImage) -> GreyImage {
    let data = a.data.par_iter().zip(b.data.par_iter()).map(|(x, y)| x - y).collect();
    GreyImage {
        width: a.width,
        height: a.height,
        data,
    }
}
