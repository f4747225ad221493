//! Scale-space extrema on interior DoG octaves and bucket pruning.

use rayon::prelude::*;

use crate::image::GreyImage;

use super::pyramid::Pyramid;

/// A raw DoG extremum in octave pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub octave: usize,
    pub x: usize,
    pub y: usize,
    pub score: f32,
    pub maxima: bool,
}

/// The three DoG levels around one octave, with the neighbours resampled
/// onto the middle octave's pixel grid.
pub(crate) struct DogStack<'a> {
    pub finer: &'a GreyImage,
    pub current: &'a GreyImage,
    pub coarser: &'a GreyImage,
}

impl<'a> DogStack<'a> {
    pub fn new(pyramid: &'a Pyramid, octave: usize) -> Self {
        Self {
            finer: &pyramid.octaves[octave - 1].dog,
            current: &pyramid.octaves[octave].dog,
            coarser: &pyramid.octaves[octave + 1].dog,
        }
    }

    #[inline]
    pub fn finer_at(&self, x: f64, y: f64) -> f32 {
        self.finer.sample(2.0 * x + 0.5, 2.0 * y + 0.5)
    }

    #[inline]
    pub fn coarser_at(&self, x: f64, y: f64) -> f32 {
        self.coarser.sample((x - 0.5) * 0.5, (y - 0.5) * 0.5)
    }
}

/// Thresholds used to accept an extremum.
#[derive(Debug, Clone, Copy)]
pub struct ExtremaThresholds {
    pub laplacian: f32,
    pub edge_ratio: f32,
}

impl ExtremaThresholds {
    fn edge_limit(&self) -> f32 {
        (self.edge_ratio + 1.0) * (self.edge_ratio + 1.0) / self.edge_ratio
    }
}

fn is_extremum(stack: &DogStack<'_>, x: usize, y: usize, thresholds: &ExtremaThresholds) -> Option<bool> {
    let img = stack.current;
    let value = img.get(x, y);
    if value * value < thresholds.laplacian * thresholds.laplacian {
        return None;
    }
    let maxima = value > 0.0;

    let beats = |other: f32| if maxima { value > other } else { value < other };

    // Step 1: same-octave neighbours
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if !beats(img.get((x as i64 + dx) as usize, (y as i64 + dy) as usize)) {
                return None;
            }
        }
    }

    // Step 2: edge response from the 2x2 spatial Hessian
    let c = value;
    let dxx = img.get(x + 1, y) + img.get(x - 1, y) - 2.0 * c;
    let dyy = img.get(x, y + 1) + img.get(x, y - 1) - 2.0 * c;
    let dxy = 0.25 * (img.get(x - 1, y - 1) + img.get(x + 1, y + 1) - img.get(x + 1, y - 1) - img.get(x - 1, y + 1));
    let det = dxx * dyy - dxy * dxy;
    if det <= 0.0 {
        return None;
    }
    let trace = dxx + dyy;
    if trace * trace / det >= thresholds.edge_limit() {
        return None;
    }

    // Step 3: neighbours in the adjacent octaves
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            let nx = (x as i64 + dx) as f64;
            let ny = (y as i64 + dy) as f64;
            if !beats(stack.finer_at(nx, ny)) || !beats(stack.coarser_at(nx, ny)) {
                return None;
            }
        }
    }

    Some(maxima)
}

/// Find extrema on every interior octave (`1..n-1`).
pub fn find_extrema(pyramid: &Pyramid, thresholds: &ExtremaThresholds) -> Vec<Vec<Extremum>> {
    let n = pyramid.len();
    let mut per_octave = vec![Vec::new(); n];
    if n < 3 {
        return per_octave;
    }

    for (octave, found) in per_octave.iter_mut().enumerate().take(n - 1).skip(1) {
        let dogs = DogStack::new(pyramid, octave);
        let stack = &dogs;
        let (w, h) = (stack.current.width, stack.current.height);
        if w < 3 || h < 3 {
            continue;
        }
        *found = (1..h - 1)
            .into_par_iter()
            .flat_map_iter(move |y| {
                (1..w - 1).filter_map(move |x| {
                    is_extremum(stack, x, y, thresholds).map(|maxima| Extremum {
                        octave,
                        x,
                        y,
                        score: stack.current.get(x, y),
                        maxima,
                    })
                })
            })
            .collect();
    }
    per_octave
}

/// Keep at most `per_bucket` strongest extrema in each cell of a
/// `buckets x buckets` grid laid over the image. Buckets are shared by all
/// octaves; each extremum is binned by its position relative to its own
/// octave's size.
pub fn prune(
    per_octave: &[Vec<Extremum>],
    octave_sizes: &[(usize, usize)],
    buckets: usize,
    per_bucket: usize,
) -> Vec<Extremum> {
    let buckets = buckets.max(1);
    let mut binned: Vec<(usize, Extremum)> = per_octave
        .iter()
        .flatten()
        .map(|e| {
            let (w, h) = octave_sizes[e.octave];
            let bx = (e.x * buckets / w).min(buckets - 1);
            let by = (e.y * buckets / h).min(buckets - 1);
            (by * buckets + bx, *e)
        })
        .collect();

    binned.sort_by(|(ba, a), (bb, b)| {
        ba.cmp(bb)
            .then_with(|| b.score.abs().total_cmp(&a.score.abs()))
            .then_with(|| a.octave.cmp(&b.octave))
            .then_with(|| a.y.cmp(&b.y))
            .then_with(|| a.x.cmp(&b.x))
    });

    let mut kept = Vec::new();
    let mut current_bucket = usize::MAX;
    let mut taken = 0;
    for (bucket, e) in binned {
        if bucket != current_bucket {
            current_bucket = bucket;
            taken = 0;
        }
        if taken < per_bucket {
            kept.push(e);
            taken += 1;
        }
    }
    kept
}
