//! Single-channel image buffer shared by every stage of the pipeline.
//!
//! Pixels are stored row-major as `f32` in the 0..255 range. Integer pixel
//! `(x, y)` has its centre at coordinate `(x, y)`; bilinear sampling clamps to
//! the border.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Greyscale image with floating-point intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct GreyImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GreyImage {
    /// Wrap an existing buffer. Fails if the length does not match the shape.
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            bail!(
                "image buffer has {} pixels, expected {}x{}",
                data.len(),
                width,
                height
            );
        }
        Ok(Self { width, height, data })
    }

    /// Image filled with a constant value.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Build from 8-bit grey pixels.
    pub fn from_luma8(width: usize, height: usize, pixels: &[u8]) -> Result<Self> {
        Self::new(width, height, pixels.iter().map(|&p| p as f32).collect())
    }

    /// Build from interleaved RGBA pixels using floor(0.299 R + 0.587 G + 0.114 B).
    pub fn from_rgba8(width: usize, height: usize, pixels: &[u8]) -> Result<Self> {
        if pixels.len() != width * height * 4 {
            bail!("rgba buffer has {} bytes, expected {}", pixels.len(), width * height * 4);
        }
        let data = pixels
            .chunks_exact(4)
            .map(|px| {
                (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32).floor()
            })
            .collect();
        Self::new(width, height, data)
    }

    /// Decode any format supported by the `image` crate.
    pub fn from_dynamic(img: &image::DynamicImage) -> Result<Self> {
        if let image::DynamicImage::ImageLuma8(grey) = img {
            let (w, h) = grey.dimensions();
            return Self::from_luma8(w as usize, h as usize, grey.as_raw());
        }
        let rgba = img.to_rgba8();
        let (w, h) = rgba.dimensions();
        Self::from_rgba8(w as usize, h as usize, rgba.as_raw())
    }

    /// Load an image file from disk and convert it to grey.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).with_context(|| format!("failed to open image {}", path.display()))?;
        Self::from_dynamic(&img)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    /// Pixel lookup with coordinates clamped to the image.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> f32 {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cy * self.width + cx]
    }

    /// Bilinear sample at a sub-pixel location, clamped at the border.
    #[inline]
    pub fn sample(&self, x: f64, y: f64) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = (x - x0) as f32;
        let fy = (y - y0) as f32;
        let (ix, iy) = (x0 as i64, y0 as i64);

        let p00 = self.get_clamped(ix, iy);
        let p10 = self.get_clamped(ix + 1, iy);
        let p01 = self.get_clamped(ix, iy + 1);
        let p11 = self.get_clamped(ix + 1, iy + 1);

        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        top + (bottom - top) * fy
    }

    /// Copy a `w`x`h` window starting at `(x0, y0)`. The window must lie inside the image.
    pub fn crop(&self, x0: usize, y0: usize, w: usize, h: usize) -> Self {
        let mut data = Vec::with_capacity(w * h);
        for y in y0..y0 + h {
            let start = y * self.width + x0;
            data.extend_from_slice(&self.data[start..start + w]);
        }
        Self { width: w, height: h, data }
    }

    /// Area-average resample by `scale`, producing a `round(w*scale)` x `round(h*scale)` image.
    ///
    /// Every destination pixel averages the source pixels whose centres fall in
    /// its footprint; a footprint that catches no centre falls back to the
    /// nearest source pixel.
    pub fn resize(&self, scale: f64) -> Self {
        let dst_w = ((self.width as f64 * scale).round() as usize).max(1);
        let dst_h = ((self.height as f64 * scale).round() as usize).max(1);
        let mut data = vec![0.0f32; dst_w * dst_h];

        for j in 0..dst_h {
            let sy0 = (j as f64 / scale).ceil() as usize;
            let sy1 = (((j + 1) as f64 / scale).ceil() as usize).min(self.height);
            for i in 0..dst_w {
                let sx0 = (i as f64 / scale).ceil() as usize;
                let sx1 = (((i + 1) as f64 / scale).ceil() as usize).min(self.width);

                let mut sum = 0.0f32;
                let mut count = 0usize;
                for y in sy0..sy1 {
                    for x in sx0..sx1 {
                        sum += self.get(x, y);
                        count += 1;
                    }
                }

                data[j * dst_w + i] = if count == 0 {
                    self.get_clamped(sx0 as i64, sy0 as i64)
                } else {
                    sum / count as f32
                };
            }
        }

        Self {
            width: dst_w,
            height: dst_h,
            data,
        }
    }

    /// Quantize to 8-bit grey, used for stored tracking images.
    pub fn to_luma8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| v.round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}
