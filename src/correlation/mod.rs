//! Windowed statistics and normalized cross-correlation.
//!
//! - [`IntegralImage`]: summed-area tables answering windowed sums in O(1)
//! - [`ncc`]: template statistics and similarity scores built on top of them
//!
//! Used by tracking-feature extraction at compile time and by the frame
//! tracker's correlation search at run time.

pub mod integral;
pub mod ncc;

pub use integral::{IntegralImage, WindowStats};
pub use ncc::{similarity, TemplateStats};
