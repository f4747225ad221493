//! Frame input.

pub mod source;

pub use source::{Frame, FrameSource, FrameSourceError, ImageSequenceSource, MemorySource};
