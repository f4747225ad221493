//! Frame sources feeding the tracking loop.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::image::GreyImage;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One greyscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GreyImage,
    pub timestamp_ns: u64,
}

#[derive(Debug)]
pub enum FrameSourceError {
    Io(std::io::Error),
    Decode { path: PathBuf, message: String },
    DimensionMismatch { expected: (usize, usize), found: (usize, usize) },
    Empty(PathBuf),
}

impl fmt::Display for FrameSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "frame source I/O error: {e}"),
            Self::Decode { path, message } => write!(f, "failed to decode {}: {message}", path.display()),
            Self::DimensionMismatch { expected, found } => write!(
                f,
                "frame is {}x{}, expected {}x{}",
                found.0, found.1, expected.0, expected.1
            ),
            Self::Empty(path) => write!(f, "no images found in {}", path.display()),
        }
    }
}

impl std::error::Error for FrameSourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FrameSourceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Provider of frames of a fixed size.
pub trait FrameSource: Send {
    /// `(width, height)` of every frame.
    fn dimensions(&self) -> (usize, usize);

    /// Next frame, `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
}

/// Directory of images played back in file-name order at a fixed rate.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    width: usize,
    height: usize,
    frame_interval_ns: u64,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>, fps: f64) -> Result<Self, FrameSourceError> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let first = paths.first().ok_or_else(|| FrameSourceError::Empty(dir.to_path_buf()))?;
        let image = load(first)?;
        info!(frames = paths.len(), width = image.width, height = image.height, "opened image sequence");

        Ok(Self {
            width: image.width,
            height: image.height,
            paths,
            next: 0,
            frame_interval_ns: (1e9 / fps.max(1e-3)) as u64,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn load(path: &Path) -> Result<GreyImage, FrameSourceError> {
    GreyImage::open(path).map_err(|e| FrameSourceError::Decode {
        path: path.to_path_buf(),
        message: format!("{e:#}"),
    })
}

impl FrameSource for ImageSequenceSource {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let image = load(path)?;
        if (image.width, image.height) != (self.width, self.height) {
            return Err(FrameSourceError::DimensionMismatch {
                expected: (self.width, self.height),
                found: (image.width, image.height),
            });
        }
        debug!(path = %path.display(), "frame");
        let timestamp_ns = self.next as u64 * self.frame_interval_ns;
        self.next += 1;
        Ok(Some(Frame { image, timestamp_ns }))
    }
}

/// In-memory frames, mostly for tests and offline replays.
#[derive(Debug)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    width: usize,
    height: usize,
}

impl MemorySource {
    /// Frames are stamped `frame_interval_ns` apart.
    pub fn new(width: usize, height: usize, images: Vec<GreyImage>, frame_interval_ns: u64) -> Self {
        let frames = images
            .into_iter()
            .enumerate()
            .map(|(i, image)| Frame {
                image,
                timestamp_ns: i as u64 * frame_interval_ns,
            })
            .collect();
        Self { frames, width, height }
    }
}

impl FrameSource for MemorySource {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        if (frame.image.width, frame.image.height) != (self.width, self.height) {
            return Err(FrameSourceError::DimensionMismatch {
                expected: (self.width, self.height),
                found: (frame.image.width, frame.image.height),
            });
        }
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_stamps_and_exhausts() {
        let mut src = MemorySource::new(4, 3, vec![GreyImage::filled(4, 3, 0.0); 2], 10);
        assert_eq!(src.dimensions(), (4, 3));
        assert_eq!(src.next_frame().unwrap().unwrap().timestamp_ns, 0);
        assert_eq!(src.next_frame().unwrap().unwrap().timestamp_ns, 10);
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_memory_source_rejects_wrong_size() {
        let mut src = MemorySource::new(4, 3, vec![GreyImage::filled(5, 3, 0.0)], 10);
        assert!(matches!(src.next_frame(), Err(FrameSourceError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_image_sequence_in_name_order() {
        let dir = std::env::temp_dir().join(format!("artrack-seq-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, value) in [("b.png", 200u8), ("a.png", 50u8)] {
            image::GrayImage::from_pixel(6, 4, image::Luma([value])).save(dir.join(name)).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut src = ImageSequenceSource::open(&dir, 10.0).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(src.dimensions(), (6, 4));
        let first = src.next_frame().unwrap().unwrap();
        assert_eq!(first.image.get(0, 0), 50.0);
        let second = src.next_frame().unwrap().unwrap();
        assert_eq!(second.image.get(0, 0), 200.0);
        assert_eq!(second.timestamp_ns, 100_000_000);
        assert!(src.next_frame().unwrap().is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let dir = std::env::temp_dir().join(format!("artrack-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(ImageSequenceSource::open(&dir, 30.0), Err(FrameSourceError::Empty(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
