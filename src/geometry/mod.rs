//! Geometry utilities: camera model, model-view poses, SO(3) helpers.

pub mod camera;
pub mod pose;
pub mod so3;

pub use camera::CameraModel;
pub use pose::{project_mvp, ModelViewTransform};
