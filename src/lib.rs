pub mod compiler;
pub mod config;
pub mod correlation;
pub mod debug;
pub mod detector;
pub mod estimation;
pub mod geometry;
pub mod image;
pub mod index;
pub mod io;
pub mod kernels;
pub mod matching;
pub mod system;
pub mod target;
pub mod tracking;

#[cfg(test)]
mod test_support;

pub use config::SessionConfig;
pub use system::Session;
