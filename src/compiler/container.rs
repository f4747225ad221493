//! Versioned binary container for compiled targets.
//!
//! MessagePack map `{ "v": u32, "targets": [Target] }`. The version is probed
//! before the payload is decoded; any other version is rejected.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detector::DESCRIPTOR_BYTES;
use crate::target::Target;

pub const CONTAINER_VERSION: u32 = 2;

#[derive(Serialize)]
struct ContainerRef<'a> {
    v: u32,
    targets: &'a [Target],
}

#[derive(Deserialize)]
struct Container {
    #[allow(dead_code)]
    v: u32,
    targets: Vec<Target>,
}

#[derive(Deserialize)]
struct VersionProbe {
    v: u32,
}

/// Errors raised while reading or writing a container.
#[derive(Debug)]
pub enum ContainerError {
    Io(std::io::Error),
    Encode(String),
    Decode(String),
    VersionMismatch { found: u32, expected: u32 },
    Malformed(String),
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "container I/O error: {e}"),
            Self::Encode(e) => write!(f, "failed to encode container: {e}"),
            Self::Decode(e) => write!(f, "failed to decode container: {e}"),
            Self::VersionMismatch { found, expected } => {
                write!(f, "container version {found} does not match expected version {expected}")
            }
            Self::Malformed(e) => write!(f, "malformed container: {e}"),
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub fn encode(targets: &[Target]) -> Result<Vec<u8>, ContainerError> {
    let container = ContainerRef {
        v: CONTAINER_VERSION,
        targets,
    };
    rmp_serde::to_vec_named(&container).map_err(|e| ContainerError::Encode(e.to_string()))
}

/// Decode and validate a container. Nothing is returned unless every target
/// is well formed.
pub fn decode(bytes: &[u8]) -> Result<Vec<Target>, ContainerError> {
    let probe: VersionProbe = rmp_serde::from_slice(bytes).map_err(|e| ContainerError::Decode(e.to_string()))?;
    if probe.v != CONTAINER_VERSION {
        return Err(ContainerError::VersionMismatch {
            found: probe.v,
            expected: CONTAINER_VERSION,
        });
    }
    let container: Container = rmp_serde::from_slice(bytes).map_err(|e| ContainerError::Decode(e.to_string()))?;
    for (i, target) in container.targets.iter().enumerate() {
        validate(target).map_err(|e| ContainerError::Malformed(format!("target {i}: {e}")))?;
    }
    Ok(container.targets)
}

pub fn write_file(path: impl AsRef<Path>, targets: &[Target]) -> Result<(), ContainerError> {
    std::fs::write(path, encode(targets)?)?;
    Ok(())
}

pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<Target>, ContainerError> {
    decode(&std::fs::read(path)?)
}

fn validate(target: &Target) -> Result<(), String> {
    if target.width == 0 || target.height == 0 {
        return Err("empty target dimensions".into());
    }
    if target.keyframes.is_empty() {
        return Err("no matching keyframes".into());
    }
    for (k, kf) in target.keyframes.iter().enumerate() {
        for maxima in [true, false] {
            let points = kf.points(maxima);
            if let Some(p) = points.iter().find(|p| p.descriptor.len() != DESCRIPTOR_BYTES || p.maxima != maxima) {
                return Err(format!("keyframe {k}: bad point at ({}, {})", p.x, p.y));
            }
            kf.index(maxima)
                .validate(points.len())
                .map_err(|e| format!("keyframe {k}: {e}"))?;
        }
    }
    for (k, tk) in target.tracking.iter().enumerate() {
        if tk.pixels.len() != tk.width * tk.height {
            return Err(format!("tracking keyframe {k}: {} pixels for {}x{}", tk.pixels.len(), tk.width, tk.height));
        }
        if !(tk.scale.is_finite() && tk.scale > 0.0) {
            return Err(format!("tracking keyframe {k}: scale {}", tk.scale));
        }
        if tk.points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(format!("tracking keyframe {k}: non-finite point"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_target;
    use crate::test_support::textured_image;

    #[test]
    fn test_round_trip_preserves_targets() {
        let target = compile_target(&textured_image(128, 160, 3));
        let bytes = encode(std::slice::from_ref(&target)).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, vec![target]);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let container = ContainerRef {
            v: CONTAINER_VERSION + 1,
            targets: &[],
        };
        let bytes = rmp_serde::to_vec_named(&container).unwrap();
        match decode(&bytes) {
            Err(ContainerError::VersionMismatch { found, expected }) => {
                assert_eq!(found, CONTAINER_VERSION + 1);
                assert_eq!(expected, CONTAINER_VERSION);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(decode(&[0xc1, 0x00, 0x13]), Err(ContainerError::Decode(_))));
    }

    #[test]
    fn test_dangling_index_child_is_malformed() {
        use crate::index::{NodeId, NodeKind};

        let mut target = compile_target(&textured_image(256, 256, 7));
        let kf = target
            .keyframes
            .iter_mut()
            .find(|kf| matches!(kf.maxima_index.nodes[0].kind, NodeKind::Internal { .. }))
            .unwrap();
        if let NodeKind::Internal { children } = &mut kf.maxima_index.nodes[0].kind {
            children.push(NodeId(9999));
        }
        let bytes = encode(&[target]).unwrap();
        assert!(matches!(decode(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn test_bad_tracking_scale_is_malformed() {
        let mut target = compile_target(&textured_image(128, 128, 8));
        target.tracking[0].scale = 0.0;
        let bytes = encode(&[target]).unwrap();
        assert!(matches!(decode(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn test_truncated_descriptor_is_malformed() {
        let mut target = compile_target(&textured_image(128, 128, 4));
        let kf = &mut target.keyframes[0];
        let p = kf.maxima_points.first_mut().unwrap();
        p.descriptor.0.truncate(10);
        let bytes = encode(&[target]).unwrap();
        assert!(matches!(decode(&bytes), Err(ContainerError::Malformed(_))));
    }
}
