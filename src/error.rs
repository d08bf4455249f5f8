//! Engine error types

use crate::backend::{BackendError, FramebufferStatus};
use thiserror::Error;

/// Errors raised by the engine core.
///
/// Configuration errors (attribute mismatches, incomplete framebuffers) are
/// reported from `Engine::init` and are not meant to be recovered from.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Shader program '{program}' failed to compile:\n{message}")]
    ShaderCompilation { program: String, message: String },
    #[error("Shader program '{program}' has no vertex entry point '{entry}'")]
    MissingEntryPoint { program: String, entry: String },
    #[error("Shader program '{program}' has an unsupported vertex input at location {location}")]
    UnsupportedVertexInput { program: String, location: u32 },
    #[error("Submesh {submesh} of mesh '{mesh}' provides no attribute for location {location} required by '{program}'")]
    MissingVertexAttribute {
        mesh: String,
        submesh: usize,
        program: String,
        location: u32,
    },
    #[error("Submesh {submesh} of mesh '{mesh}' declares location {location} more than once")]
    DuplicateVertexAttribute {
        mesh: String,
        submesh: usize,
        location: u32,
    },
    #[error("Framebuffer '{label}' is incomplete: {status:?}")]
    IncompleteFramebuffer {
        label: String,
        status: FramebufferStatus,
    },
    #[error("Invalid display size {width}x{height}")]
    InvalidDisplaySize { width: u32, height: u32 },
    #[error("Uniform buffer overflow: {requested} bytes requested, capacity is {capacity}")]
    UniformBufferOverflow { requested: u64, capacity: u64 },
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(u64),
    #[error("Unknown {kind} index {index}")]
    MissingResource { kind: &'static str, index: usize },
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UniformBufferOverflow {
            requested: 300,
            capacity: 256,
        };
        assert_eq!(
            err.to_string(),
            "Uniform buffer overflow: 300 bytes requested, capacity is 256"
        );

        let err: EngineError = BackendError::SurfaceLost.into();
        assert_eq!(err.to_string(), "Surface lost");
    }
}
