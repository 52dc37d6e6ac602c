//! Graphics error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the orchestration layer.
///
/// Everything here is fatal for the frame loop. Caller misuse such as a
/// duplicate pipeline name or an overfull sprite batch is logged and dropped
/// instead of being reported through this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("shader not found: {0}")]
    ShaderNotFound(String),
    #[error("invalid shader binary {id}: {reason}")]
    InvalidShader { id: String, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::from(BackendError::OutOfMemory);
        assert_eq!(err.to_string(), "Out of memory");

        let err = GraphicsError::ShaderNotFound("shaders/blur.comp.spv".to_string());
        assert_eq!(err.to_string(), "shader not found: shaders/blur.comp.spv");
    }
}
