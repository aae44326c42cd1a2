//! Error types and handling
//!
//! Error taxonomy shared by the render engine, the recording session
//! controller and the recorder facade.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Recorder-wide error type.
///
/// Cloneable: one error goes to the caller, the listener and event subscribers.
#[derive(Error, Debug, Clone)]
pub enum RecorderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Encoder rejected configuration: {0}")]
    EncoderConfig(String),

    #[error("Encoder failed to start: {0}")]
    EncoderStart(String),

    #[error("Encoder failed to stop after {frames_written} frames, output {output_path:?} is invalid: {reason}")]
    EncoderStop {
        output_path: PathBuf,
        frames_written: u64,
        reason: String,
    },

    #[error("Surface lifecycle violation: {0}")]
    SurfaceLifecycle(String),

    #[error("Capture session error: {0}")]
    Capture(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("Serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    #[error("Recorder has been released")]
    Released,
}

impl RecorderError {
    /// Stable error code for UI glue
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::InvalidArgument(_) => "INVALID_ARGUMENT",
            RecorderError::InvalidState(_) => "INVALID_STATE",
            RecorderError::EncoderConfig(_) => "ENCODER_CONFIG_ERROR",
            RecorderError::EncoderStart(_) => "ENCODER_START_ERROR",
            RecorderError::EncoderStop { .. } => "ENCODER_STOP_ERROR",
            RecorderError::SurfaceLifecycle(_) => "SURFACE_LIFECYCLE_ERROR",
            RecorderError::Capture(_) => "CAPTURE_ERROR",
            RecorderError::Render(_) => "RENDER_ERROR",
            RecorderError::Config(_) => "CONFIG_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
            RecorderError::Released => "RELEASED",
        }
    }

    /// Whether the file written by the failed recording must be discarded
    pub fn invalidates_output(&self) -> bool {
        matches!(self, RecorderError::EncoderStop { .. })
    }

    /// Output file affected by this error, if any
    pub fn output_path(&self) -> Option<&PathBuf> {
        match self {
            RecorderError::EncoderStop { output_path, .. } => Some(output_path),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(error: std::io::Error) -> Self {
        RecorderError::Io(Arc::new(error))
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(error: serde_json::Error) -> Self {
        RecorderError::Serialization(Arc::new(error))
    }
}

/// Error response for UI glue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&RecorderError> for ErrorResponse {
    fn from(error: &RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
