//! Error types for the render chain.

use thiserror::Error;

use postfx_config::PresetError;

/// Result type for render chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors that can occur while building or running a render chain.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Malformed or out-of-range pass, scale, LUT or variable description.
    #[error("configuration error: {0}")]
    Config(String),

    /// A pass program failed to parse, validate or link against the chain.
    #[error("shader `{label}` failed to compile: {message}")]
    Compile { label: String, message: String },

    /// GPU texture, target or buffer allocation failed.
    #[error("GPU resource error: {0}")]
    Resource(String),

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Logic(String),

    /// LUT or shader file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// LUT image could not be decoded.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Preset description was rejected.
    #[error(transparent)]
    Preset(#[from] PresetError),
}

impl ChainError {
    pub(crate) fn compile(label: impl Into<String>, message: impl Into<String>) -> Self {
        ChainError::Compile {
            label: label.into(),
            message: message.into(),
        }
    }

    /// Whether a frame that hit this error can simply be skipped, leaving the
    /// chain usable for the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChainError::Resource(_))
    }
}
