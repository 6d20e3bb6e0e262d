//! Engine error type.

use thiserror::Error;

use crate::canvas::LayerId;

/// Errors surfaced by the drawing engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An engine invariant would be broken (last layer removal, missing active buffer).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// No layer carries the given id.
    #[error("layer not found: {0}")]
    LayerNotFound(LayerId),

    /// Input data is structurally invalid (documents, requests, settings).
    #[error("validation error: {0}")]
    Validation(String),

    /// Image decoding or encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Export payload was not valid base64.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
