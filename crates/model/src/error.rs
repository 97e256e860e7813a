use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid model spec: {0}")]
    InvalidSpec(String),

    #[error("failed to parse model spec: {0}")]
    SpecParse(#[from] serde_json::Error),

    #[error("activation layer '{0}' not found among model outputs")]
    MissingLayer(String),

    #[error("head shape mismatch: {0}")]
    HeadShape(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("empty image upload")]
    EmptyImage,

    #[error("unreadable image: {0}")]
    InvalidImage(String),

    #[error("image resize failed: {0}")]
    Resize(String),
}

impl ModelError {
    /// Request-level input errors are rejected before any tensor computation
    /// starts; everything else is a configuration or integration failure.
    pub fn is_input_error(&self) -> bool {
        matches!(self, ModelError::EmptyImage | ModelError::InvalidImage(_))
    }
}
