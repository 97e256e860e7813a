use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("heatmap resize failed: {0}")]
    Resize(String),

    #[error("image size mismatch: {0}")]
    SizeMismatch(String),
}
