use autodiff::TapeError;
use model::ModelError;
use overlay::OverlayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("gradient computation failed: {0}")]
    Tape(#[from] TapeError),

    #[error("heatmap rendering failed: {0}")]
    Overlay(#[from] OverlayError),

    #[error("class index {class} out of range for {classes} classes")]
    ClassOutOfRange { class: usize, classes: usize },

    #[error("head lowering: {0}")]
    Lower(String),
}
