//! Gradient-based saliency for classifier heads.
//!
//! The backbone is a black box; gradients are taken through the explicit
//! classifier head, lowered onto a differentiation tape that supports the
//! third-order derivatives Grad-CAM++ needs.

pub mod engine;
pub mod error;
pub mod gradcam;
pub mod lower;
pub mod tta;

pub use engine::AttributionEngine;
pub use error::AttributionError;
pub use gradcam::{grad_cam, grad_cam_pp};
