//! Heatmap rendering: resize attribution maps, map them through a color
//! lookup and blend them over the source image.

pub mod compose;
pub mod error;
pub mod heatmap;

pub use compose::{blend, hstack, overlay};
pub use error::OverlayError;
pub use heatmap::{colorize, resize_heatmap};
