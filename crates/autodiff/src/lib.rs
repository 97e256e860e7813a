//! Reverse-mode automatic differentiation over `ndarray` tensors.
//!
//! The tape supports higher-order differentiation: `Tape::grad` emits the
//! gradient as new tape nodes built from the same operation set, so the
//! result can be differentiated again. Grad-CAM++ needs exactly three levels
//! of this (first, second and third derivatives of a class score with
//! respect to an activation tensor).

pub mod tape;

pub use tape::{NodeId, Tape, TapeError};
