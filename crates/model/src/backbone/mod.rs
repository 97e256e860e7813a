use crate::error::ModelError;
use ndarray::ArrayD;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// A loaded backbone network: NCHW image batch in, NCHW activations of the
/// designated internal layer out.
///
/// Sessions of the underlying runtime are typically not reentrant, so
/// `forward` takes `&mut self`; `ClassifierModel` serializes access behind a
/// lock.
pub trait Backbone: Send {
    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError>;
}
