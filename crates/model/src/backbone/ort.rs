use super::Backbone;
use crate::error::ModelError;
use ndarray::ArrayD;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

fn ort_err<R>(e: ort::Error<R>) -> ModelError {
    ModelError::Backend(e.to_string())
}

/// ONNX Runtime backbone. The model must expose the designated conv
/// activation as a named graph output.
pub struct OrtBackbone {
    session: Session,
    input_name: String,
    activation_output: String,
}

impl OrtBackbone {
    /// Load the backbone and check that the named activation output exists
    /// in the session's output list. A missing output is a fatal startup
    /// configuration error, not a per-request one.
    pub fn load(path: &str, activation_output: &str) -> Result<Self, ModelError> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let session = Session::builder()
            .map_err(ort_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_err)?
            .with_intra_threads(4)
            .map_err(ort_err)?
            .commit_from_file(path)
            .map_err(ort_err)?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| ModelError::Backend("backbone has no inputs".into()))?;

        if !session
            .outputs()
            .iter()
            .any(|o| o.name() == activation_output)
        {
            return Err(ModelError::MissingLayer(activation_output.to_string()));
        }

        tracing::info!(path, activation_output, "Backbone loaded");
        Ok(Self {
            session,
            input_name,
            activation_output: activation_output.to_string(),
        })
    }
}

impl Backbone for OrtBackbone {
    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let tensor = TensorRef::from_array_view(input.view()).map_err(ort_err)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(ort_err)?;
        let activation = outputs[self.activation_output.as_str()]
            .try_extract_array()
            .map_err(ort_err)?;
        Ok(activation.into_owned())
    }
}
