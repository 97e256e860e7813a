use crate::error::ModelError;
use crate::preprocess::Preprocessing;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Mutually exclusive classes behind a softmax (brain MRI).
    SingleLabel,
    /// Independent findings behind per-label sigmoids (chest X-ray).
    MultiLabel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HeadLayerSpec {
    Relu,
    GlobalAvgPool,
    Dense {
        /// Raw little-endian f32 weight file, `outputs` x `inputs` row-major.
        weights: String,
        /// Raw little-endian f32 bias file, `outputs` values.
        bias: String,
        inputs: usize,
        outputs: usize,
    },
    Softmax,
    Sigmoid,
}

/// On-disk description of one classifier: backbone artifact, designated
/// activation layer, classifier head, preprocessing and labels. Everything
/// needed to construct a `ClassifierModel` and validate it at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub task: TaskKind,
    pub input_width: u32,
    pub input_height: u32,
    pub preprocessing: Preprocessing,
    /// ONNX backbone path, relative to the spec file.
    pub backbone: String,
    /// Name of the backbone output carrying the designated conv activations.
    pub activation_layer: String,
    pub head: Vec<HeadLayerSpec>,
    pub labels: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

fn default_threshold() -> f32 {
    0.5
}

impl ModelSpec {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        let spec: ModelSpec = serde_json::from_str(&raw)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.labels.is_empty() {
            return Err(ModelError::InvalidSpec("label list is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ModelError::InvalidSpec(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(ModelError::InvalidSpec("input size must be non-zero".into()));
        }

        match (self.task, self.head.last()) {
            (TaskKind::SingleLabel, Some(HeadLayerSpec::Softmax)) => {}
            (TaskKind::MultiLabel, Some(HeadLayerSpec::Sigmoid)) => {}
            _ => {
                return Err(ModelError::InvalidSpec(
                    "head must end in softmax for single-label or sigmoid for multi-label".into(),
                ));
            }
        }

        let last_dense = self
            .head
            .iter()
            .rev()
            .find_map(|layer| match layer {
                HeadLayerSpec::Dense { outputs, .. } => Some(*outputs),
                _ => None,
            })
            .ok_or_else(|| ModelError::InvalidSpec("head has no dense layer".into()))?;

        if last_dense != self.labels.len() {
            return Err(ModelError::InvalidSpec(format!(
                "final dense layer has {} outputs but {} labels are declared",
                last_dense,
                self.labels.len()
            )));
        }

        Ok(())
    }
}
