use crate::error::ModelError;
use crate::spec::HeadLayerSpec;
use ndarray::{Array1, Array2, Array3, Axis};
use std::path::Path;
use std::sync::Arc;

/// One layer of the classifier head sitting between the designated conv
/// activation and the output probabilities. The attribution engine lowers
/// these same ops onto a differentiation tape, so the head is the exact
/// function gradients flow through.
#[derive(Clone)]
pub enum HeadOp {
    Relu,
    GlobalAvgPool,
    Dense {
        /// `outputs` x `inputs`, shared with tape nodes.
        weights: Arc<Array2<f32>>,
        bias: Array1<f32>,
    },
    Softmax,
    Sigmoid,
}

#[derive(Clone)]
pub struct Head {
    ops: Vec<HeadOp>,
}

enum Feature {
    Spatial(Array3<f32>),
    Flat(Array1<f32>),
}

fn read_f32_file(path: &Path, expected: usize) -> Result<Vec<f32>, ModelError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != expected * 4 {
        return Err(ModelError::HeadShape(format!(
            "{}: expected {} f32 values ({} bytes), file holds {} bytes",
            path.display(),
            expected,
            expected * 4,
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl Head {
    /// Materialize a head from its spec, loading dense weights from raw
    /// little-endian f32 files next to the spec.
    pub fn from_spec(layers: &[HeadLayerSpec], dir: &Path) -> Result<Self, ModelError> {
        let mut ops = Vec::with_capacity(layers.len());
        for layer in layers {
            ops.push(match layer {
                HeadLayerSpec::Relu => HeadOp::Relu,
                HeadLayerSpec::GlobalAvgPool => HeadOp::GlobalAvgPool,
                HeadLayerSpec::Dense {
                    weights,
                    bias,
                    inputs,
                    outputs,
                } => {
                    let w = read_f32_file(&dir.join(weights), inputs * outputs)?;
                    let w = Array2::from_shape_vec((*outputs, *inputs), w).map_err(|e| {
                        ModelError::HeadShape(format!("dense weights: {}", e))
                    })?;
                    let b = read_f32_file(&dir.join(bias), *outputs)?;
                    HeadOp::Dense {
                        weights: Arc::new(w),
                        bias: Array1::from_vec(b),
                    }
                }
                HeadLayerSpec::Softmax => HeadOp::Softmax,
                HeadLayerSpec::Sigmoid => HeadOp::Sigmoid,
            });
        }
        Ok(Self { ops })
    }

    pub fn new(ops: Vec<HeadOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[HeadOp] {
        &self.ops
    }

    /// Plain (non-differentiated) forward pass from activations to the
    /// output probability vector.
    pub fn forward(&self, activation: &Array3<f32>) -> Result<Array1<f32>, ModelError> {
        let mut feature = Feature::Spatial(activation.clone());
        for op in &self.ops {
            feature = match (op, feature) {
                (HeadOp::Relu, Feature::Spatial(a)) => {
                    Feature::Spatial(a.mapv_into(|v| v.max(0.0)))
                }
                (HeadOp::Relu, Feature::Flat(a)) => Feature::Flat(a.mapv_into(|v| v.max(0.0))),
                (HeadOp::GlobalAvgPool, Feature::Spatial(a)) => {
                    let (h, w, _) = a.dim();
                    let pooled =
                        a.sum_axis(Axis(0)).sum_axis(Axis(0)) / ((h * w) as f32);
                    Feature::Flat(pooled)
                }
                (HeadOp::GlobalAvgPool, Feature::Flat(_)) => {
                    return Err(ModelError::HeadShape(
                        "global_avg_pool applied to an already-pooled feature".into(),
                    ));
                }
                (HeadOp::Dense { weights, bias }, Feature::Flat(a)) => {
                    if weights.ncols() != a.len() {
                        return Err(ModelError::HeadShape(format!(
                            "dense layer expects {} inputs, feature has {}",
                            weights.ncols(),
                            a.len()
                        )));
                    }
                    Feature::Flat(weights.dot(&a) + bias)
                }
                (HeadOp::Dense { .. }, Feature::Spatial(_)) => {
                    return Err(ModelError::HeadShape(
                        "dense layer applied before global_avg_pool".into(),
                    ));
                }
                (HeadOp::Softmax, Feature::Flat(a)) => {
                    let max = a.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let exp = a.mapv(|v| (v - max).exp());
                    let sum = exp.sum();
                    Feature::Flat(exp.mapv(|v| v / sum))
                }
                (HeadOp::Sigmoid, Feature::Flat(a)) => {
                    Feature::Flat(a.mapv(|v| 1.0 / (1.0 + (-v).exp())))
                }
                (HeadOp::Softmax, Feature::Spatial(_)) | (HeadOp::Sigmoid, Feature::Spatial(_)) => {
                    return Err(ModelError::HeadShape(
                        "output activation applied to a spatial feature".into(),
                    ));
                }
            };
        }
        match feature {
            Feature::Flat(probs) => Ok(probs),
            Feature::Spatial(_) => Err(ModelError::HeadShape(
                "head produced a spatial feature instead of a probability vector".into(),
            )),
        }
    }
}
