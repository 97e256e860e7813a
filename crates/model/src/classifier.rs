use crate::backbone::Backbone;
use crate::error::ModelError;
use crate::head::Head;
use crate::preprocess::{self, Preprocessing};
use crate::spec::{ModelSpec, TaskKind};
use common::span;
use image::RgbImage;
use ndarray::{Array1, Array3, Array4, ArrayD, Axis, Ix3};
use std::path::Path;
use std::sync::Mutex;

/// An explicitly owned, load-once classifier: backbone session, classifier
/// head and labels. Shared across request handlers via an `Arc` handle; the
/// backbone session is serialized behind a lock because the underlying
/// runtime is not reentrant.
pub struct ClassifierModel {
    name: String,
    task: TaskKind,
    /// (width, height)
    input_size: (u32, u32),
    preprocessing: Preprocessing,
    labels: Vec<String>,
    threshold: f32,
    head: Head,
    backbone: Mutex<Box<dyn Backbone>>,
}

impl ClassifierModel {
    /// Load a classifier from its spec file with the ONNX Runtime backbone.
    #[cfg(feature = "ort-backend")]
    pub fn load(spec_path: &Path) -> Result<Self, ModelError> {
        let spec = ModelSpec::from_file(spec_path)?;
        let dir = spec_path.parent().unwrap_or_else(|| Path::new("."));
        let head = Head::from_spec(&spec.head, dir)?;
        let backbone_path = dir.join(&spec.backbone);
        let backbone = crate::backbone::ort::OrtBackbone::load(
            &backbone_path.to_string_lossy(),
            &spec.activation_layer,
        )?;
        Self::from_parts(spec, head, Box::new(backbone))
    }

    /// Assemble a classifier from already-constructed parts and validate it
    /// with a dry run on a zero image, so shape mismatches between backbone,
    /// head and labels refuse to serve instead of failing per request.
    pub fn from_parts(
        spec: ModelSpec,
        head: Head,
        backbone: Box<dyn Backbone>,
    ) -> Result<Self, ModelError> {
        let model = Self {
            name: spec.name,
            task: spec.task,
            input_size: (spec.input_width, spec.input_height),
            preprocessing: spec.preprocessing,
            labels: spec.labels,
            threshold: spec.threshold,
            head,
            backbone: Mutex::new(backbone),
        };

        let zeros = Array3::<f32>::zeros((
            model.input_size.1 as usize,
            model.input_size.0 as usize,
            3,
        ));
        let (_, probs) = model.forward_with_intermediate(&zeros)?;
        if probs.len() != model.labels.len() {
            return Err(ModelError::HeadShape(format!(
                "head produces {} outputs but {} labels are declared",
                probs.len(),
                model.labels.len()
            )));
        }

        tracing::info!(
            name = %model.name,
            labels = model.labels.len(),
            "Classifier validated"
        );
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    /// (width, height) of the model's fixed input resolution.
    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    /// Decode and normalize an upload for this model's input contract.
    pub fn prepare_image(&self, bytes: &[u8]) -> Result<(Array3<f32>, RgbImage), ModelError> {
        preprocess::prepare(
            bytes,
            self.input_size.0,
            self.input_size.1,
            self.preprocessing,
        )
    }

    /// Probability vector over the fixed label list.
    pub fn classify(&self, input: &Array3<f32>) -> Result<Array1<f32>, ModelError> {
        let (_, probs) = self.forward_with_intermediate(input)?;
        Ok(probs)
    }

    /// One backbone pass returning both the designated layer's activations
    /// (H x W x C) and the head output, so attribution can differentiate the
    /// head with the activations as the leaf.
    pub fn forward_with_intermediate(
        &self,
        input: &Array3<f32>,
    ) -> Result<(Array3<f32>, Array1<f32>), ModelError> {
        let _s = span!("forward_with_intermediate");

        let (h, w, c) = input.dim();
        if c != 3 || (w as u32, h as u32) != self.input_size {
            return Err(ModelError::HeadShape(format!(
                "input tensor is {}x{}x{}, model expects {}x{}x3",
                h, w, c, self.input_size.1, self.input_size.0
            )));
        }

        let nchw = hwc_to_nchw(input);
        let activation = {
            let mut backbone = self
                .backbone
                .lock()
                .map_err(|_| ModelError::Backend("backbone lock poisoned".into()))?;
            backbone.forward(&nchw.into_dyn())?
        };
        let activation = nchw_to_hwc(&activation)?;
        let probs = self.head.forward(&activation)?;
        Ok((activation, probs))
    }
}

fn hwc_to_nchw(input: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = input.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ci, y, x)| input[[y, x, ci]])
}

fn nchw_to_hwc(activation: &ArrayD<f32>) -> Result<Array3<f32>, ModelError> {
    if activation.ndim() != 4 || activation.shape()[0] != 1 {
        return Err(ModelError::Backend(format!(
            "expected activation shape [1, C, H, W], got {:?}",
            activation.shape()
        )));
    }
    let chw = activation.index_axis(Axis(0), 0);
    let hwc = chw.permuted_axes(vec![1, 2, 0]).to_owned();
    hwc.into_dimensionality::<Ix3>()
        .map_err(|e| ModelError::Backend(format!("activation layout: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::HeadOp;
    use crate::spec::HeadLayerSpec;
    use std::sync::Arc;

    /// Deterministic stand-in backbone: block-averages each input channel
    /// into a 4x4 grid, with a per-channel offset so channels differ.
    struct BlockPoolBackbone {
        channels: usize,
    }

    impl Backbone for BlockPoolBackbone {
        fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
            let shape = input.shape();
            let (c_in, h, w) = (shape[1], shape[2], shape[3]);
            let (gh, gw) = (4usize, 4usize);
            let (bh, bw) = (h / gh, w / gw);
            let mut out = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, self.channels, gh, gw]));
            for c in 0..self.channels {
                for gy in 0..gh {
                    for gx in 0..gw {
                        let mut sum = 0.0f32;
                        for y in gy * bh..(gy + 1) * bh {
                            for x in gx * bw..(gx + 1) * bw {
                                sum += input[[0, c % c_in, y, x]];
                            }
                        }
                        out[[0, c, gy, gx]] = sum / (bh * bw) as f32 + c as f32 * 0.05;
                    }
                }
            }
            Ok(out)
        }
    }

    fn test_spec(labels: Vec<String>) -> ModelSpec {
        ModelSpec {
            name: "test-classifier".into(),
            task: TaskKind::SingleLabel,
            input_width: 32,
            input_height: 32,
            preprocessing: Preprocessing::Rescale,
            backbone: "unused.onnx".into(),
            activation_layer: "top_conv".into(),
            head: vec![HeadLayerSpec::Softmax],
            labels,
            threshold: 0.5,
        }
    }

    fn test_head(outputs: usize) -> Head {
        let w = ndarray::Array2::from_shape_fn((outputs, 3), |(o, i)| {
            ((o * 7 + i * 3) % 5) as f32 * 0.1 - 0.2
        });
        Head::new(vec![
            HeadOp::Relu,
            HeadOp::GlobalAvgPool,
            HeadOp::Dense {
                weights: Arc::new(w),
                bias: ndarray::Array1::zeros(outputs),
            },
            HeadOp::Softmax,
        ])
    }

    fn test_model() -> ClassifierModel {
        let labels = vec!["glioma".into(), "meningioma".into(), "notumor".into(), "pituitary".into()];
        ClassifierModel::from_parts(
            test_spec(labels),
            test_head(4),
            Box::new(BlockPoolBackbone { channels: 3 }),
        )
        .unwrap()
    }

    fn test_input() -> Array3<f32> {
        Array3::from_shape_fn((32, 32, 3), |(y, x, c)| {
            ((y * 31 + x * 17 + c * 7) % 11) as f32 * 0.1 - 0.5
        })
    }

    #[test]
    fn test_classify_produces_distribution_over_labels() {
        let model = test_model();
        let probs = model.classify(&test_input()).unwrap();
        assert_eq!(probs.len(), model.labels().len());
        assert!((probs.sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_forward_with_intermediate_shapes() {
        let model = test_model();
        let (activation, probs) = model.forward_with_intermediate(&test_input()).unwrap();
        assert_eq!(activation.dim(), (4, 4, 3));
        assert_eq!(probs.len(), 4);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let model = test_model();
        let a = model.classify(&test_input()).unwrap();
        let b = model.classify(&test_input()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_input_resolution_is_rejected() {
        let model = test_model();
        let wrong = Array3::<f32>::zeros((16, 16, 3));
        assert!(matches!(
            model.classify(&wrong),
            Err(ModelError::HeadShape(_))
        ));
    }

    #[test]
    fn test_startup_dry_run_catches_label_mismatch() {
        // Head produces 4 outputs but only 2 labels are declared.
        let labels = vec!["glioma".into(), "notumor".into()];
        let result = ClassifierModel::from_parts(
            test_spec(labels),
            test_head(4),
            Box::new(BlockPoolBackbone { channels: 3 }),
        );
        assert!(matches!(result, Err(ModelError::HeadShape(_))));
    }

    #[test]
    fn test_startup_dry_run_catches_head_backbone_mismatch() {
        // Backbone emits 8 channels, dense expects 3.
        let labels = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let result = ClassifierModel::from_parts(
            test_spec(labels),
            test_head(4),
            Box::new(BlockPoolBackbone { channels: 8 }),
        );
        assert!(matches!(result, Err(ModelError::HeadShape(_))));
    }

    #[test]
    fn test_nchw_round_trip_layout() {
        let input = test_input();
        let nchw = hwc_to_nchw(&input);
        assert_eq!(nchw.dim(), (1, 3, 32, 32));
        assert_eq!(nchw[[0, 2, 5, 7]], input[[5, 7, 2]]);
        let back = nchw_to_hwc(&nchw.into_dyn()).unwrap();
        assert_eq!(back, input);
    }
}
