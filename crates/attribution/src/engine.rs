use crate::error::AttributionError;
use crate::gradcam::{grad_cam, grad_cam_pp};
use crate::tta::{fliplr, fliplr_hwc, rot90, rot90_hwc};
use common::span;
use model::ClassifierModel;
use ndarray::{Array2, Array3};
use std::sync::Arc;

/// Saliency engine bound to one classifier.
///
/// Construction runs the full gradient pipeline once on a zero image, so a
/// head the tape cannot differentiate is a startup failure rather than a
/// per-request one.
pub struct AttributionEngine {
    model: Arc<ClassifierModel>,
    flip: bool,
}

impl AttributionEngine {
    pub fn new(model: Arc<ClassifierModel>) -> Result<Self, AttributionError> {
        Self::with_options(model, true)
    }

    /// `flip` controls whether test-time augmentation mirrors each rotated
    /// variant as well, doubling the ensemble from 4 to 8 passes.
    pub fn with_options(
        model: Arc<ClassifierModel>,
        flip: bool,
    ) -> Result<Self, AttributionError> {
        let engine = Self { model, flip };
        let (w, h) = engine.model.input_size();
        let zeros = Array3::<f32>::zeros((h as usize, w as usize, 3));
        let (activation, _) = engine.model.forward_with_intermediate(&zeros)?;
        grad_cam_pp(engine.model.head(), &activation, 0)?;
        tracing::info!(
            model = %engine.model.name(),
            flip,
            "Attribution engine validated"
        );
        Ok(engine)
    }

    pub fn model(&self) -> &Arc<ClassifierModel> {
        &self.model
    }

    /// Grad-CAM++ heatmap averaged over the test-time augmentation ensemble,
    /// resized to the model's input resolution. Values lie in [0, 1].
    pub fn heatmap_tta(
        &self,
        input: &Array3<f32>,
        class: usize,
    ) -> Result<Array2<f32>, AttributionError> {
        let _s = span!("heatmap_tta");

        let mut maps: Vec<Array2<f32>> = Vec::with_capacity(if self.flip { 8 } else { 4 });
        for k in 0..4usize {
            let rotated = rot90_hwc(input, k);
            let map = self.single_heatmap(&rotated, class)?;
            maps.push(rot90(&map, 4 - k));
            if self.flip {
                let mirrored = fliplr_hwc(&rotated);
                let map = self.single_heatmap(&mirrored, class)?;
                maps.push(fliplr(&rot90(&map, 4 - k)));
            }
        }

        let dim = maps[0].dim();
        let mut avg = Array2::<f32>::zeros(dim);
        for map in &maps {
            avg += map;
        }
        avg.mapv_inplace(|v| (v / maps.len() as f32).max(0.0));
        let max = avg.iter().copied().fold(0.0f32, f32::max);
        avg.mapv_inplace(|v| v / (max + 1e-8));

        let (w, h) = self.model.input_size();
        Ok(overlay::resize_heatmap(&avg, w, h)?)
    }

    /// First-order Grad-CAM heatmap for one label, resized to the model's
    /// input resolution and normalized there.
    pub fn heatmap_label(
        &self,
        input: &Array3<f32>,
        label_idx: usize,
    ) -> Result<Array2<f32>, AttributionError> {
        let _s = span!("heatmap_label");

        let (activation, _) = self.model.forward_with_intermediate(input)?;
        let map = grad_cam(self.model.head(), &activation, label_idx)?;
        let (w, h) = self.model.input_size();
        let mut map = overlay::resize_heatmap(&map, w, h)?;
        let max = map.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            map.mapv_inplace(|v| v / (max + 1e-12));
        }
        Ok(map)
    }

    fn single_heatmap(
        &self,
        input: &Array3<f32>,
        class: usize,
    ) -> Result<Array2<f32>, AttributionError> {
        let (activation, _) = self.model.forward_with_intermediate(input)?;
        grad_cam_pp(self.model.head(), &activation, class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Backbone, Head, HeadLayerSpec, HeadOp, ModelError, ModelSpec, Preprocessing, TaskKind};
    use ndarray::{Array1, Array2 as A2, ArrayD};

    /// Block-averaging stand-in backbone: 16x16x3 input to 4x4xC activation.
    struct PoolBackbone {
        channels: usize,
    }

    impl Backbone for PoolBackbone {
        fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
            let shape = input.shape();
            let (c_in, h, w) = (shape[1], shape[2], shape[3]);
            let (bh, bw) = (h / 4, w / 4);
            let mut out = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, self.channels, 4, 4]));
            for c in 0..self.channels {
                for gy in 0..4 {
                    for gx in 0..4 {
                        let mut sum = 0.0f32;
                        for y in gy * bh..(gy + 1) * bh {
                            for x in gx * bw..(gx + 1) * bw {
                                sum += input[[0, c % c_in, y, x]];
                            }
                        }
                        out[[0, c, gy, gx]] = sum / (bh * bw) as f32 + c as f32 * 0.1;
                    }
                }
            }
            Ok(out)
        }
    }

    fn test_model(task: TaskKind, labels: usize) -> Arc<ClassifierModel> {
        let names = (0..labels).map(|i| format!("label{}", i)).collect();
        let tail = match task {
            TaskKind::SingleLabel => HeadLayerSpec::Softmax,
            TaskKind::MultiLabel => HeadLayerSpec::Sigmoid,
        };
        let spec = ModelSpec {
            name: "test".into(),
            task,
            input_width: 16,
            input_height: 16,
            preprocessing: Preprocessing::Rescale,
            backbone: "unused.onnx".into(),
            activation_layer: "top_conv".into(),
            head: vec![tail],
            labels: names,
            threshold: 0.5,
        };
        let w = A2::from_shape_fn((labels, 3), |(o, i)| {
            ((o * 7 + i * 3) % 5) as f32 * 0.1 - 0.2
        });
        let tail_op = match task {
            TaskKind::SingleLabel => HeadOp::Softmax,
            TaskKind::MultiLabel => HeadOp::Sigmoid,
        };
        let head = Head::new(vec![
            HeadOp::Relu,
            HeadOp::GlobalAvgPool,
            HeadOp::Dense {
                weights: std::sync::Arc::new(w),
                bias: Array1::zeros(labels),
            },
            tail_op,
        ]);
        Arc::new(
            ClassifierModel::from_parts(spec, head, Box::new(PoolBackbone { channels: 3 }))
                .unwrap(),
        )
    }

    fn test_input() -> Array3<f32> {
        Array3::from_shape_fn((16, 16, 3), |(y, x, c)| {
            ((y * 5 + x * 11 + c * 3) % 13) as f32 * 0.15 - 0.8
        })
    }

    #[test]
    fn test_tta_heatmap_is_normalized_at_input_resolution() {
        let engine = AttributionEngine::new(test_model(TaskKind::SingleLabel, 4)).unwrap();
        let map = engine.heatmap_tta(&test_input(), 1).unwrap();
        assert_eq!(map.dim(), (16, 16));
        assert!(map.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_tta_is_rotation_equivariant_without_flip() {
        let engine =
            AttributionEngine::with_options(test_model(TaskKind::SingleLabel, 4), false).unwrap();
        let input = test_input();
        let direct = engine.heatmap_tta(&input, 0).unwrap();
        let of_rotated = engine.heatmap_tta(&rot90_hwc(&input, 1), 0).unwrap();
        let rotated_direct = rot90(&direct, 1);
        for (a, b) in of_rotated.iter().zip(rotated_direct.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_out_of_range_class_propagates() {
        let engine = AttributionEngine::new(test_model(TaskKind::SingleLabel, 4)).unwrap();
        assert!(matches!(
            engine.heatmap_tta(&test_input(), 7),
            Err(AttributionError::ClassOutOfRange { .. })
        ));
    }

    #[test]
    fn test_label_heatmap_shape_and_range() {
        let engine = AttributionEngine::new(test_model(TaskKind::MultiLabel, 14)).unwrap();
        let map = engine.heatmap_label(&test_input(), 5).unwrap();
        assert_eq!(map.dim(), (16, 16));
        assert!(map.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
