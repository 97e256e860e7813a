use crate::error::AttributionError;
use crate::lower::lower_head;
use autodiff::{NodeId, Tape};
use model::Head;
use ndarray::{Array2, Array3, ArrayD, Ix3};

fn as_spatial(value: &ArrayD<f32>) -> Result<Array3<f32>, AttributionError> {
    value
        .view()
        .into_dimensionality::<Ix3>()
        .map(|v| v.to_owned())
        .map_err(|e| AttributionError::Lower(format!("gradient layout: {}", e)))
}

fn class_score(
    tape: &mut Tape,
    head: &Head,
    activation: NodeId,
    class: usize,
) -> Result<NodeId, AttributionError> {
    let probs = lower_head(tape, head, activation)?;
    let classes = tape.value(probs).len();
    if class >= classes {
        return Err(AttributionError::ClassOutOfRange { class, classes });
    }
    Ok(tape.select(probs, class))
}

/// Grad-CAM++ saliency for one class, at the activation's spatial
/// resolution, normalized into [0, 1].
///
/// Uses first, second and third derivatives of the class score with respect
/// to the conv activation. Pixel weights alpha are `g2 / (2 g2 + g3 * A)`
/// with exactly-zero denominators replaced by one, then rectified; channel
/// weights are the spatial sum of `alpha * relu(g1)`.
pub fn grad_cam_pp(
    head: &Head,
    activation: &Array3<f32>,
    class: usize,
) -> Result<Array2<f32>, AttributionError> {
    let mut tape = Tape::new();
    let a = tape.leaf(activation.clone().into_dyn());
    let score = class_score(&mut tape, head, a, class)?;

    let g1 = tape.grad(score, a)?;
    let g2 = tape.grad(g1, a)?;
    let g3 = tape.grad(g2, a)?;

    let g1 = as_spatial(tape.value(g1))?;
    let g2 = as_spatial(tape.value(g2))?;
    let g3 = as_spatial(tape.value(g3))?;

    let (h, w, c) = activation.dim();
    let mut weights = vec![0.0f32; c];
    for i in 0..h {
        for j in 0..w {
            for k in 0..c {
                let denom = 2.0 * g2[[i, j, k]] + g3[[i, j, k]] * activation[[i, j, k]];
                let denom = if denom == 0.0 { 1.0 } else { denom };
                let alpha = (g2[[i, j, k]] / denom).max(0.0);
                weights[k] += alpha * g1[[i, j, k]].max(0.0);
            }
        }
    }

    let mut map = Array2::<f32>::zeros((h, w));
    for i in 0..h {
        for j in 0..w {
            let mut v = 0.0f32;
            for k in 0..c {
                v += activation[[i, j, k]].max(0.0) * weights[k];
            }
            map[[i, j]] = v.max(0.0);
        }
    }

    let max = map.iter().copied().fold(0.0f32, f32::max);
    map.mapv_inplace(|v| v / (max + 1e-8));
    Ok(map)
}

/// First-order Grad-CAM saliency for one class: channel weights are the
/// spatial mean of the gradient. Returns the rectified but UNNORMALIZED map
/// at the activation's resolution; callers normalize after resizing to the
/// display resolution.
pub fn grad_cam(
    head: &Head,
    activation: &Array3<f32>,
    class: usize,
) -> Result<Array2<f32>, AttributionError> {
    let mut tape = Tape::new();
    let a = tape.leaf(activation.clone().into_dyn());
    let score = class_score(&mut tape, head, a, class)?;
    let g1 = tape.grad(score, a)?;
    let g1 = as_spatial(tape.value(g1))?;

    let (h, w, c) = activation.dim();
    let spatial = (h * w) as f32;
    let mut weights = vec![0.0f32; c];
    for i in 0..h {
        for j in 0..w {
            for k in 0..c {
                weights[k] += g1[[i, j, k]] / spatial;
            }
        }
    }

    let mut map = Array2::<f32>::zeros((h, w));
    for i in 0..h {
        for j in 0..w {
            let mut v = 0.0f32;
            for k in 0..c {
                v += activation[[i, j, k]] * weights[k];
            }
            map[[i, j]] = v.max(0.0);
        }
    }
    Ok(map)
}
