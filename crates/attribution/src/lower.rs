use crate::error::AttributionError;
use autodiff::{NodeId, Tape};
use model::{Head, HeadOp};

/// Replay the classifier head as tape operations starting from the conv
/// activation leaf. The lowered graph computes the same probabilities as
/// `Head::forward` and is differentiable to any order.
pub fn lower_head(
    tape: &mut Tape,
    head: &Head,
    activation: NodeId,
) -> Result<NodeId, AttributionError> {
    let mut cur = activation;
    for op in head.ops() {
        cur = match op {
            HeadOp::Relu => tape.relu(cur),
            HeadOp::GlobalAvgPool => {
                let shape = tape.value(cur).shape().to_vec();
                if shape.len() != 3 {
                    return Err(AttributionError::Lower(format!(
                        "global_avg_pool expects a spatial feature, got shape {:?}",
                        shape
                    )));
                }
                let summed = tape.sum_spatial(cur);
                tape.scale(summed, 1.0 / (shape[0] * shape[1]) as f32)
            }
            HeadOp::Dense { weights, bias } => {
                if tape.value(cur).ndim() != 1 {
                    return Err(AttributionError::Lower(
                        "dense layer applied before global_avg_pool".into(),
                    ));
                }
                if weights.ncols() != tape.value(cur).len() {
                    return Err(AttributionError::Lower(format!(
                        "dense layer expects {} inputs, feature has {}",
                        weights.ncols(),
                        tape.value(cur).len()
                    )));
                }
                let wx = tape.matvec(weights.clone(), cur);
                let b = tape.leaf(bias.clone().into_dyn());
                tape.add(wx, b)
            }
            HeadOp::Softmax => {
                if tape.value(cur).ndim() != 1 {
                    return Err(AttributionError::Lower(
                        "softmax applied to a spatial feature".into(),
                    ));
                }
                tape.softmax(cur)
            }
            HeadOp::Sigmoid => tape.sigmoid(cur),
        };
    }
    Ok(cur)
}
