use ndarray::Array1;

/// Labels whose probability meets the threshold, in label order.
///
/// The comparison is inclusive: a probability exactly at the threshold
/// counts as detected.
pub fn detect_labels<'a>(
    probs: &Array1<f32>,
    labels: &'a [String],
    threshold: f32,
) -> Vec<&'a str> {
    probs
        .iter()
        .zip(labels)
        .filter(|(p, _)| **p >= threshold)
        .map(|(_, label)| label.as_str())
        .collect()
}

/// Index and value of the highest-probability class, `None` for an empty
/// vector.
pub fn argmax(probs: &Array1<f32>) -> Option<(usize, f32)> {
    probs
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, &p)| (i, p))
}
