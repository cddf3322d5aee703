use ndarray::{Array1, ArrayView2, Axis};
use serde::Serialize;

/// Result of averaging per-candidate class probabilities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftVote {
    pub class_index: usize,
    pub confidence: f32,
    pub mean_probabilities: Vec<f32>,
}

/// Mean probability per class across rows, then argmax. The first class wins
/// ties. Returns `None` for an empty batch.
pub fn soft_vote(probabilities: ArrayView2<f32>) -> Option<SoftVote> {
    if probabilities.nrows() == 0 || probabilities.ncols() == 0 {
        return None;
    }
    let mean: Array1<f32> = probabilities.mean_axis(Axis(0))?;

    let (class_index, confidence) = mean.iter().copied().enumerate().fold(
        (0, f32::NEG_INFINITY),
        |(best_idx, best), (idx, p)| if p > best { (idx, p) } else { (best_idx, best) },
    );

    Some(SoftVote {
        class_index,
        confidence,
        mean_probabilities: mean.to_vec(),
    })
}

/// Most frequent label, for classifiers without probabilities. Ties go to the
/// label seen first.
pub fn majority_vote<T: PartialEq + Clone>(predictions: &[T]) -> Option<T> {
    let mut counts: Vec<(&T, usize)> = Vec::new();
    for pred in predictions {
        match counts.iter_mut().find(|(label, _)| *label == pred) {
            Some((_, count)) => *count += 1,
            None => counts.push((pred, 1)),
        }
    }

    let max_count = counts.iter().map(|(_, count)| *count).max()?;
    counts
        .into_iter()
        .find(|(_, count)| *count == max_count)
        .map(|(label, _)| label.clone())
}
