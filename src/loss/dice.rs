use crate::error::Result;
use crate::math::matrix::Matrix;
use crate::volume::{LabelVolume, Prediction};

/// Smoothing term added to numerator and denominator; keeps empty classes at dice ≈ 1.
const SMOOTH: f64 = 1e-5;

/// Soft dice of `class` for one sample and its gradient w.r.t. that class's probabilities.
///
///   d = (2·Σ p·g + s) / (Σ p² + Σ g² + s)
pub fn soft_dice(probs: &Matrix, labels: &[u8], class: usize) -> (f64, Vec<f64>) {
    let mut intersection = 0.0;
    let mut union = 0.0;
    for (row, &label) in probs.data.iter().zip(labels) {
        let p = row[class];
        let g = if label as usize == class { 1.0 } else { 0.0 };
        intersection += p * g;
        union += p * p + g;
    }
    let num = 2.0 * intersection + SMOOTH;
    let den = union + SMOOTH;
    let dice = num / den;

    let grad = probs.data.iter().zip(labels)
        .map(|(row, &label)| {
            let p = row[class];
            let g = if label as usize == class { 1.0 } else { 0.0 };
            (2.0 * g * den - num * 2.0 * p) / (den * den)
        })
        .collect();
    (dice, grad)
}

/// Class-weighted dice loss of one stage, averaged over the batch.
///
/// Organ classes `1..C` take part; background is ignored. Returns the loss and
/// one gradient matrix per sample, already scaled by `scale / batch`.
pub fn stage_loss(
    prediction: &Prediction,
    labels: &[LabelVolume],
    class_weights: &[f64],
    scale: f64,
) -> Result<(f64, Vec<Matrix>)> {
    let num_classes = class_weights.len() + 1;
    prediction.check_against(labels, num_classes)?;

    let batch = prediction.len() as f64;
    let weight_sum: f64 = class_weights.iter().sum();
    let mut total = 0.0;
    let mut grads = Vec::with_capacity(prediction.len());

    for (sample, label) in prediction.samples.iter().zip(labels) {
        let mut grad = Matrix::zeros(sample.probs.rows, sample.probs.cols);
        let mut sample_loss = 0.0;
        for (organ, &w) in class_weights.iter().enumerate() {
            let class = organ + 1;
            let (dice, d_dice) = soft_dice(&sample.probs, &label.labels, class);
            sample_loss += w * (1.0 - dice);
            let factor = -w / weight_sum * scale / batch;
            for (row, d) in grad.data.iter_mut().zip(d_dice) {
                row[class] = factor * d;
            }
        }
        total += sample_loss / weight_sum;
        grads.push(grad);
    }
    Ok((scale * total / batch, grads))
}
