use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::volume::{LabelVolume, Prediction};

/// Per-organ agreement, ordered by class index starting at class 1, plus its mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAccuracy {
    pub per_class: Vec<f64>,
    pub mean: f64,
}

impl ClassAccuracy {
    pub fn from_per_class(per_class: Vec<f64>) -> Self {
        let mean = if per_class.is_empty() {
            0.0
        } else {
            per_class.iter().sum::<f64>() / per_class.len() as f64
        };
        ClassAccuracy { per_class, mean }
    }
}

/// Scores a prediction against ground truth. Implementations only see host
/// copies of the prediction.
pub trait AccuracyKernel {
    fn accuracy(&self, prediction: &Prediction, labels: &[LabelVolume]) -> Result<ClassAccuracy>;
}

/// Hard dice per organ on the argmax segmentation, averaged over the batch.
///
/// An organ absent from both prediction and label scores 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceAccuracy;

impl DiceAccuracy {
    /// Dice of every organ class `1..num_classes` for one volume.
    pub fn organ_dice(predicted: &[u8], labels: &[u8], num_classes: usize) -> Vec<f64> {
        let mut intersection = vec![0usize; num_classes];
        let mut predicted_count = vec![0usize; num_classes];
        let mut label_count = vec![0usize; num_classes];
        for (&p, &l) in predicted.iter().zip(labels) {
            let (p, l) = (p as usize, l as usize);
            if p < num_classes {
                predicted_count[p] += 1;
            }
            if l < num_classes {
                label_count[l] += 1;
            }
            if p == l && p < num_classes {
                intersection[p] += 1;
            }
        }
        (1..num_classes)
            .map(|c| {
                let total = predicted_count[c] + label_count[c];
                if total == 0 {
                    1.0
                } else {
                    2.0 * intersection[c] as f64 / total as f64
                }
            })
            .collect()
    }
}

impl AccuracyKernel for DiceAccuracy {
    fn accuracy(&self, prediction: &Prediction, labels: &[LabelVolume]) -> Result<ClassAccuracy> {
        let num_classes = prediction.samples.first()
            .map(|s| s.num_classes())
            .ok_or_else(|| Error::Shape("accuracy requested for an empty prediction".into()))?;
        prediction.check_against(labels, num_classes)?;

        let mut sums = vec![0.0; num_classes - 1];
        for (sample, label) in prediction.samples.iter().zip(labels) {
            let dice = DiceAccuracy::organ_dice(&sample.argmax(), &label.labels, num_classes);
            for (s, d) in sums.iter_mut().zip(dice) {
                *s += d;
            }
        }
        let n = prediction.len() as f64;
        Ok(ClassAccuracy::from_per_class(sums.into_iter().map(|s| s / n).collect()))
    }
}
