use crate::error::Result;
use crate::loss::{LossValue, StageLoss, WgtDiceLoss};
use crate::volume::{LabelVolume, Prediction};

/// Mean of the two stages' unweighted soft dice losses.
#[derive(Debug, Clone)]
pub struct AvgDiceLoss {
    inner: WgtDiceLoss,
}

impl AvgDiceLoss {
    pub fn new(num_organs: usize) -> Result<Self> {
        Ok(AvgDiceLoss { inner: WgtDiceLoss::uniform(0.5, 0.5, num_organs)? })
    }
}

impl StageLoss for AvgDiceLoss {
    fn loss(&self, stage1: &Prediction, stage2: &Prediction, labels: &[LabelVolume]) -> Result<LossValue> {
        self.inner.loss(stage1, stage2, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::matrix::Matrix;
    use crate::volume::{ClassProbabilities, VolumeShape};

    #[test]
    fn average_lies_between_stage_losses() {
        let shape = VolumeShape::new(1, 1, 2);
        let label = LabelVolume::new(shape, vec![1, 0]).unwrap();
        let good = Prediction {
            samples: vec![ClassProbabilities {
                shape,
                probs: Matrix::from_data(vec![vec![0.0, 1.0], vec![1.0, 0.0]]),
            }],
        };
        let bad = Prediction {
            samples: vec![ClassProbabilities {
                shape,
                probs: Matrix::from_data(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
            }],
        };
        let loss = AvgDiceLoss::new(1).unwrap();
        let value = loss.loss(&good, &bad, std::slice::from_ref(&label)).unwrap().value;
        assert!(value > 0.4 && value < 0.6, "{value}");
    }
}
