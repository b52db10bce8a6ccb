use crate::error::{Error, Result};
use crate::loss::{dice, LossValue, StageLoss};
use crate::network::model::StageGradients;
use crate::volume::{LabelVolume, Prediction};

/// Stage-weighted, class-weighted soft dice loss:
///   L = w₁ · D(stage1) + w₂ · D(stage2)
/// where D is the class-weighted mean of (1 − dice) over the organ classes.
#[derive(Debug, Clone)]
pub struct WgtDiceLoss {
    pub stage1_weight: f64,
    pub stage2_weight: f64,
    /// One weight per organ class (background excluded).
    pub class_weights: Vec<f64>,
}

impl WgtDiceLoss {
    pub fn new(stage1_weight: f64, stage2_weight: f64, class_weights: Vec<f64>) -> Result<Self> {
        if class_weights.is_empty() {
            return Err(Error::Config("dice loss needs at least one organ class".into()));
        }
        if class_weights.iter().any(|w| !w.is_finite() || *w < 0.0) || class_weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Config("class weights must be non-negative with a positive sum".into()));
        }
        if stage1_weight < 0.0 || stage2_weight < 0.0 {
            return Err(Error::Config("stage weights must be non-negative".into()));
        }
        Ok(WgtDiceLoss { stage1_weight, stage2_weight, class_weights })
    }

    /// Uniform class weights for `num_organs` organ classes.
    pub fn uniform(stage1_weight: f64, stage2_weight: f64, num_organs: usize) -> Result<Self> {
        WgtDiceLoss::new(stage1_weight, stage2_weight, vec![1.0; num_organs])
    }
}

impl StageLoss for WgtDiceLoss {
    fn loss(&self, stage1: &Prediction, stage2: &Prediction, labels: &[LabelVolume]) -> Result<LossValue> {
        let (l1, g1) = dice::stage_loss(stage1, labels, &self.class_weights, self.stage1_weight)?;
        let (l2, g2) = dice::stage_loss(stage2, labels, &self.class_weights, self.stage2_weight)?;
        Ok(LossValue {
            value: l1 + l2,
            grads: StageGradients { stage1: g1, stage2: g2 },
        })
    }
}
