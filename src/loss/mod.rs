pub mod dice;
pub mod wgt_dice;
pub mod avg_dice;
pub mod loss_type;

use crate::error::Result;
use crate::network::model::StageGradients;
use crate::volume::{LabelVolume, Prediction};

pub use wgt_dice::WgtDiceLoss;
pub use avg_dice::AvgDiceLoss;
pub use loss_type::LossType;

/// Scalar loss of a batch together with ∂loss/∂probability for both stages.
#[derive(Debug, Clone)]
pub struct LossValue {
    pub value: f64,
    pub grads: StageGradients,
}

/// Loss over both stage outputs of a two-stage model.
pub trait StageLoss {
    fn loss(&self, stage1: &Prediction, stage2: &Prediction, labels: &[LabelVolume]) -> Result<LossValue>;
}
