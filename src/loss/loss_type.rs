use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::loss::{AvgDiceLoss, StageLoss, WgtDiceLoss};

/// Selects which loss kernel the training loop uses.
///
/// - `WeightedDice` — stage- and class-weighted soft dice (`WgtDiceLoss`).
///   `class_weights` defaults to uniform over the organ classes.
/// - `AverageDice`  — unweighted mean over both stages (`AvgDiceLoss`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossType {
    WeightedDice {
        #[serde(default = "default_stage1_weight")]
        stage1_weight: f64,
        #[serde(default = "default_stage2_weight")]
        stage2_weight: f64,
        #[serde(default)]
        class_weights: Option<Vec<f64>>,
    },
    AverageDice,
}

fn default_stage1_weight() -> f64 {
    0.5
}

fn default_stage2_weight() -> f64 {
    1.0
}

impl Default for LossType {
    fn default() -> Self {
        LossType::WeightedDice {
            stage1_weight: default_stage1_weight(),
            stage2_weight: default_stage2_weight(),
            class_weights: None,
        }
    }
}

impl LossType {
    pub fn build(&self, num_organs: usize) -> Result<Box<dyn StageLoss>> {
        match self {
            LossType::WeightedDice { stage1_weight, stage2_weight, class_weights } => {
                let weights = match class_weights {
                    Some(w) if w.len() != num_organs => {
                        return Err(Error::Config(format!(
                            "{} class weights given for {} organ classes",
                            w.len(), num_organs
                        )));
                    }
                    Some(w) => w.clone(),
                    None => vec![1.0; num_organs],
                };
                Ok(Box::new(WgtDiceLoss::new(*stage1_weight, *stage2_weight, weights)?))
            }
            LossType::AverageDice => Ok(Box::new(AvgDiceLoss::new(num_organs)?)),
        }
    }
}
