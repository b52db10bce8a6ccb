use crate::data::dataset::VolumeDataset;
use crate::error::{Error, Result};
use crate::metrics::accuracy::{AccuracyKernel, ClassAccuracy, DiceAccuracy};
use crate::network::model::{Mode, SegmentationModel};
use crate::train::epoch_stats::ValidationSummary;

/// Dataset-level evaluation of a model on held-out data.
pub trait Evaluator {
    fn evaluate(&mut self, model: &mut dyn SegmentationModel, dataset: &dyn VolumeDataset) -> Result<ClassAccuracy>;
}

/// Runs the model in eval mode over every sample, one volume at a time, and
/// averages the per-organ accuracy of the stage-2 output.
///
/// The model's previous mode is restored afterwards.
#[derive(Debug, Clone, Default)]
pub struct DatasetEvaluator<K: AccuracyKernel = DiceAccuracy> {
    kernel: K,
}

impl<K: AccuracyKernel> DatasetEvaluator<K> {
    pub fn new(kernel: K) -> Self {
        DatasetEvaluator { kernel }
    }

    fn score_all(&self, model: &mut dyn SegmentationModel, dataset: &dyn VolumeDataset) -> Result<ClassAccuracy> {
        let mut sums: Vec<f64> = Vec::new();
        for i in 0..dataset.len() {
            let sample = dataset.get(i)?;
            let outputs = model.forward(std::slice::from_ref(&sample.volume))?;
            let acc = self.kernel.accuracy(&outputs.stage2, std::slice::from_ref(&sample.label))?;
            if sums.is_empty() {
                sums = vec![0.0; acc.per_class.len()];
            }
            for (s, a) in sums.iter_mut().zip(acc.per_class) {
                *s += a;
            }
        }
        let n = dataset.len() as f64;
        Ok(ClassAccuracy::from_per_class(sums.into_iter().map(|s| s / n).collect()))
    }
}

impl<K: AccuracyKernel> Evaluator for DatasetEvaluator<K> {
    fn evaluate(&mut self, model: &mut dyn SegmentationModel, dataset: &dyn VolumeDataset) -> Result<ClassAccuracy> {
        if dataset.is_empty() {
            return Err(Error::Config("validation dataset is empty".into()));
        }
        let previous = model.mode();
        model.set_mode(Mode::Eval);

        let result = self.score_all(model, dataset);

        model.set_mode(previous);
        result
    }
}

/// Decides which epochs run a held-out evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationGate {
    interval: usize,
}

impl ValidationGate {
    pub fn new(interval: usize) -> Result<Self> {
        if interval == 0 {
            return Err(Error::Config("validation_interval must be at least 1".into()));
        }
        Ok(ValidationGate { interval })
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    /// True for every epoch divisible by the interval, epoch 0 included.
    pub fn should_validate(&self, epoch: usize) -> bool {
        epoch % self.interval == 0
    }

    /// Runs `evaluator` when the gate fires for `epoch`.
    pub fn maybe_validate(
        &self,
        epoch: usize,
        model: &mut dyn SegmentationModel,
        evaluator: &mut dyn Evaluator,
        dataset: &dyn VolumeDataset,
    ) -> Result<Option<ValidationSummary>> {
        if !self.should_validate(epoch) {
            return Ok(None);
        }
        let acc = evaluator.evaluate(model, dataset)?;
        Ok(Some(ValidationSummary {
            epoch,
            per_class_accuracy: acc.per_class,
            mean_accuracy: acc.mean,
        }))
    }
}

/// Checks that one organ name exists for every organ class of the model.
pub fn check_organ_names(names: &[String], num_organs: usize) -> Result<()> {
    if names.len() != num_organs {
        return Err(Error::OrganMismatch { names: names.len(), classes: num_organs });
    }
    Ok(())
}

/// Pairs organ names with accuracies by position, stopping at the shorter list.
pub fn pair_organ_accuracy<'a>(names: &'a [String], values: &[f64]) -> Vec<(&'a str, f64)> {
    names.iter().map(String::as_str).zip(values.iter().copied()).collect()
}

/// `name:0.123 name:0.456 ...`
pub fn format_organ_accuracy(names: &[String], values: &[f64]) -> String {
    pair_organ_accuracy(names, values)
        .iter()
        .map(|(name, acc)| format!("{name}:{acc:.3}"))
        .collect::<Vec<_>>()
        .join(" ")
}
