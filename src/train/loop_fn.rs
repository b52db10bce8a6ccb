use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use log::{info, warn};

use crate::data::dataset::VolumeDataset;
use crate::data::loader::DataSource;
use crate::error::{Error, Result};
use crate::loss::StageLoss;
use crate::metrics::accuracy::AccuracyKernel;
use crate::network::model::{Mode, SegmentationModel};
use crate::optim::schedule::LrSchedule;
use crate::optim::Optimizer;
use crate::train::aggregator::RunningMean;
use crate::train::checkpoint::{resume_from, CheckpointPolicy};
use crate::train::epoch_stats::{EpochSummary, StepStats, TrainEvent, ValidationSummary};
use crate::train::scalars::ScalarSink;
use crate::train::train_config::TrainConfig;
use crate::train::validation::{check_organ_names, format_organ_accuracy, Evaluator, ValidationGate};

/// Optional links between a running loop and the rest of the process.
///
/// - `progress_tx` — receives `TrainEvent`s. If the receiver is dropped the
///                   loop stops after the current epoch.
/// - `stop_flag`   — when set to `true` from another thread the loop stops
///                   at the next epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct RunHooks {
    pub progress_tx: Option<mpsc::Sender<TrainEvent>>,
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl RunHooks {
    fn stop_requested(&self) -> bool {
        self.stop_flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Returns `false` once the receiver is gone.
    fn send(&self, event: TrainEvent) -> bool {
        match &self.progress_tx {
            Some(tx) => tx.send(event).is_ok(),
            None => true,
        }
    }
}

/// Everything a run drives. The loop is the only writer of `model` while it
/// runs; validation reads it between epochs.
pub struct TrainParts<'a> {
    pub data: &'a mut dyn DataSource,
    pub model: &'a mut dyn SegmentationModel,
    pub loss: &'a dyn StageLoss,
    pub accuracy: &'a dyn AccuracyKernel,
    pub optimizer: &'a mut dyn Optimizer,
    pub schedule: &'a mut dyn LrSchedule,
    pub evaluator: &'a mut dyn Evaluator,
    pub validation_data: &'a dyn VolumeDataset,
    pub checkpoints: &'a mut CheckpointPolicy,
    pub scalars: &'a mut dyn ScalarSink,
    pub hooks: RunHooks,
}

/// Summaries of the epochs that completed, plus the checkpoints still on disk.
#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub epochs: Vec<EpochSummary>,
    pub checkpoints: Vec<PathBuf>,
}

impl TrainReport {
    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Trains `parts.model` for `config.epochs` epochs.
///
/// Per step: zero gradients, run both stages, compute the stage loss and the
/// stage-2 accuracy on a detached copy of the prediction, backpropagate, step
/// the optimizer and the learning-rate schedule. A step whose loss is not
/// finite is logged and skipped entirely.
///
/// Per epoch: write `train/loss` and `train/accuracy` means to the scalar
/// sink, then let the validation gate and the checkpoint policy act on their
/// own intervals.
///
/// # Errors
/// Configuration problems are reported before the first step: an empty data
/// source, an empty validation set, organ names that do not match the model,
/// or an unreadable resume checkpoint. After that, errors from the model,
/// the kernels or the data source end the run.
///
/// # Early termination
/// The loop stops after the current epoch if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `hooks.stop_flag` is set to `true`.
pub fn train_loop(parts: TrainParts<'_>, config: &TrainConfig) -> Result<TrainReport> {
    let TrainParts {
        data,
        model,
        loss,
        accuracy,
        optimizer,
        schedule,
        evaluator,
        validation_data,
        checkpoints,
        scalars,
        hooks,
    } = parts;

    // ── Startup checks ────────────────────────────────────────────────────
    config.validate()?;
    if data.num_batches() == 0 {
        return Err(Error::EmptyDataSource);
    }
    if validation_data.is_empty() {
        return Err(Error::Config("validation dataset is empty".into()));
    }
    check_organ_names(&config.organ_names, model.num_classes().saturating_sub(1))?;
    let gate = ValidationGate::new(config.validation_interval)?;

    if let Some(path) = &config.resume_from {
        resume_from(path, model)?;
    }

    let start = Instant::now();
    let mut report = TrainReport::default();
    let mut loss_mean = RunningMean::new();
    let mut acc_mean = RunningMean::new();
    let mut stage1_mean = RunningMean::new();

    for epoch in 0..config.epochs {
        if hooks.stop_requested() {
            info!("stop requested; ending run before epoch {epoch}");
            break;
        }

        // ── One full pass over the training data ───────────────────────────
        model.set_mode(Mode::Train);
        loss_mean.reset();
        acc_mean.reset();
        stage1_mean.reset();
        let mut steps = 0;
        let mut skipped_steps = 0;
        let mut receiver_alive = true;

        for (step, batch) in data.epoch(epoch).enumerate() {
            let batch = batch?;
            steps += 1;

            model.zero_grad();
            let outputs = model.forward(&batch.volumes)?;
            let value = loss.loss(&outputs.stage1, &outputs.stage2, &batch.labels)?;

            if !value.value.is_finite() {
                warn!(
                    "epoch:{}, step:{}, loss is {}; skipping optimizer step",
                    epoch, step, value.value
                );
                skipped_steps += 1;
                continue;
            }

            let acc = accuracy.accuracy(&outputs.stage2.detached(), &batch.labels)?;
            loss_mean.accumulate(value.value);
            acc_mean.accumulate(acc.mean);
            if config.track_stage1_accuracy {
                let acc1 = accuracy.accuracy(&outputs.stage1.detached(), &batch.labels)?;
                stage1_mean.accumulate(acc1.mean);
            }

            model.backward(&value.grads)?;
            optimizer.step(&mut model.parameters())?;
            schedule.step(optimizer);

            if step % config.log_every == 0 {
                let elapsed_min = start.elapsed().as_secs_f64() / 60.0;
                info!(
                    "epoch:{}, step:{}, loss:{:.3}, accuracy:{:.3}, time:{:.3} min",
                    epoch, step, value.value, acc.mean, elapsed_min
                );
                receiver_alive &= hooks.send(TrainEvent::Step(StepStats {
                    epoch,
                    step,
                    loss: value.value,
                    accuracy: acc.mean,
                    learning_rate: optimizer.learning_rate(),
                    elapsed_min,
                }));
            }
        }

        // ── Epoch means ───────────────────────────────────────────────────
        let mean_loss = loss_mean.mean(epoch)?;
        let mean_accuracy = acc_mean.mean(epoch)?;
        scalars.add_scalar("train/loss", mean_loss, epoch)?;
        scalars.add_scalar("train/accuracy", mean_accuracy, epoch)?;
        let mean_stage1_accuracy = if config.track_stage1_accuracy {
            let m = stage1_mean.mean(epoch)?;
            scalars.add_scalar("train/stage1_accuracy", m, epoch)?;
            Some(m)
        } else {
            None
        };

        // ── Validation ────────────────────────────────────────────────────
        let validation = gate.maybe_validate(epoch, model, evaluator, validation_data)?;
        if let Some(v) = &validation {
            log_validation(epoch, mean_loss, mean_accuracy, v, &config.organ_names, &start);
            scalars.add_scalar("validation/accuracy", v.mean_accuracy, epoch)?;
            receiver_alive &= hooks.send(TrainEvent::Validation(v.clone()));
        }

        // ── Checkpoint ────────────────────────────────────────────────────
        let checkpoint = checkpoints.maybe_save(epoch, mean_loss, mean_accuracy, model)?;
        if let Some(path) = &checkpoint {
            report.checkpoints.push(path.clone());
            receiver_alive &= hooks.send(TrainEvent::Checkpoint(path.clone()));
        }

        // ── Emit progress ─────────────────────────────────────────────────
        let summary = EpochSummary {
            epoch,
            mean_loss,
            mean_accuracy,
            mean_stage1_accuracy,
            steps,
            skipped_steps,
            validation,
            checkpoint,
            elapsed_min: start.elapsed().as_secs_f64() / 60.0,
        };
        receiver_alive &= hooks.send(TrainEvent::Epoch(summary.clone()));
        report.epochs.push(summary);

        if !receiver_alive {
            info!("progress receiver dropped; ending run after epoch {epoch}");
            break;
        }
    }

    // Retention may have pruned earlier saves since they were reported.
    report.checkpoints.retain(|p| checkpoints.saved().iter().any(|s| &s.path == p));
    scalars.flush()?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn log_validation(
    epoch: usize,
    mean_loss: f64,
    mean_accuracy: f64,
    validation: &ValidationSummary,
    organ_names: &[String],
    start: &Instant,
) {
    info!("------------------------");
    info!(
        "epoch:{} - train loss:{:.3}, train accuracy:{:.3}, validation accuracy:{:.3}, time:{:.3} min",
        epoch,
        mean_loss,
        mean_accuracy,
        validation.mean_accuracy,
        start.elapsed().as_secs_f64() / 60.0
    );
    info!("{}", format_organ_accuracy(organ_names, &validation.per_class_accuracy));
    info!("------------------------");
}
