use std::cell::Cell;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use ferrite_seg::data::{phantom_dataset, DataLoader, InMemoryDataset, LoaderOptions, VolumeDataset};
use ferrite_seg::loss::{LossValue, StageLoss, WgtDiceLoss};
use ferrite_seg::metrics::DiceAccuracy;
use ferrite_seg::network::{ModelSpec, SegmentationModel, StageGradients, TwoStageNet};
use ferrite_seg::optim::{Adam, ScheduleKind};
use ferrite_seg::train::{
    train_loop, CheckpointPolicy, DatasetEvaluator, MemoryScalars, Retention, RetryPolicy, RunHooks, TrainConfig,
    TrainEvent, TrainParts, TrainReport,
};
use ferrite_seg::volume::{LabelVolume, Prediction, VolumeShape};
use ferrite_seg::{Error, Result};

const SHAPE: VolumeShape = VolumeShape { depth: 2, height: 4, width: 4 };

fn config(dir: &Path, epochs: usize) -> TrainConfig {
    let model = ModelSpec { num_classes: 3, stage1_hidden: vec![4], stage2_hidden: vec![4], ..ModelSpec::default() };
    TrainConfig {
        epochs,
        learning_rate: 1e-2,
        model,
        organ_names: vec!["liver".into(), "spleen".into()],
        loader: LoaderOptions { batch_size: 3, shuffle: true, num_workers: 0, pin_memory: false, seed: 3 },
        schedule: ScheduleKind::Constant,
        log_every: 1,
        checkpoint_dir: dir.join("module"),
        retry: RetryPolicy { attempts: 1, initial_backoff_ms: 0 },
        ..TrainConfig::default()
    }
}

fn net(config: &TrainConfig, seed: u64) -> TwoStageNet {
    TwoStageNet::new(config.model.clone(), seed).unwrap()
}

/// Runs `train_loop` over `train`/`val` with the crate's default kernels.
fn run(
    config: &TrainConfig,
    model: &mut TwoStageNet,
    train: &InMemoryDataset,
    val: &InMemoryDataset,
    loss: &dyn StageLoss,
    hooks: RunHooks,
) -> (Result<TrainReport>, MemoryScalars) {
    let mut loader = DataLoader::new(train, config.loader.clone()).unwrap();
    let mut optimizer = Adam::new(config.learning_rate, config.weight_decay);
    let mut schedule = config.schedule.build(config.learning_rate);
    let mut evaluator = DatasetEvaluator::new(DiceAccuracy);
    let mut checkpoints = CheckpointPolicy::new(
        &config.checkpoint_dir,
        config.checkpoint_interval,
        config.retention.clone(),
        config.retry,
    )
    .unwrap();
    let mut scalars = MemoryScalars::default();
    let parts = TrainParts {
        data: &mut loader,
        model,
        loss,
        accuracy: &DiceAccuracy,
        optimizer: &mut optimizer,
        schedule: schedule.as_mut(),
        evaluator: &mut evaluator,
        validation_data: val,
        checkpoints: &mut checkpoints,
        scalars: &mut scalars,
        hooks,
    };
    let result = train_loop(parts, config);
    (result, scalars)
}

fn default_loss() -> WgtDiceLoss {
    WgtDiceLoss::uniform(0.5, 1.0, 2).unwrap()
}

fn with_channel() -> (RunHooks, mpsc::Receiver<TrainEvent>) {
    let (tx, rx) = mpsc::channel();
    (RunHooks { progress_tx: Some(tx), stop_flag: None }, rx)
}

#[test]
fn two_batches_one_epoch_emits_expected_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1);
    let train = phantom_dataset(6, SHAPE, 3, 1);
    let val = phantom_dataset(2, SHAPE, 3, 2);
    let mut model = net(&config, 0);
    let (hooks, rx) = with_channel();

    let (report, scalars) = run(&config, &mut model, &train, &val, &default_loss(), hooks);
    let report = report.unwrap();
    let events: Vec<TrainEvent> = rx.try_iter().collect();

    let count = |f: fn(&TrainEvent) -> bool| events.iter().filter(|e| f(e)).count();
    assert_eq!(count(|e| matches!(e, TrainEvent::Step(_))), 2);
    assert_eq!(count(|e| matches!(e, TrainEvent::Epoch(_))), 1);
    assert_eq!(count(|e| matches!(e, TrainEvent::Validation(_))), 1);
    assert_eq!(count(|e| matches!(e, TrainEvent::Checkpoint(_))), 1);

    let summary = &report.epochs[0];
    assert_eq!(summary.steps, 2);
    assert_eq!(summary.validation.as_ref().map(|v| v.per_class_accuracy.len()), Some(2));
    let path = summary.checkpoint.as_ref().unwrap();
    assert!(path.exists());
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        format!("net0-{:.3}-{:.3}.json", summary.mean_loss, summary.mean_accuracy)
    );

    assert_eq!(scalars.values("train/loss"), vec![summary.mean_loss]);
    assert_eq!(scalars.values("train/accuracy"), vec![summary.mean_accuracy]);
    assert_eq!(scalars.values("validation/accuracy").len(), 1);
}

#[test]
fn epoch_means_are_means_of_step_values() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig { validation_interval: 1, ..config(dir.path(), 2) };
    let train = phantom_dataset(7, SHAPE, 3, 4);
    let val = phantom_dataset(1, SHAPE, 3, 5);
    let mut model = net(&config, 1);
    let (hooks, rx) = with_channel();

    let (report, _) = run(&config, &mut model, &train, &val, &default_loss(), hooks);
    let report = report.unwrap();
    let events: Vec<TrainEvent> = rx.try_iter().collect();

    for summary in &report.epochs {
        let steps: Vec<(f64, f64)> = events
            .iter()
            .filter_map(|e| match e {
                TrainEvent::Step(s) if s.epoch == summary.epoch => Some((s.loss, s.accuracy)),
                _ => None,
            })
            .collect();
        assert_eq!(steps.len(), 3);
        let n = steps.len() as f64;
        let loss = steps.iter().map(|s| s.0).sum::<f64>() / n;
        let acc = steps.iter().map(|s| s.1).sum::<f64>() / n;
        assert!((summary.mean_loss - loss).abs() < 1e-12);
        assert!((summary.mean_accuracy - acc).abs() < 1e-12);
        assert!(summary.validation.is_some());
    }
    // Checkpoints stay on their own interval of 5.
    assert_eq!(report.checkpoints.len(), 1);
}

#[test]
fn resumed_model_reproduces_saved_forward_pass() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1);
    let train = phantom_dataset(3, SHAPE, 3, 6);
    let val = phantom_dataset(1, SHAPE, 3, 7);
    let mut trained = net(&config, 2);
    let (report, _) = run(&config, &mut trained, &train, &val, &default_loss(), RunHooks::default());
    let checkpoint = report.unwrap().checkpoints[0].clone();

    let resume_config = TrainConfig { epochs: 0, resume_from: Some(checkpoint), ..config.clone() };
    let mut resumed = net(&config, 99);
    let (report, _) = run(&resume_config, &mut resumed, &train, &val, &default_loss(), RunHooks::default());
    assert!(report.unwrap().epochs.is_empty());

    let volume = [val.get(0).unwrap().volume];
    let expected = trained.forward(&volume).unwrap();
    let actual = resumed.forward(&volume).unwrap();
    assert_eq!(expected, actual);
}

#[test]
fn stop_flag_and_dropped_receiver_end_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 3);
    let train = phantom_dataset(3, SHAPE, 3, 8);
    let val = phantom_dataset(1, SHAPE, 3, 9);

    let stopped = RunHooks { progress_tx: None, stop_flag: Some(Arc::new(AtomicBool::new(true))) };
    let (report, _) = run(&config, &mut net(&config, 0), &train, &val, &default_loss(), stopped);
    assert!(report.unwrap().epochs.is_empty());

    let (hooks, rx) = with_channel();
    drop(rx);
    let (report, _) = run(&config, &mut net(&config, 0), &train, &val, &default_loss(), hooks);
    assert_eq!(report.unwrap().epochs.len(), 1);
}

#[test]
fn configuration_problems_fail_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1);
    let train = phantom_dataset(3, SHAPE, 3, 10);
    let val = phantom_dataset(1, SHAPE, 3, 11);
    let empty = InMemoryDataset::default();

    let (report, _) = run(&config, &mut net(&config, 0), &empty, &val, &default_loss(), RunHooks::default());
    assert!(matches!(report, Err(Error::EmptyDataSource)));

    let (report, _) = run(&config, &mut net(&config, 0), &train, &empty, &default_loss(), RunHooks::default());
    assert!(matches!(report, Err(Error::Config(_))));

    let mismatched = TrainConfig { organ_names: vec!["liver".into()], ..config.clone() };
    let (report, _) = run(&mismatched, &mut net(&config, 0), &train, &val, &default_loss(), RunHooks::default());
    assert!(matches!(report, Err(Error::OrganMismatch { names: 1, classes: 2 })));

    let missing = TrainConfig { resume_from: Some(dir.path().join("nope.json")), ..config.clone() };
    let (report, _) = run(&missing, &mut net(&config, 0), &train, &val, &default_loss(), RunHooks::default());
    assert!(matches!(report, Err(Error::Config(_))));
}

/// Returns NaN for the first call, then defers to the weighted dice loss.
struct NanOnce {
    inner: WgtDiceLoss,
    calls: Cell<usize>,
}

impl StageLoss for NanOnce {
    fn loss(&self, stage1: &Prediction, stage2: &Prediction, labels: &[LabelVolume]) -> Result<LossValue> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call == 0 {
            return Ok(LossValue { value: f64::NAN, grads: StageGradients::default() });
        }
        self.inner.loss(stage1, stage2, labels)
    }
}

#[test]
fn non_finite_loss_skips_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1);
    let train = phantom_dataset(6, SHAPE, 3, 12);
    let val = phantom_dataset(1, SHAPE, 3, 13);
    let loss = NanOnce { inner: default_loss(), calls: Cell::new(0) };
    let (hooks, rx) = with_channel();

    let (report, _) = run(&config, &mut net(&config, 0), &train, &val, &loss, hooks);
    let report = report.unwrap();
    let summary = &report.epochs[0];
    assert_eq!(summary.steps, 2);
    assert_eq!(summary.skipped_steps, 1);

    let logged: Vec<f64> = rx
        .try_iter()
        .filter_map(|e| match e {
            TrainEvent::Step(s) => Some(s.loss),
            _ => None,
        })
        .collect();
    assert_eq!(logged, vec![summary.mean_loss]);
}

#[test]
fn stage1_accuracy_is_tracked_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig { track_stage1_accuracy: true, ..config(dir.path(), 2) };
    let train = phantom_dataset(6, SHAPE, 3, 14);
    let val = phantom_dataset(1, SHAPE, 3, 15);

    let (report, scalars) = run(&config, &mut net(&config, 3), &train, &val, &default_loss(), RunHooks::default());
    let report = report.unwrap();
    assert_eq!(report.epochs.len(), 2);

    let tracked: Vec<f64> = report
        .epochs
        .iter()
        .map(|s| s.mean_stage1_accuracy.expect("stage-1 accuracy is tracked"))
        .collect();
    assert!(tracked.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(scalars.values("train/stage1_accuracy"), tracked);
}

#[test]
fn stage1_accuracy_is_absent_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1);
    let train = phantom_dataset(3, SHAPE, 3, 16);
    let val = phantom_dataset(1, SHAPE, 3, 17);

    let (report, scalars) = run(&config, &mut net(&config, 3), &train, &val, &default_loss(), RunHooks::default());
    assert_eq!(report.unwrap().epochs[0].mean_stage1_accuracy, None);
    assert!(scalars.values("train/stage1_accuracy").is_empty());
}

#[test]
fn reported_checkpoints_are_the_ones_kept_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        checkpoint_interval: 1,
        retention: Retention::KeepLast { count: 1 },
        ..config(dir.path(), 3)
    };
    let train = phantom_dataset(3, SHAPE, 3, 18);
    let val = phantom_dataset(1, SHAPE, 3, 19);

    let (report, _) = run(&config, &mut net(&config, 0), &train, &val, &default_loss(), RunHooks::default());
    let report = report.unwrap();
    assert_eq!(report.checkpoints.len(), 1);
    assert!(report.checkpoints[0].exists());
    assert_eq!(report.last().unwrap().checkpoint.as_ref(), Some(&report.checkpoints[0]));
}
