//! ferrite-seg - train and evaluate the two-stage segmentation network.
//!
//! ```bash
//! # Train from a TOML config (every field is optional)
//! ferrite-seg train --config configs/train.toml
//!
//! # Resume from a checkpoint, overriding the epoch count
//! ferrite-seg train --config configs/train.toml --epochs 20 --resume module/net5-0.412-0.603.json
//!
//! # Smoke run on generated phantom volumes instead of the manifests
//! ferrite-seg train --synthetic 6
//!
//! # Per-organ validation accuracy of a checkpoint
//! ferrite-seg evaluate --config configs/train.toml --checkpoint module/net5-0.412-0.603.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use ferrite_seg::data::{phantom_dataset, DataLoader, InMemoryDataset, ManifestDataset, VolumeDataset};
use ferrite_seg::metrics::DiceAccuracy;
use ferrite_seg::network::TwoStageNet;
use ferrite_seg::train::validation::format_organ_accuracy;
use ferrite_seg::train::{
    resume_from, train_loop, CheckpointPolicy, DatasetEvaluator, Evaluator, JsonlScalarWriter, RunHooks,
    TrainConfig, TrainParts,
};
use ferrite_seg::volume::VolumeShape;

#[derive(Parser)]
#[command(name = "ferrite-seg", version, about = "Two-stage volumetric segmentation trainer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train the network
    Train {
        #[command(flatten)]
        common: CommonArgs,

        /// Override the configured epoch count
        #[arg(long)]
        epochs: Option<usize>,

        /// Load this checkpoint before the first step
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Override the scalar log directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Report per-organ validation accuracy of a checkpoint
    Evaluate {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        checkpoint: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// TOML run configuration; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use this many generated phantom volumes per split instead of the manifests
    #[arg(long)]
    synthetic: Option<usize>,
}

/// Volume size of generated phantoms.
const PHANTOM_SHAPE: VolumeShape = VolumeShape { depth: 8, height: 16, width: 16 };

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Train { common, epochs, resume, log_dir } => {
            let mut config = load_config(common.config.as_deref())?;
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if resume.is_some() {
                config.resume_from = resume;
            }
            if let Some(dir) = log_dir {
                config.log_dir = dir;
            }
            config.validate().context("invalid configuration")?;
            train(&config, common.synthetic)
        }
        Command::Evaluate { common, checkpoint } => {
            let config = load_config(common.config.as_deref())?;
            config.validate().context("invalid configuration")?;
            evaluate(&config, &checkpoint, common.synthetic)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TrainConfig> {
    match path {
        Some(path) => TrainConfig::load(path).with_context(|| format!("failed to read config {}", path.display())),
        None => Ok(TrainConfig::default()),
    }
}

/// Training and validation sets, either from the manifests or generated.
fn open_datasets(config: &TrainConfig, synthetic: Option<usize>) -> Result<(Box<dyn VolumeDataset>, Box<dyn VolumeDataset>)> {
    let classes = config.model.num_classes;
    if let Some(count) = synthetic {
        info!("using {count} phantom volumes of {:?} per split", PHANTOM_SHAPE);
        let train: InMemoryDataset = phantom_dataset(count, PHANTOM_SHAPE, classes, config.seed);
        let val: InMemoryDataset = phantom_dataset(count, PHANTOM_SHAPE, classes, config.seed.wrapping_add(1));
        return Ok((Box::new(train), Box::new(val)));
    }
    let train = ManifestDataset::open(&config.train_manifest, classes)
        .with_context(|| format!("failed to open {}", config.train_manifest.display()))?;
    let val = ManifestDataset::open(&config.val_manifest, classes)
        .with_context(|| format!("failed to open {}", config.val_manifest.display()))?;
    Ok((Box::new(train), Box::new(val)))
}

fn train(config: &TrainConfig, synthetic: Option<usize>) -> Result<()> {
    let (train_set, val_set) = open_datasets(config, synthetic)?;
    info!("train samples: {}, validation samples: {}", train_set.len(), val_set.len());

    let mut loader = DataLoader::new(train_set.as_ref(), config.loader.clone())?;
    let mut model = TwoStageNet::new(config.model.clone(), config.seed)?.with_parallel(config.data_parallel);
    let loss = config.loss.build(config.model.num_organs())?;
    let accuracy = DiceAccuracy;
    let mut optimizer = config.optimizer.build(config.learning_rate, config.weight_decay);
    let mut schedule = config.schedule.build(config.learning_rate);
    let mut evaluator = DatasetEvaluator::new(DiceAccuracy);
    let mut checkpoints = CheckpointPolicy::new(
        &config.checkpoint_dir,
        config.checkpoint_interval,
        config.retention.clone(),
        config.retry,
    )?;
    let mut scalars = JsonlScalarWriter::create(&config.log_dir)
        .with_context(|| format!("failed to open scalar log in {}", config.log_dir.display()))?;

    let parts = TrainParts {
        data: &mut loader,
        model: &mut model,
        loss: loss.as_ref(),
        accuracy: &accuracy,
        optimizer: optimizer.as_mut(),
        schedule: schedule.as_mut(),
        evaluator: &mut evaluator,
        validation_data: val_set.as_ref(),
        checkpoints: &mut checkpoints,
        scalars: &mut scalars,
        hooks: RunHooks::default(),
    };
    let report = train_loop(parts, config).context("training failed")?;

    if let Some(last) = report.last() {
        info!(
            "finished {} epochs: loss {:.3}, accuracy {:.3}, {} checkpoints, {:.3} min",
            report.epochs.len(),
            last.mean_loss,
            last.mean_accuracy,
            report.checkpoints.len(),
            last.elapsed_min
        );
    }
    info!("scalars written to {}", scalars.path().display());
    Ok(())
}

fn evaluate(config: &TrainConfig, checkpoint: &Path, synthetic: Option<usize>) -> Result<()> {
    let (_, val_set) = open_datasets(config, synthetic)?;
    let mut model = TwoStageNet::new(config.model.clone(), config.seed)?.with_parallel(config.data_parallel);
    resume_from(checkpoint, &mut model)?;

    let mut evaluator = DatasetEvaluator::new(DiceAccuracy);
    let acc = evaluator.evaluate(&mut model, val_set.as_ref())?;
    println!("validation accuracy: {:.3}", acc.mean);
    println!("{}", format_organ_accuracy(&config.organ_names, &acc.per_class));
    Ok(())
}
