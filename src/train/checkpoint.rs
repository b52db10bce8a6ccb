//! Checkpoint naming, writing, retention and resume.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::model::{Mode, ModelState, SegmentationModel};

/// Model snapshot plus the epoch/metric triple that names it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub mean_loss: f64,
    pub mean_accuracy: f64,
    pub state: ModelState,
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Checkpoint> {
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// `net<epoch>-<mean_loss:.3>-<mean_accuracy:.3>`
pub fn checkpoint_name(epoch: usize, mean_loss: f64, mean_accuracy: f64) -> String {
    format!("net{epoch}-{mean_loss:.3}-{mean_accuracy:.3}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMetric {
    /// Lower mean training loss is better.
    Loss,
    /// Higher mean training accuracy is better.
    Accuracy,
}

/// Which checkpoints stay on disk after a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Retention {
    /// Never delete anything.
    #[default]
    KeepAll,
    /// Keep the `count` most recent checkpoints.
    KeepLast { count: usize },
    /// Keep the `count` best checkpoints by `metric`.
    KeepBest { count: usize, metric: RetentionMetric },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubles after every failure.
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { attempts: 3, initial_backoff_ms: 200 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedCheckpoint {
    pub path: PathBuf,
    pub epoch: usize,
    pub mean_loss: f64,
    pub mean_accuracy: f64,
}

/// Writes a checkpoint every `interval` epochs into `dir`.
#[derive(Debug)]
pub struct CheckpointPolicy {
    dir: PathBuf,
    interval: usize,
    retention: Retention,
    retry: RetryPolicy,
    saved: Vec<SavedCheckpoint>,
}

impl CheckpointPolicy {
    pub fn new(dir: impl Into<PathBuf>, interval: usize, retention: Retention, retry: RetryPolicy) -> Result<Self> {
        if interval == 0 {
            return Err(Error::Config("checkpoint_interval must be at least 1".into()));
        }
        match retention {
            Retention::KeepLast { count: 0 } | Retention::KeepBest { count: 0, .. } => {
                return Err(Error::Config("retention count must be at least 1".into()));
            }
            _ => {}
        }
        Ok(CheckpointPolicy { dir: dir.into(), interval, retention, retry, saved: Vec::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoints written by this policy that are still on disk.
    pub fn saved(&self) -> &[SavedCheckpoint] {
        &self.saved
    }

    pub fn should_save(&self, epoch: usize) -> bool {
        epoch % self.interval == 0
    }

    pub fn checkpoint_path(&self, epoch: usize, mean_loss: f64, mean_accuracy: f64) -> PathBuf {
        self.dir.join(format!("{}.json", checkpoint_name(epoch, mean_loss, mean_accuracy)))
    }

    /// Writes a checkpoint when `epoch` is on the schedule, then applies retention.
    ///
    /// Returns the path only if the file is still on disk afterwards: a
    /// checkpoint that retention ranks out right away yields `None`.
    pub fn maybe_save(
        &mut self,
        epoch: usize,
        mean_loss: f64,
        mean_accuracy: f64,
        model: &dyn SegmentationModel,
    ) -> Result<Option<PathBuf>> {
        if !self.should_save(epoch) {
            return Ok(None);
        }

        let checkpoint = Checkpoint { epoch, mean_loss, mean_accuracy, state: model.state() };
        let bytes = serde_json::to_vec(&checkpoint)?;
        let path = self.checkpoint_path(epoch, mean_loss, mean_accuracy);
        write_with_retry(&path, &bytes, self.retry)?;
        info!("checkpoint saved to {:?}", path);

        self.saved.retain(|s| s.path != path);
        self.saved.push(SavedCheckpoint { path: path.clone(), epoch, mean_loss, mean_accuracy });
        let evicted = self.apply_retention();
        if evicted.contains(&path) {
            info!("checkpoint {:?} ranked below the kept ones and was not retained", path);
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Prunes `saved` per the retention strategy; returns the evicted paths.
    fn apply_retention(&mut self) -> Vec<PathBuf> {
        let evicted: Vec<SavedCheckpoint> = match self.retention {
            Retention::KeepAll => return Vec::new(),
            Retention::KeepLast { count } => {
                let excess = self.saved.len().saturating_sub(count);
                self.saved.drain(..excess).collect()
            }
            Retention::KeepBest { count, metric } => {
                if self.saved.len() <= count {
                    return Vec::new();
                }
                // Best first; stable so that ties keep the earlier checkpoint.
                let mut ranked = std::mem::take(&mut self.saved);
                ranked.sort_by(|a, b| {
                    let (x, y) = match metric {
                        RetentionMetric::Loss => (a.mean_loss, b.mean_loss),
                        RetentionMetric::Accuracy => (b.mean_accuracy, a.mean_accuracy),
                    };
                    x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
                });
                let evicted = ranked.split_off(count);
                ranked.sort_by_key(|s| s.epoch);
                self.saved = ranked;
                evicted
            }
        };

        evicted
            .into_iter()
            .map(|old| {
                if let Err(e) = fs::remove_file(&old.path) {
                    warn!("failed to remove old checkpoint {:?}: {}", old.path, e);
                } else {
                    info!("removed old checkpoint {:?}", old.path);
                }
                old.path
            })
            .collect()
    }
}

/// Creates the parent directory and writes `bytes`, retrying both with backoff.
fn write_with_retry(path: &Path, bytes: &[u8], retry: RetryPolicy) -> Result<()> {
    let attempts = retry.attempts.max(1);
    let mut backoff = Duration::from_millis(retry.initial_backoff_ms);
    let mut attempt = 1;
    loop {
        let written = match path.parent() {
            Some(dir) => fs::create_dir_all(dir).and_then(|()| fs::write(path, bytes)),
            None => fs::write(path, bytes),
        };
        match written {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    "checkpoint write to {:?} failed (attempt {}/{}): {}; retrying in {:?}",
                    path, attempt, attempts, e, backoff
                );
                std::thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
            Err(source) => {
                return Err(Error::CheckpointWrite { path: path.to_path_buf(), attempts, source });
            }
        }
    }
}

/// Loads the checkpoint at `path` into `model` and switches it to train mode.
///
/// A missing or malformed file is reported as a configuration error.
pub fn resume_from(path: &Path, model: &mut dyn SegmentationModel) -> Result<Checkpoint> {
    let checkpoint = Checkpoint::load(path)
        .map_err(|e| Error::Config(format!("cannot resume from {:?}: {}", path, e)))?;
    model.load_state(&checkpoint.state)
        .map_err(|e| Error::Config(format!("checkpoint {:?} does not fit the model: {}", path, e)))?;
    model.set_mode(Mode::Train);
    info!(
        "resumed from {:?} (epoch {}, loss {:.3}, accuracy {:.3})",
        path, checkpoint.epoch, checkpoint.mean_loss, checkpoint.mean_accuracy
    );
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ModelSpec, TwoStageNet};

    fn net() -> TwoStageNet {
        let spec = ModelSpec { num_classes: 3, stage1_hidden: vec![2], stage2_hidden: vec![2], ..ModelSpec::default() };
        TwoStageNet::new(spec, 0).unwrap()
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy { attempts: 2, initial_backoff_ms: 0 }
    }

    #[test]
    fn name_is_deterministic_with_three_decimals() {
        assert_eq!(checkpoint_name(45, 0.71234, 0.6819), "net45-0.712-0.682");
        assert_eq!(checkpoint_name(0, 1.0, 0.0), "net0-1.000-0.000");
        assert_eq!(checkpoint_name(7, 0.5, 0.25), checkpoint_name(7, 0.5, 0.25));
    }

    #[test]
    fn saves_only_on_schedule_and_keeps_everything_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = CheckpointPolicy::new(dir.path(), 2, Retention::KeepAll, no_wait()).unwrap();
        let model = net();
        for epoch in 0..5 {
            policy.maybe_save(epoch, 1.0 / (epoch + 1) as f64, 0.1 * epoch as f64, &model).unwrap();
        }
        assert_eq!(policy.saved().len(), 3);
        assert!(dir.path().join("net4-0.200-0.400.json").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn keep_last_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy =
            CheckpointPolicy::new(dir.path(), 1, Retention::KeepLast { count: 2 }, no_wait()).unwrap();
        let model = net();
        for epoch in 0..4 {
            policy.maybe_save(epoch, 0.5, 0.5, &model).unwrap();
        }
        let epochs: Vec<usize> = policy.saved().iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![2, 3]);
        assert!(!dir.path().join("net0-0.500-0.500.json").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn keep_best_ranks_by_metric() {
        let dir = tempfile::tempdir().unwrap();
        let retention = Retention::KeepBest { count: 2, metric: RetentionMetric::Accuracy };
        let mut policy = CheckpointPolicy::new(dir.path(), 1, retention, no_wait()).unwrap();
        let model = net();
        for (epoch, acc) in [0.3, 0.9, 0.1, 0.6].into_iter().enumerate() {
            policy.maybe_save(epoch, 0.5, acc, &model).unwrap();
        }
        let epochs: Vec<usize> = policy.saved().iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![1, 3]);
    }

    #[test]
    fn keep_best_by_loss_keeps_lowest() {
        let dir = tempfile::tempdir().unwrap();
        let retention = Retention::KeepBest { count: 2, metric: RetentionMetric::Loss };
        let mut policy = CheckpointPolicy::new(dir.path(), 1, retention, no_wait()).unwrap();
        let model = net();
        let losses = [0.4, 0.2, 0.9, 0.1];
        for (epoch, loss) in losses.into_iter().enumerate() {
            policy.maybe_save(epoch, loss, 0.5, &model).unwrap();
        }
        let epochs: Vec<usize> = policy.saved().iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![1, 3]);
        for (epoch, loss) in losses.into_iter().enumerate() {
            let on_disk = policy.checkpoint_path(epoch, loss, 0.5).exists();
            assert_eq!(on_disk, epoch == 1 || epoch == 3, "epoch {epoch}");
        }
    }

    #[test]
    fn checkpoint_ranked_out_on_save_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let retention = Retention::KeepBest { count: 1, metric: RetentionMetric::Accuracy };
        let mut policy = CheckpointPolicy::new(dir.path(), 1, retention, no_wait()).unwrap();
        let model = net();

        let best = policy.maybe_save(0, 0.5, 0.9, &model).unwrap().unwrap();
        let worse = policy.maybe_save(1, 0.5, 0.1, &model).unwrap();
        assert_eq!(worse, None);
        assert!(best.exists());
        assert!(!policy.checkpoint_path(1, 0.5, 0.1).exists());
        assert_eq!(policy.saved().len(), 1);

        let better = policy.maybe_save(2, 0.5, 0.95, &model).unwrap().unwrap();
        assert!(better.exists());
        assert!(!best.exists());
    }

    #[test]
    fn missing_checkpoint_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("runs").join("module");
        let mut policy = CheckpointPolicy::new(&nested, 1, Retention::KeepAll, no_wait()).unwrap();
        let path = policy.maybe_save(0, 0.5, 0.5, &net()).unwrap().unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[test]
    fn uncreatable_checkpoint_dir_is_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"x").unwrap();
        let mut policy =
            CheckpointPolicy::new(blocked.join("module"), 1, Retention::KeepAll, no_wait()).unwrap();
        let err = policy.maybe_save(0, 0.5, 0.5, &net()).unwrap_err();
        assert!(matches!(err, Error::CheckpointWrite { attempts: 2, .. }));
    }

    #[test]
    fn failed_writes_surface_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the checkpoint directory should be.
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"x").unwrap();
        let err = write_with_retry(&blocked.join("net0.json"), b"{}", no_wait()).unwrap_err();
        assert!(matches!(err, Error::CheckpointWrite { attempts: 2, .. }));
    }

    #[test]
    fn resume_restores_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = CheckpointPolicy::new(dir.path(), 1, Retention::KeepAll, no_wait()).unwrap();
        let model = net();
        let path = policy.maybe_save(0, 0.25, 0.75, &model).unwrap().unwrap();

        let spec = ModelSpec { num_classes: 3, stage1_hidden: vec![2], stage2_hidden: vec![2], ..ModelSpec::default() };
        let mut other = TwoStageNet::new(spec, 123).unwrap();
        other.set_mode(Mode::Eval);
        let ckpt = resume_from(&path, &mut other).unwrap();
        assert_eq!(ckpt.epoch, 0);
        assert_eq!(other.state(), model.state());
        assert_eq!(other.mode(), Mode::Train);
    }

    #[test]
    fn resume_from_missing_file_is_a_config_error() {
        let mut model = net();
        let err = resume_from(Path::new("/nonexistent/net0-0.000-0.000.json"), &mut model).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
