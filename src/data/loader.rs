use log::debug;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::dataset::VolumeDataset;
use crate::error::{Error, Result};
use crate::volume::{Batch, Sample};

/// Yields the batches of one epoch, strictly one at a time and in order.
pub trait DataSource {
    /// Batches per epoch.
    fn num_batches(&self) -> usize;

    /// Starts epoch `epoch`, reshuffling if the source shuffles.
    fn epoch(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// Loader settings.
///
/// - `batch_size`  — samples per batch; the last batch may be smaller
/// - `shuffle`     — reshuffle sample order at the start of every epoch
/// - `num_workers` — threads loading the samples of a batch; `0` loads on the
///                   calling thread
/// - `pin_memory`  — page-locking hint for accelerator transfers; batches here
///                   are host-resident already, so it only shows up in logs
/// - `seed`        — seeds the shuffling RNG once per loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub num_workers: usize,
    pub pin_memory: bool,
    pub seed: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions { batch_size: 3, shuffle: true, num_workers: 2, pin_memory: true, seed: 0 }
    }
}

pub struct DataLoader<'a> {
    dataset: &'a dyn VolumeDataset,
    options: LoaderOptions,
    rng: StdRng,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a dyn VolumeDataset, options: LoaderOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        let pool = if options.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.num_workers)
                .thread_name(|i| format!("loader-{i}"))
                .build()
                .map_err(|e| Error::Config(format!("cannot start loader workers: {e}")))?;
            Some(pool)
        } else {
            None
        };
        debug!(
            "loader: {} samples, batch {}, {} workers, pin_memory {}",
            dataset.len(), options.batch_size, options.num_workers, options.pin_memory
        );
        Ok(DataLoader {
            dataset,
            rng: StdRng::seed_from_u64(options.seed),
            options,
            pool,
        })
    }

    /// Sample order for the next epoch. Advances the shuffling RNG.
    fn next_order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.options.shuffle {
            order.shuffle(&mut self.rng);
        }
        order
    }

    fn load_batch(&self, indices: &[usize]) -> Result<Batch> {
        let dataset = self.dataset;
        let samples: Result<Vec<Sample>> = match &self.pool {
            // `collect` on an indexed parallel iterator keeps input order.
            Some(pool) => pool.install(|| indices.par_iter().map(|&i| dataset.get(i)).collect()),
            None => indices.iter().map(|&i| dataset.get(i)).collect(),
        };
        Ok(Batch::from_samples(samples?))
    }
}

impl DataSource for DataLoader<'_> {
    fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.options.batch_size)
    }

    fn epoch(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let order = self.next_order();
        debug!("epoch {epoch}: order {:?}", order);
        let batch_size = self.options.batch_size;
        let this: &Self = self;
        Box::new((0..order.len()).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(order.len());
            this.load_batch(&order[start..end])
        }))
    }
}
