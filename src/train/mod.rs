pub mod aggregator;
pub mod checkpoint;
pub mod epoch_stats;
pub mod loop_fn;
pub mod scalars;
pub mod train_config;
pub mod validation;

pub use aggregator::RunningMean;
pub use checkpoint::{checkpoint_name, resume_from, Checkpoint, CheckpointPolicy, Retention, RetentionMetric, RetryPolicy};
pub use epoch_stats::{EpochSummary, StepStats, TrainEvent, ValidationSummary};
pub use loop_fn::{train_loop, RunHooks, TrainParts, TrainReport};
pub use scalars::{JsonlScalarWriter, MemoryScalars, ScalarSink};
pub use train_config::TrainConfig;
pub use validation::{DatasetEvaluator, Evaluator, ValidationGate};
