pub mod accuracy;

pub use accuracy::{AccuracyKernel, ClassAccuracy, DiceAccuracy};
