#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod estimate;
pub mod linalg;
pub mod spatial;
pub mod stats;
pub mod temporal;
pub mod threshold;

pub use estimate::{DualRegression, DualRegressionError, DualRegressionResult, FitDiagnostics, fit};

// Batch orchestration: config, matrix I/O and the per-subject executor.
#[path = "../batch/mod.rs"]
pub mod batch;
