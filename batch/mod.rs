pub mod config;
pub mod io;
pub mod progress;
pub mod run;
pub use config::{ConfigError, Hemisphere, RunConfig, RunConfigFile};
pub use progress::{BatchProgressObserver, ConsoleBatchProgress, NoopBatchProgress};
pub use run::{BatchError, BatchReport, SubjectJob, SubjectOutcome, SubjectStatus, run_batch};
