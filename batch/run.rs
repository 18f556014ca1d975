//! # Batch Execution
//!
//! One run fits every subject in the subject list against a single group
//! template. Subjects are independent work items: the template is loaded once
//! and shared read-only, and each worker owns its subject's matrices for the
//! duration of the job. A failing subject is recorded and never affects the
//! others; only problems with the shared inputs abort the run.

use crate::batch::config::RunConfig;
use crate::batch::io::{
    self, MatrixIoError, SpatialMetadata, component_column_names, load_matrix,
    time_point_column_names, write_matrix,
};
use crate::batch::progress::BatchProgressObserver;
use crate::estimate::{DualRegression, DualRegressionError, DualRegressionResult, FitDiagnostics};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("The {what} file '{}' does not exist.", path.display())]
    InputNotFound { what: &'static str, path: PathBuf },
    #[error("Failed to read subject list '{}': {source}", path.display())]
    SubjectList {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to load group components: {0}")]
    GroupComponents(#[source] MatrixIoError),
    #[error("Failed to create output directory '{}': {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid estimator configuration: {0}")]
    Estimator(#[from] DualRegressionError),
    #[error("Failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Failed to write run manifest: {0}")]
    Manifest(#[source] MatrixIoError),
    #[error("{failed} of {total} subjects failed; see the run manifest for details.")]
    SubjectsFailed { failed: usize, total: usize },
}

/// Errors confined to a single subject.
#[derive(Error, Debug)]
pub enum SubjectError {
    #[error("failed to load time series: {0}")]
    Load(#[source] MatrixIoError),
    #[error("dual regression failed: {0}")]
    Fit(#[from] DualRegressionError),
    #[error("failed to write output: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to write spatial metadata: {0}")]
    Metadata(#[source] MatrixIoError),
}

/// One subject's unit of work: where to read from and where to write to.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectJob {
    pub subject: String,
    pub input_path: PathBuf,
    pub spatial_path: PathBuf,
    pub spatial_metadata_path: PathBuf,
    pub time_series_path: PathBuf,
    pub structure: &'static str,
}

impl SubjectJob {
    pub fn new(config: &RunConfig, subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            input_path: config.subject_input_path(subject),
            spatial_path: config.spatial_output_path(subject),
            spatial_metadata_path: config.spatial_metadata_path(subject),
            time_series_path: config.time_series_output_path(subject),
            structure: config.hemisphere.structure(),
        }
    }

    /// Loads, fits and writes this subject.
    pub fn execute(
        &self,
        group_components: &Array2<f64>,
        estimator: &DualRegression,
    ) -> Result<FitDiagnostics, SubjectError> {
        let started = Instant::now();
        let subject_data = load_matrix(&self.input_path).map_err(SubjectError::Load)?;
        log::info!(
            "{}: loaded {} locations x {} time points",
            self.subject,
            subject_data.nrows(),
            subject_data.ncols()
        );

        let result = estimator.fit(group_components.view(), subject_data.view())?;
        // The subject's time series is no longer needed once the fit is done.
        drop(subject_data);

        self.write_outputs(&result)?;
        log::info!(
            "{}: finished in {:.2?} ({})",
            self.subject,
            started.elapsed(),
            match result.confidence_level {
                Some(alpha) => format!("thresholded at alpha={alpha}"),
                None => "raw betas".to_string(),
            }
        );
        Ok(result.diagnostics)
    }

    /// Writes all three outputs, or none of them.
    fn write_outputs(&self, result: &DualRegressionResult) -> Result<(), SubjectError> {
        let written = self.write_output_files(result);
        if written.is_err() {
            for path in [
                &self.spatial_path,
                &self.time_series_path,
                &self.spatial_metadata_path,
            ] {
                let _ = fs::remove_file(path);
            }
        }
        written
    }

    fn write_output_files(&self, result: &DualRegressionResult) -> Result<(), SubjectError> {
        let (n_locations, n_components) = result.spatial_components.dim();
        write_matrix(
            &self.spatial_path,
            result.spatial_components.view(),
            &component_column_names(n_components),
        )?;
        write_matrix(
            &self.time_series_path,
            result.time_series.view(),
            &time_point_column_names(result.time_series.ncols()),
        )?;

        SpatialMetadata {
            subject: self.subject.clone(),
            structure: self.structure.to_string(),
            n_locations,
            n_components,
            confidence_level: result.confidence_level,
            diagnostics: result.diagnostics.clone(),
        }
        .save(&self.spatial_metadata_path)
        .map_err(SubjectError::Metadata)
    }

    /// Runs the job, converting every result into a recorded outcome.
    ///
    /// A missing input file skips the subject rather than failing it.
    pub fn process(
        &self,
        group_components: &Array2<f64>,
        estimator: &DualRegression,
    ) -> SubjectOutcome {
        if !self.input_path.is_file() {
            log::warn!(
                "{}: input '{}' not found, skipping",
                self.subject,
                self.input_path.display()
            );
            return SubjectOutcome {
                subject: self.subject.clone(),
                status: SubjectStatus::Skipped,
                detail: Some(format!("input '{}' not found", self.input_path.display())),
                diagnostics: None,
            };
        }

        match self.execute(group_components, estimator) {
            Ok(diagnostics) => SubjectOutcome {
                subject: self.subject.clone(),
                status: SubjectStatus::Completed,
                detail: None,
                diagnostics: Some(diagnostics),
            },
            Err(err) => {
                log::error!("{}: {err}", self.subject);
                SubjectOutcome {
                    subject: self.subject.clone(),
                    status: SubjectStatus::Failed,
                    detail: Some(err.to_string()),
                    diagnostics: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Completed,
    Skipped,
    Failed,
}

/// What happened to one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectOutcome {
    pub subject: String,
    pub status: SubjectStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diagnostics: Option<FitDiagnostics>,
}

/// Everything a run did, persisted as the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub config: RunConfig,
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchReport {
    fn count(&self, status: SubjectStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(SubjectStatus::Completed)
    }

    pub fn skipped(&self) -> usize {
        self.count(SubjectStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(SubjectStatus::Failed)
    }

    /// Converts any failed subject into a run-level error.
    pub fn into_result(self) -> Result<Self, BatchError> {
        let failed = self.failed();
        if failed > 0 {
            Err(BatchError::SubjectsFailed {
                failed,
                total: self.outcomes.len(),
            })
        } else {
            Ok(self)
        }
    }
}

/// Keeps the first occurrence of each subject, in list order.
fn unique_subjects(subjects: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    subjects
        .into_iter()
        .filter(|subject| {
            let first = seen.insert(subject.clone());
            if !first {
                log::warn!("Subject '{subject}' is listed more than once; processing it once.");
            }
            first
        })
        .collect()
}

/// Runs dual regression for every subject in the configured subject list.
///
/// Missing shared inputs abort before any computation. Per-subject failures are
/// recorded in the returned report (and the manifest written to `out_dir`).
pub fn run_batch(
    config: &RunConfig,
    observer: &dyn BatchProgressObserver,
) -> Result<BatchReport, BatchError> {
    if !config.group_components.is_file() {
        return Err(BatchError::InputNotFound {
            what: "group components",
            path: config.group_components.clone(),
        });
    }
    if !config.subject_list.is_file() {
        return Err(BatchError::InputNotFound {
            what: "subject list",
            path: config.subject_list.clone(),
        });
    }

    let estimator = DualRegression::new(config.alpha)?;
    match estimator.alpha() {
        Some(alpha) => log::info!("Applying confidence threshold of {alpha}."),
        None => log::info!("Computing raw betas without confidence thresholding."),
    }

    let subjects =
        io::read_subject_list(&config.subject_list).map_err(|source| BatchError::SubjectList {
            path: config.subject_list.clone(),
            source,
        })?;
    let subjects = unique_subjects(subjects);

    let group_components =
        load_matrix(&config.group_components).map_err(BatchError::GroupComponents)?;
    log::info!(
        "Loaded group components: {} locations x {} components",
        group_components.nrows(),
        group_components.ncols()
    );

    fs::create_dir_all(&config.out_dir).map_err(|source| BatchError::OutputDirectory {
        path: config.out_dir.clone(),
        source,
    })?;

    let jobs: Vec<SubjectJob> = subjects
        .iter()
        .map(|subject| SubjectJob::new(config, subject))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?;
    log::info!(
        "Processing {} subjects on {} threads",
        jobs.len(),
        config.threads
    );

    observer.on_batch_start(jobs.len());
    let outcomes: Vec<SubjectOutcome> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                let outcome = job.process(&group_components, &estimator);
                observer.on_subject_finished(&outcome);
                outcome
            })
            .collect()
    });
    observer.on_batch_finish();

    let report = BatchReport {
        config: config.clone(),
        outcomes,
    };
    io::save_toml(&config.manifest_path(), &report).map_err(BatchError::Manifest)?;
    log::info!(
        "Run complete: {} completed, {} skipped, {} failed. Manifest: {}",
        report.completed(),
        report.skipped(),
        report.failed(),
        config.manifest_path().display()
    );

    Ok(report)
}
