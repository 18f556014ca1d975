// regress/estimate.rs

//! # Dual Regression Estimation
//!
//! This module is the single entry point of the numerical core. For one
//! subject it runs the strictly linear pipeline
//!
//! 1.  **Spatial regression:** the subject's data `Y` (samples × T) is
//!     regressed onto the group components `G` (samples × K), giving one
//!     subject-specific time course per component (`A`, K × T).
//! 2.  **Temporal regression:** `Y` is regressed onto those time courses,
//!     giving one beta map per component (`B`, samples × K).
//! 3.  **Confidence thresholding (optional):** betas whose `(1 − alpha)`
//!     confidence interval includes zero are set to zero.
//!
//! Every stage is a pure function of immutable views. Nothing is cached between
//! calls, so a single `DualRegression` can be shared by any number of threads.

use crate::linalg;
use crate::spatial::regress_spatial;
use crate::temporal::regress_temporal;
use crate::threshold::threshold_temporal_fit;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Condition numbers above this are reported as ill-conditioned.
pub const ILL_CONDITIONED_THRESHOLD: f64 = 1e8;

/// A comprehensive error type for a single dual regression fit.
#[derive(Error, Debug)]
pub enum DualRegressionError {
    #[error(
        "The group components have {group_samples} spatial locations but the subject time series has {subject_samples}. Both must be defined on the same anatomical space."
    )]
    ShapeMismatch {
        group_samples: usize,
        subject_samples: usize,
    },

    #[error("Inconsistent dimensions for {what}: expected {expected}, found {found}.")]
    InconsistentDimensions {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("The {what} matrix is empty (shape {rows} x {cols}).")]
    EmptyInput {
        what: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("The {0} matrix contains non-finite values (NaN or Infinity).")]
    NonFiniteInput(&'static str),

    #[error("Confidence level alpha must lie strictly between 0 and 1, but was {0}.")]
    InvalidAlpha(f64),

    #[error("A matrix decomposition failed: {0}")]
    LinearAlgebra(#[from] ndarray_linalg::error::LinalgError),
}

/// Soft conditions and summary statistics gathered while fitting.
///
/// None of these abort a fit; they describe how much the output can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Number of group components (K).
    pub n_components: usize,
    /// Numerical rank of the group component matrix.
    pub group_rank: usize,
    /// The group components are collinear; time courses are minimum-norm.
    pub rank_deficient: bool,
    /// 2-norm condition number of the group component matrix.
    pub group_condition_number: f64,
    /// Full rank, but the condition number exceeds [`ILL_CONDITIONED_THRESHOLD`].
    #[serde(default)]
    pub ill_conditioned: bool,
    /// Numerical rank of the estimated time courses.
    pub time_series_rank: usize,
    /// Residual degrees of freedom of the temporal regression (`T − rank`).
    pub residual_dof: usize,
    /// Locations whose residual variance was degenerate and bypassed thresholding.
    pub degenerate_locations: usize,
    /// Entries kept by the thresholder, when thresholding ran.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retained_entries: Option<usize>,
    /// Entries zeroed by the thresholder, when thresholding ran.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zeroed_entries: Option<usize>,
}

/// Subject-specific outputs of one fit.
#[derive(Debug, Clone)]
pub struct DualRegressionResult {
    /// One time course per component, shape `[K, T]`.
    pub time_series: Array2<f64>,
    /// One beta map per component, shape `[samples, K]`, thresholded if requested.
    pub spatial_components: Array2<f64>,
    /// The alpha used for thresholding, or `None` for raw betas.
    pub confidence_level: Option<f64>,
    pub diagnostics: FitDiagnostics,
}

/// Reusable fit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DualRegression {
    alpha: Option<f64>,
}

impl DualRegression {
    /// Creates an estimator. `alpha = None` disables confidence thresholding.
    pub fn new(alpha: Option<f64>) -> Result<Self, DualRegressionError> {
        if let Some(a) = alpha {
            validate_alpha(a)?;
        }
        Ok(Self { alpha })
    }

    pub fn alpha(&self) -> Option<f64> {
        self.alpha
    }

    /// Runs dual regression for one subject.
    pub fn fit(
        &self,
        group_components: ArrayView2<f64>,
        subject: ArrayView2<f64>,
    ) -> Result<DualRegressionResult, DualRegressionError> {
        fit(group_components, subject, self.alpha)
    }
}

pub(crate) fn validate_alpha(alpha: f64) -> Result<(), DualRegressionError> {
    if alpha.is_finite() && alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(DualRegressionError::InvalidAlpha(alpha))
    }
}

pub(crate) fn validate_matrix(
    x: ArrayView2<f64>,
    what: &'static str,
) -> Result<(), DualRegressionError> {
    let (rows, cols) = x.dim();
    if rows == 0 || cols == 0 {
        return Err(DualRegressionError::EmptyInput { what, rows, cols });
    }
    if !linalg::all_finite(x) {
        return Err(DualRegressionError::NonFiniteInput(what));
    }
    Ok(())
}

/// Validates that group components and subject data can be regressed together.
pub fn validate_inputs(
    group_components: ArrayView2<f64>,
    subject: ArrayView2<f64>,
) -> Result<(), DualRegressionError> {
    validate_matrix(group_components, "group component")?;
    validate_matrix(subject, "subject time series")?;
    if group_components.nrows() != subject.nrows() {
        return Err(DualRegressionError::ShapeMismatch {
            group_samples: group_components.nrows(),
            subject_samples: subject.nrows(),
        });
    }
    Ok(())
}

/// Dual regression of `subject` (samples × T) against `group_components` (samples × K).
///
/// Fails without producing partial output if the inputs are empty, non-finite,
/// or disagree on the number of spatial locations.
pub fn fit(
    group_components: ArrayView2<f64>,
    subject: ArrayView2<f64>,
    alpha: Option<f64>,
) -> Result<DualRegressionResult, DualRegressionError> {
    validate_inputs(group_components, subject)?;
    if let Some(a) = alpha {
        validate_alpha(a)?;
    }

    let (n_samples, n_components) = group_components.dim();
    let n_timepoints = subject.ncols();
    log::debug!(
        "Dual regression: {n_samples} locations, {n_components} components, {n_timepoints} time points"
    );

    // --- Stage 1: spatial regression ---
    let spatial = regress_spatial(group_components, subject)?;
    let rank_deficient = spatial.rank < n_components;
    let ill_conditioned = !rank_deficient && spatial.condition_number > ILL_CONDITIONED_THRESHOLD;
    if rank_deficient {
        log::warn!(
            "Group components are rank deficient (rank {} of {}); time courses use the minimum-norm least-squares solution.",
            spatial.rank,
            n_components
        );
    } else if ill_conditioned {
        log::warn!(
            "Group components are ill-conditioned (condition number {:.3e}); time course estimates may have high variance.",
            spatial.condition_number
        );
    }

    // --- Stage 2: temporal regression ---
    let temporal = regress_temporal(subject, spatial.time_series.view())?;

    let mut diagnostics = FitDiagnostics {
        n_components,
        group_rank: spatial.rank,
        rank_deficient,
        group_condition_number: spatial.condition_number,
        ill_conditioned,
        time_series_rank: temporal.rank,
        residual_dof: temporal.dof,
        degenerate_locations: 0,
        retained_entries: None,
        zeroed_entries: None,
    };

    // --- Stage 3: optional confidence thresholding ---
    let spatial_components = match alpha {
        None => temporal.betas,
        Some(a) => {
            let outcome = threshold_temporal_fit(&temporal, a)?;
            if outcome.degenerate_locations > 0 {
                log::warn!(
                    "{} of {} locations had degenerate residual variance and were passed through unthresholded.",
                    outcome.degenerate_locations,
                    n_samples
                );
            }
            diagnostics.degenerate_locations = outcome.degenerate_locations;
            diagnostics.retained_entries = Some(outcome.retained);
            diagnostics.zeroed_entries = Some(outcome.zeroed);
            outcome.spatial_components
        }
    };

    Ok(DualRegressionResult {
        time_series: spatial.time_series,
        spatial_components,
        confidence_level: alpha,
        diagnostics,
    })
}
