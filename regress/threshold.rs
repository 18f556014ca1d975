//! # Confidence Thresholding
//!
//! Sparsifies the temporal-regression betas by keeping only those whose
//! two-sided `(1 − alpha)` confidence interval excludes zero.
//!
//! For location `v` and component `k` the standard GLM coefficient variance is
//! `σ²_v · [(A·Aᵀ)⁺]_kk`, where `σ²_v` is the location's residual variance. The
//! interval is `beta ± t_{1−alpha/2, dof} · se`. Locations whose residual
//! variance is zero, negative or non-finite cannot be assessed and pass through
//! unchanged.

use crate::estimate::{DualRegressionError, validate_alpha};
use crate::stats::two_sided_critical_value;
use crate::temporal::TemporalFit;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// Result of thresholding one beta matrix.
#[derive(Debug, Clone)]
pub struct ThresholdOutcome {
    /// Thresholded beta maps, shape `[samples, K]`.
    pub spatial_components: Array2<f64>,
    /// `t_{1−alpha/2, dof}`, or `None` when there were no residual degrees of freedom.
    pub critical_value: Option<f64>,
    /// Entries whose interval excluded zero.
    pub retained: usize,
    /// Entries set to zero.
    pub zeroed: usize,
    /// Locations passed through without a test.
    pub degenerate_locations: usize,
}

/// Thresholds the betas of a temporal fit at significance level `alpha`.
pub fn threshold_temporal_fit(
    fit: &TemporalFit,
    alpha: f64,
) -> Result<ThresholdOutcome, DualRegressionError> {
    threshold_betas(
        fit.betas.view(),
        fit.residual_variance.view(),
        fit.design_precision.view(),
        fit.dof,
        alpha,
    )
}

/// Thresholds a beta matrix given its per-location residual variance and the
/// per-component diagonal of the design pseudo-inverse.
pub fn threshold_betas(
    betas: ArrayView2<f64>,
    residual_variance: ArrayView1<f64>,
    design_precision: ArrayView1<f64>,
    dof: usize,
    alpha: f64,
) -> Result<ThresholdOutcome, DualRegressionError> {
    validate_alpha(alpha)?;
    let (n_samples, n_components) = betas.dim();
    if residual_variance.len() != n_samples {
        return Err(DualRegressionError::InconsistentDimensions {
            what: "residual variances",
            expected: n_samples,
            found: residual_variance.len(),
        });
    }
    if design_precision.len() != n_components {
        return Err(DualRegressionError::InconsistentDimensions {
            what: "design precision entries",
            expected: n_components,
            found: design_precision.len(),
        });
    }

    let mut spatial_components = betas.to_owned();

    if dof == 0 {
        return Ok(ThresholdOutcome {
            spatial_components,
            critical_value: None,
            retained: 0,
            zeroed: 0,
            degenerate_locations: n_samples,
        });
    }

    let critical_value = two_sided_critical_value(alpha, dof);
    log::debug!("Thresholding at alpha={alpha} with dof={dof}: critical t = {critical_value:.6}");

    let mut retained = 0;
    let mut zeroed = 0;
    let mut degenerate_locations = 0;

    for (mut row, &variance) in spatial_components
        .axis_iter_mut(Axis(0))
        .zip(residual_variance.iter())
    {
        if !(variance.is_finite() && variance > 0.0) {
            degenerate_locations += 1;
            continue;
        }

        let mut location_degenerate = false;
        for (beta, &precision) in row.iter_mut().zip(design_precision.iter()) {
            if !(precision.is_finite() && precision > 0.0) {
                location_degenerate = true;
                continue;
            }
            let half_width = critical_value * (variance * precision).sqrt();
            let lower = *beta - half_width;
            let upper = *beta + half_width;
            if lower > 0.0 || upper < 0.0 {
                retained += 1;
            } else {
                *beta = 0.0;
                zeroed += 1;
            }
        }
        if location_degenerate {
            degenerate_locations += 1;
        }
    }

    Ok(ThresholdOutcome {
        spatial_components,
        critical_value: Some(critical_value),
        retained,
        zeroed,
        degenerate_locations,
    })
}
