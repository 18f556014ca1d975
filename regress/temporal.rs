//! Stage 2: regress every location's time series onto the component time courses.

use crate::estimate::{DualRegressionError, validate_matrix};
use crate::linalg::{gram_pseudo_inverse, outer_gram};
use ndarray::{Array1, Array2, ArrayView2, Zip};

/// Output of the temporal regression, including what the thresholder needs.
#[derive(Debug, Clone)]
pub struct TemporalFit {
    /// Raw beta maps, shape `[samples, K]`.
    pub betas: Array2<f64>,
    /// Per-location residual variance `RSS / dof`, length `samples`.
    /// Zero everywhere when there are no residual degrees of freedom.
    pub residual_variance: Array1<f64>,
    /// Diagonal of `(A·Aᵀ)⁺`, length `K`.
    pub design_precision: Array1<f64>,
    /// Residual degrees of freedom, `T − rank(A)`.
    pub dof: usize,
    /// Numerical rank of the time course matrix `A`.
    pub rank: usize,
}

/// Solves `Y ≈ B · A` for `B` with all K regressors entering jointly.
///
/// `B = Y · pinv(A) = (Y·Aᵀ) · (A·Aᵀ)⁺`, vectorized across all locations.
pub fn regress_temporal(
    subject: ArrayView2<f64>,
    time_series: ArrayView2<f64>,
) -> Result<TemporalFit, DualRegressionError> {
    validate_matrix(subject, "subject time series")?;
    validate_matrix(time_series, "component time course")?;
    let n_timepoints = subject.ncols();
    if time_series.ncols() != n_timepoints {
        return Err(DualRegressionError::InconsistentDimensions {
            what: "time points in component time courses",
            expected: n_timepoints,
            found: time_series.ncols(),
        });
    }

    let gram_inverse = gram_pseudo_inverse(&outer_gram(time_series), n_timepoints)?;
    let cross = subject.dot(&time_series.t());
    let betas = cross.dot(&gram_inverse.inverse);

    // Residual sum of squares row by row, so the full samples × T residual
    // matrix is never materialized.
    let rss = Zip::from(subject.rows())
        .and(betas.rows())
        .map_collect(|y, b| {
            let fitted = b.dot(&time_series);
            y.iter()
                .zip(fitted.iter())
                .map(|(&observed, &predicted)| (observed - predicted).powi(2))
                .sum::<f64>()
        });

    let dof = n_timepoints.saturating_sub(gram_inverse.rank);
    let residual_variance = if dof > 0 {
        rss / dof as f64
    } else {
        log::warn!(
            "No residual degrees of freedom ({} time points, time course rank {}); confidence cannot be assessed.",
            n_timepoints,
            gram_inverse.rank
        );
        Array1::zeros(subject.nrows())
    };

    log::debug!(
        "Temporal regression: time course rank {} of {}, residual dof {}",
        gram_inverse.rank,
        gram_inverse.dim(),
        dof
    );

    Ok(TemporalFit {
        betas,
        residual_variance,
        design_precision: gram_inverse.inverse.diag().to_owned(),
        dof,
        rank: gram_inverse.rank,
    })
}
