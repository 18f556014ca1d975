//! Stage 1: regress each time point's spatial pattern onto the group components.

use crate::estimate::{DualRegressionError, validate_inputs};
use crate::linalg::svd_least_squares;
use ndarray::{Array2, ArrayView2};

/// Output of the spatial regression.
#[derive(Debug, Clone)]
pub struct SpatialFit {
    /// Subject-specific time courses, shape `[K, T]`.
    pub time_series: Array2<f64>,
    /// Numerical rank of the group component matrix.
    pub rank: usize,
    /// 2-norm condition number of the group component matrix.
    pub condition_number: f64,
}

/// Solves `Y ≈ G · A` for `A` in the least-squares sense.
///
/// `A = pinv(G) · Y`, computed from a thin SVD of `G`. All time points are
/// solved at once since they share the same design `G`. When `G` is rank
/// deficient the result is the minimum-norm least-squares solution.
pub fn regress_spatial(
    group_components: ArrayView2<f64>,
    subject: ArrayView2<f64>,
) -> Result<SpatialFit, DualRegressionError> {
    validate_inputs(group_components, subject)?;

    let solved = svd_least_squares(group_components, subject)?;
    let condition_number = solved.condition_number();

    log::debug!(
        "Spatial regression: rank {} of {}, condition number {:.3e}",
        solved.rank,
        group_components.ncols(),
        condition_number
    );

    Ok(SpatialFit {
        time_series: solved.solution,
        rank: solved.rank,
        condition_number,
    })
}
