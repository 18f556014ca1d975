//! # Shared Linear Algebra
//!
//! Both regression stages are minimum-norm least-squares solves against a design
//! with only K columns (or rows).
//!
//! The spatial stage solves against the tall group matrix `G` directly through
//! a thin SVD, so rank and conditioning are judged on the singular values of
//! `G` itself, the way `pinv` does.
//!
//! The temporal stage needs the diagonal of `(A·Aᵀ)⁺` for standard errors, so
//! it works with the pseudo-inverse of the `K × K` Gram matrix, built from an
//! eigendecomposition.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, JobSvd, SVDDC, UPLO};

/// Least-squares solution of `X · W ≈ R` together with the spectrum of `X`.
#[derive(Debug, Clone)]
pub struct SvdSolution {
    /// `pinv(X) · R`, shape `[cols(X), cols(R)]`.
    pub solution: Array2<f64>,
    /// Singular values of `X` in descending order.
    pub singular_values: Array1<f64>,
    /// Number of singular values above the rank tolerance.
    pub rank: usize,
}

impl SvdSolution {
    /// 2-norm condition number `σmax / σmin` of `X`, or infinity when `X` is
    /// rank deficient.
    pub fn condition_number(&self) -> f64 {
        let n = self.singular_values.len();
        if n == 0 || self.rank < n {
            return f64::INFINITY;
        }
        let largest = self.singular_values.iter().fold(0.0_f64, |m, &v| m.max(v));
        let smallest = self
            .singular_values
            .iter()
            .fold(f64::INFINITY, |m, &v| m.min(v));
        largest / smallest
    }
}

/// Singular values at or below `σmax · max(rows, cols) · eps` are treated as zero.
pub fn singular_value_tolerance(largest_singular_value: f64, rows: usize, cols: usize) -> f64 {
    largest_singular_value.max(0.0) * rows.max(cols).max(1) as f64 * f64::EPSILON
}

/// Solves `X · W ≈ R` for `W` in the minimum-norm least-squares sense.
///
/// With the thin SVD `X = U·Σ·Vᵀ`, `W = V · Σ⁺ · (Uᵀ·R)`. Every column of `R`
/// shares the factorization, so the cost is one SVD of `X` plus two products.
pub fn svd_least_squares(
    x: ArrayView2<f64>,
    rhs: ArrayView2<f64>,
) -> Result<SvdSolution, LinalgError> {
    let (rows, cols) = x.dim();
    let (u, singular_values, vt) = x.svddc(JobSvd::Some)?;
    let (Some(u), Some(vt)) = (u, vt) else {
        return Err(LinalgError::NotStandardShape {
            obj: "thin SVD factors",
            rows: rows as i32,
            cols: cols as i32,
        });
    };

    let largest = singular_values.iter().fold(0.0_f64, |m, &v| m.max(v));
    let tolerance = singular_value_tolerance(largest, rows, cols);

    let mut rank = 0;
    let s_plus = singular_values.mapv(|sv| {
        if sv > tolerance && sv > 0.0 {
            rank += 1;
            1.0 / sv
        } else {
            0.0
        }
    });

    // Σ⁺ scales row j of Uᵀ·R by s⁺[j].
    let projected = u.t().dot(&rhs) * &s_plus.view().insert_axis(Axis(1));
    let solution = vt.t().dot(&projected);

    log::trace!(
        "SVD least squares: {rows} x {cols} design, rank={rank}, \
         largest singular value={largest:.3e}, tolerance={tolerance:.3e}"
    );

    Ok(SvdSolution {
        solution,
        singular_values,
        rank,
    })
}

/// Pseudo-inverse of a Gram matrix together with the spectrum it was built from.
#[derive(Debug, Clone)]
pub struct GramInverse {
    /// `(X·Xᵀ)⁺`, shape `[K, K]`.
    pub inverse: Array2<f64>,
    /// Eigenvalues of the Gram matrix in ascending order.
    pub eigenvalues: Array1<f64>,
    /// Number of eigenvalues above the rank tolerance.
    pub rank: usize,
}

impl GramInverse {
    pub fn dim(&self) -> usize {
        self.eigenvalues.len()
    }
}

/// Headroom over machine precision for eigenvalues of a formed Gram matrix.
const RANK_TOLERANCE_FACTOR: f64 = 10.0;

/// Eigenvalues at or below `10 * largest * dim * eps` are treated as exact zeros.
pub fn rank_tolerance(largest_eigenvalue: f64, dim: usize) -> f64 {
    RANK_TOLERANCE_FACTOR * largest_eigenvalue.max(0.0) * dim.max(1) as f64 * f64::EPSILON
}

/// Forms `X·Xᵀ` for a wide matrix `X`.
pub fn outer_gram(x: ArrayView2<f64>) -> Array2<f64> {
    x.dot(&x.t())
}

/// Computes the pseudo-inverse of a symmetric PSD Gram matrix.
///
/// `tolerance_dim` is the long dimension of the factor the Gram matrix was
/// built from; it scales the cut-off below which eigenvalues are discarded.
/// Discarded directions contribute nothing to the inverse, which yields the
/// minimum-norm least-squares solution when the factor is rank deficient.
pub fn gram_pseudo_inverse(
    gram: &Array2<f64>,
    tolerance_dim: usize,
) -> Result<GramInverse, LinalgError> {
    let (eigenvalues, eigenvectors) = gram.eigh(UPLO::Lower)?;
    let largest = eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v));
    let tolerance = rank_tolerance(largest, tolerance_dim);

    let mut rank = 0;
    let d_plus = eigenvalues.mapv(|eig| {
        if eig > tolerance && eig > 0.0 {
            rank += 1;
            1.0 / eig
        } else {
            0.0
        }
    });

    // V · diag(d⁺) · Vᵀ; the row broadcast scales column j of V by d⁺[j].
    let inverse = (&eigenvectors * &d_plus).dot(&eigenvectors.t());

    log::trace!(
        "Gram pseudo-inverse: dim={}, rank={}, largest eigenvalue={:.3e}, tolerance={:.3e}",
        eigenvalues.len(),
        rank,
        largest,
        tolerance
    );

    Ok(GramInverse {
        inverse,
        eigenvalues,
        rank,
    })
}

/// Returns `true` when every entry of `x` is finite.
pub fn all_finite(x: ArrayView2<f64>) -> bool {
    x.iter().all(|v| v.is_finite())
}
