use approx::assert_abs_diff_eq;
use dualreg::spatial::regress_spatial;
use dualreg::temporal::regress_temporal;
use dualreg::{DualRegression, DualRegressionError, fit};
use ndarray::{Array2, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

const N_LOCATIONS: usize = 100;
const N_TIMEPOINTS: usize = 50;

/// Three orthonormal ±0.1 spatial patterns over 100 locations: a constant map,
/// an anterior/posterior split and an alternating map.
fn orthonormal_group() -> Array2<f64> {
    Array2::from_shape_fn((N_LOCATIONS, 3), |(i, k)| match k {
        0 => 0.1,
        1 => {
            if i < N_LOCATIONS / 2 {
                0.1
            } else {
                -0.1
            }
        }
        _ => {
            if i % 2 == 0 {
                0.1
            } else {
                -0.1
            }
        }
    })
}

fn gaussian_matrix(rng: &mut StdRng, shape: (usize, usize), sd: f64) -> Array2<f64> {
    let normal = Normal::new(0.0, sd).unwrap();
    Array2::from_shape_simple_fn(shape, || normal.sample(&mut *rng))
}

/// `Y = G_active · A_active + noise`, returning `(Y, A_true)` for all three components.
fn synthetic_subject(seed: u64, active: usize, noise_sd: f64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let group = orthonormal_group();
    let mut time_courses = gaussian_matrix(&mut rng, (3, N_TIMEPOINTS), 1.0);
    time_courses.slice_mut(s![active.., ..]).fill(0.0);
    let noise = gaussian_matrix(&mut rng, (N_LOCATIONS, N_TIMEPOINTS), noise_sd);
    (group.dot(&time_courses) + noise, time_courses)
}

fn column_correlation(a: ndarray::ArrayView1<f64>, b: ndarray::ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    let (mean_a, mean_b) = (a.sum() / n, b.sum() / n);
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    cov / (var_a * var_b).sqrt()
}

#[test]
fn recovers_planted_time_courses_and_spatial_maps() {
    let group = orthonormal_group();
    let (subject, true_time_courses) = synthetic_subject(7, 3, 0.01);

    let result = fit(group.view(), subject.view(), None).unwrap();

    assert_eq!(result.time_series.dim(), (3, N_TIMEPOINTS));
    assert_eq!(result.spatial_components.dim(), (N_LOCATIONS, 3));
    for (&estimated, &planted) in result.time_series.iter().zip(true_time_courses.iter()) {
        assert_abs_diff_eq!(estimated, planted, epsilon = 0.06);
    }
    for (&estimated, &planted) in result.spatial_components.iter().zip(group.iter()) {
        assert_abs_diff_eq!(estimated, planted, epsilon = 0.02);
    }
    // The constant map has no variance, so correlation is only meaningful for the others.
    for k in 1..3 {
        let r = column_correlation(result.spatial_components.column(k), group.column(k));
        assert!(r > 0.99, "component {k} correlation {r}");
    }

    let diagnostics = &result.diagnostics;
    assert_eq!(diagnostics.group_rank, 3);
    assert!(!diagnostics.rank_deficient);
    assert_abs_diff_eq!(diagnostics.group_condition_number, 1.0, epsilon = 1e-9);
    assert_eq!(diagnostics.time_series_rank, 3);
    assert_eq!(diagnostics.residual_dof, N_TIMEPOINTS - 3);
}

#[test]
fn noiseless_data_is_reconstructed_exactly() {
    let group = orthonormal_group();
    let (subject, true_time_courses) = synthetic_subject(11, 3, 0.0);

    let result = fit(group.view(), subject.view(), None).unwrap();

    for (&estimated, &planted) in result.time_series.iter().zip(true_time_courses.iter()) {
        assert_abs_diff_eq!(estimated, planted, epsilon = 1e-9);
    }
    let reconstructed = result.spatial_components.dot(&result.time_series);
    for (&fitted, &observed) in reconstructed.iter().zip(subject.iter()) {
        assert_abs_diff_eq!(fitted, observed, epsilon = 1e-9);
    }
}

#[test]
fn unthresholded_maps_are_the_raw_temporal_betas() {
    let group = orthonormal_group();
    let (subject, _) = synthetic_subject(3, 3, 0.05);

    let result = fit(group.view(), subject.view(), None).unwrap();
    let spatial = regress_spatial(group.view(), subject.view()).unwrap();
    let temporal = regress_temporal(subject.view(), spatial.time_series.view()).unwrap();

    assert_eq!(result.time_series, spatial.time_series);
    assert_eq!(result.spatial_components, temporal.betas);
    assert_eq!(result.confidence_level, None);
}

#[test]
fn thresholding_zeroes_the_absent_component_and_keeps_the_present_ones() {
    let group = orthonormal_group();
    let (subject, _) = synthetic_subject(42, 2, 0.01);

    let raw = fit(group.view(), subject.view(), None).unwrap();
    let thresholded = fit(group.view(), subject.view(), Some(0.05)).unwrap();
    assert_eq!(thresholded.confidence_level, Some(0.05));
    assert_eq!(thresholded.time_series, raw.time_series);

    let retained_fraction = |k: usize| {
        let kept = thresholded
            .spatial_components
            .column(k)
            .iter()
            .filter(|&&v| v != 0.0)
            .count();
        kept as f64 / N_LOCATIONS as f64
    };
    assert!(retained_fraction(0) >= 0.95, "component 0 kept {}", retained_fraction(0));
    assert!(retained_fraction(1) >= 0.95, "component 1 kept {}", retained_fraction(1));
    assert!(retained_fraction(2) <= 0.3, "component 2 kept {}", retained_fraction(2));

    // Thresholding only ever zeroes entries; survivors keep their raw value.
    for (&kept, &original) in thresholded
        .spatial_components
        .iter()
        .zip(raw.spatial_components.iter())
    {
        assert!(kept == 0.0 || kept == original);
    }

    let diagnostics = &thresholded.diagnostics;
    assert_eq!(
        diagnostics.retained_entries.unwrap() + diagnostics.zeroed_entries.unwrap(),
        N_LOCATIONS * 3
    );
    assert_eq!(diagnostics.degenerate_locations, 0);
}

#[test]
fn collinear_group_components_are_flagged_and_still_fit() {
    let mut group = orthonormal_group();
    let duplicate = group.column(1).to_owned();
    group.column_mut(2).assign(&duplicate);
    let (subject, _) = synthetic_subject(5, 2, 0.01);

    let result = fit(group.view(), subject.view(), Some(0.05)).unwrap();

    assert!(result.diagnostics.rank_deficient);
    assert_eq!(result.diagnostics.group_rank, 2);
    assert!(result.time_series.iter().all(|v| v.is_finite()));
    assert!(result.spatial_components.iter().all(|v| v.is_finite()));
    // Minimum-norm solution splits the shared time course evenly.
    for t in 0..N_TIMEPOINTS {
        assert_abs_diff_eq!(
            result.time_series[[1, t]],
            result.time_series[[2, t]],
            epsilon = 1e-9
        );
    }
}

#[test]
fn mismatched_location_counts_are_rejected() {
    let group = orthonormal_group();
    let (subject, _) = synthetic_subject(1, 3, 0.01);
    let truncated = subject.slice(s![..90, ..]);

    match fit(group.view(), truncated, None) {
        Err(DualRegressionError::ShapeMismatch {
            group_samples,
            subject_samples,
        }) => {
            assert_eq!(group_samples, N_LOCATIONS);
            assert_eq!(subject_samples, 90);
        }
        other => panic!("expected ShapeMismatch, got {other:?}"),
    }
}

#[test]
fn concurrent_fits_match_sequential_fits() {
    let group = orthonormal_group();
    let estimator = DualRegression::new(Some(0.01)).unwrap();
    let subjects: Vec<Array2<f64>> = (0..8)
        .map(|seed| synthetic_subject(100 + seed, 2, 0.02).0)
        .collect();

    let sequential: Vec<_> = subjects
        .iter()
        .map(|subject| estimator.fit(group.view(), subject.view()).unwrap())
        .collect();
    let parallel: Vec<_> = subjects
        .par_iter()
        .map(|subject| estimator.fit(group.view(), subject.view()).unwrap())
        .collect();

    for (a, b) in sequential.iter().zip(parallel.iter()) {
        assert_eq!(a.time_series, b.time_series);
        assert_eq!(a.spatial_components, b.spatial_components);
        assert_eq!(a.diagnostics, b.diagnostics);
    }
}
