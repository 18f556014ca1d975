//! Student-t distribution functions used by the confidence thresholder.
//!
//! The CDF is evaluated through the regularized incomplete beta function,
//! `P(T ≤ t) = 1 − ½·I_x(ν/2, ½)` with `x = ν / (ν + t²)` for `t ≥ 0`.
//! Quantiles are found by bisection on the CDF, which is monotone, so the
//! critical value grows monotonically as the requested tail probability shrinks.

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

const CONTINUED_FRACTION_EPS: f64 = 1e-15;
const TINY: f64 = 1e-300;
const QUANTILE_TOLERANCE: f64 = 1e-12;
const QUANTILE_MAX_BISECTIONS: usize = 200;

/// Natural log of the gamma function for `x > 0` (Lanczos approximation).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula.
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = LANCZOS_COEFFICIENTS[0];
    let t = x + LANCZOS_G + 0.5;
    for (i, &c) in LANCZOS_COEFFICIENTS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta function `I_x(a, b)`.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges quickly only on this side of the mode.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    // Iterations needed grow like sqrt(max(a, b)).
    let max_iter = 200 + 10 * (a.max(b).sqrt() as usize);

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=max_iter {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < CONTINUED_FRACTION_EPS {
            return h;
        }
    }

    log::debug!(
        "Incomplete beta continued fraction hit {max_iter} iterations (a={a}, b={b}, x={x})"
    );
    h
}

/// Cumulative distribution function of Student's t with `dof` degrees of freedom.
pub fn students_t_cdf(t: f64, dof: f64) -> f64 {
    if t.is_nan() || dof <= 0.0 {
        return f64::NAN;
    }
    if t == f64::INFINITY {
        return 1.0;
    }
    if t == f64::NEG_INFINITY {
        return 0.0;
    }
    let x = dof / (dof + t * t);
    let tail = 0.5 * regularized_incomplete_beta(0.5 * dof, 0.5, x);
    if t >= 0.0 { 1.0 - tail } else { tail }
}

/// Quantile function (inverse CDF) of Student's t.
///
/// Returns `NaN` when `p` is outside `(0, 1)` or `dof` is not positive.
pub fn students_t_quantile(p: f64, dof: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) || !(dof > 0.0) {
        return f64::NAN;
    }
    if p == 0.5 {
        return 0.0;
    }
    if p < 0.5 {
        return -students_t_quantile(1.0 - p, dof);
    }

    let mut lo = 0.0;
    let mut hi = 1.0;
    while students_t_cdf(hi, dof) < p {
        lo = hi;
        hi *= 2.0;
        if !hi.is_finite() {
            return f64::INFINITY;
        }
    }

    for _ in 0..QUANTILE_MAX_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if students_t_cdf(mid, dof) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= QUANTILE_TOLERANCE * hi.max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Critical value `t_{1 − alpha/2, dof}` of a two-sided `(1 − alpha)` interval.
pub fn two_sided_critical_value(alpha: f64, dof: usize) -> f64 {
    students_t_quantile(1.0 - 0.5 * alpha, dof as f64)
}
