//! Standard normal distribution helpers for the hypothesis tests.

use std::f64::consts::SQRT_2;

// Abramowitz and Stegun 7.1.26, |error| < 1.5e-7.
const A1: f64 = 0.254829592;
const A2: f64 = -0.284496736;
const A3: f64 = 1.421413741;
const A4: f64 = -1.453152027;
const A5: f64 = 1.061405429;
const P: f64 = 0.3275911;

/// `P(Z > x)` for `x >= 0`, evaluated directly so small tails keep their precision.
fn upper_tail_nonneg(x: f64) -> f64 {
    let z = x / SQRT_2;
    let t = 1.0 / (1.0 + P * z);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    0.5 * poly * (-z * z).exp()
}

/// Standard normal CDF, Φ(x).
pub fn cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x >= 0.0 {
        1.0 - upper_tail_nonneg(x)
    } else {
        upper_tail_nonneg(-x)
    }
}

/// `1 - Φ(x)`.
pub fn upper_tail(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x >= 0.0 {
        upper_tail_nonneg(x)
    } else {
        1.0 - upper_tail_nonneg(-x)
    }
}

/// Inverse standard normal CDF, Φ⁻¹(p). Acklam's rational approximation,
/// relative error below 1.2e-9.
pub fn quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdf_at_zero() {
        assert!((cdf(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cdf_at_1_96() {
        assert!((cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((upper_tail(1.96) - 0.025).abs() < 1e-4);
    }

    #[test]
    fn test_cdf_symmetry() {
        for x in [0.3, 1.0, 2.5, 4.0] {
            assert!((cdf(x) + cdf(-x) - 1.0).abs() < 1e-7);
        }
    }

    #[test]
    fn test_cdf_extremes_stay_in_unit_interval() {
        assert_eq!(cdf(f64::INFINITY), 1.0);
        assert_eq!(cdf(f64::NEG_INFINITY), 0.0);
        assert!(upper_tail(8.0) >= 0.0);
    }

    #[test]
    fn test_quantile_critical_values() {
        assert!((quantile(0.95) - 1.644854).abs() < 1e-5);
        assert!((quantile(0.975) - 1.959964).abs() < 1e-5);
        assert!((quantile(0.995) - 2.575829).abs() < 1e-5);
        assert!((quantile(0.01) + 2.326348).abs() < 1e-5);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        for p in [0.1, 0.5, 0.8, 0.99] {
            assert!((cdf(quantile(p)) - p).abs() < 1e-6);
        }
    }
}
