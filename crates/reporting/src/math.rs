//! Rate arithmetic shared by every aggregator. Division by zero never raises;
//! it yields the neutral value `0.0`.

/// `num / den`, or `0.0` when the denominator is zero or the result is not finite.
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        return 0.0;
    }
    let ratio = num / den;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// `part / whole * 100` with the same zero guard as [`safe_div`].
pub fn percentage(part: u64, whole: u64) -> f64 {
    safe_div(part as f64, whole as f64) * 100.0
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}
