//! Quantity comparisons.
//!
//! Quantities are `f64`. Every comparison in the planner goes through these
//! helpers so that one tolerance governs what counts as zero, equal or
//! short.

/// Tolerance below which a quantity is considered zero.
pub const ROUNDING_ERROR: f64 = 1e-6;

#[inline]
pub fn is_zero(q: f64) -> bool {
    q.abs() < ROUNDING_ERROR
}

#[inline]
pub fn is_positive(q: f64) -> bool {
    q >= ROUNDING_ERROR
}

#[inline]
pub fn is_negative(q: f64) -> bool {
    q <= -ROUNDING_ERROR
}

/// `a < b` beyond the tolerance.
#[inline]
pub fn is_less(a: f64, b: f64) -> bool {
    a < b - ROUNDING_ERROR
}

/// `a > b` beyond the tolerance.
#[inline]
pub fn is_greater(a: f64, b: f64) -> bool {
    a > b + ROUNDING_ERROR
}

#[inline]
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < ROUNDING_ERROR
}

/// Snap values within the tolerance of zero to exactly zero.
#[inline]
pub fn clamp_zero(q: f64) -> f64 {
    if is_zero(q) { 0.0 } else { q }
}
