//! Floating point helpers shared by every consumer and switch.
//!
//! All "is the remaining work finished" checks go through [`approx_eq`] so
//! that rounding never stalls termination. The tolerance scales with the
//! magnitude of the larger operand: `1e-5 * max(|a|, |b|, 1e-6)`.

use crate::types::SimTime;

/// Relative tolerance factor.
pub const EPSILON_SCALE: f64 = 1e-5;

/// Lower bound of the magnitude used to derive the tolerance.
pub const EPSILON_FLOOR: f64 = 1e-6;

/// Returns the tolerance used to compare `a` and `b`.
#[inline]
pub fn epsilon(a: f64, b: f64) -> f64 {
    EPSILON_SCALE * a.abs().max(b.abs()).max(EPSILON_FLOOR)
}

/// Returns true if `a` and `b` are equal within the adaptive tolerance.
#[inline]
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= epsilon(a, b)
}

/// Returns true if `a <= b` within the adaptive tolerance.
#[inline]
pub fn approx_le(a: f64, b: f64) -> bool {
    a <= b || approx_eq(a, b)
}

/// Returns true if `a >= b` within the adaptive tolerance.
#[inline]
pub fn approx_ge(a: f64, b: f64) -> bool {
    a >= b || approx_eq(a, b)
}

/// Amount of work done at `rate` (units per second) over `delta` ms.
#[inline]
pub fn consumed(rate: f64, delta: SimTime) -> f64 {
    rate * delta as f64 / 1000.0
}

/// Milliseconds needed to process `work` units at `rate` units per second.
///
/// The result is rounded up to a whole millisecond, except that values
/// within the adaptive tolerance of an integer are rounded to it. Returns
/// `None` when the rate is not positive.
pub fn duration_for(work: f64, rate: f64) -> Option<SimTime> {
    if rate <= 0.0 || !rate.is_finite() {
        return None;
    }
    if work <= 0.0 {
        return Some(0);
    }
    let millis = work / rate * 1000.0;
    let rounded = millis.round();
    let ms = if approx_eq(millis, rounded) { rounded } else { millis.ceil() };
    if ms >= SimTime::MAX as f64 {
        Some(SimTime::MAX)
    } else {
        Some(ms as SimTime)
    }
}
