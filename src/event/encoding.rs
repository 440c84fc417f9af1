//! Integer + multiplier encoding for numeric values.
//!
//! Events and blocks store numbers as two integers so fractional provider
//! values survive integer columns: the true value is
//! `value / value_multiplier`. Whole numbers keep a multiplier of 1 (or a
//! caller-supplied default); fractional numbers are scaled by 1000.

use tracing::warn;

/// Fixed scale applied to fractional values.
const FRACTIONAL_MULTIPLIER: i64 = 1000;

/// Encode a raw numeric value as `(value, multiplier)`.
///
/// - `None`, NaN and infinities encode as `(None, None)`
/// - whole numbers encode as-is with multiplier 1
/// - fractional numbers encode as `round(v * 1000)` with multiplier 1000
///
/// Round-trip contract: `value / multiplier` reconstructs the input (within
/// float rounding). Inputs with more than three fractional digits cannot
/// round-trip exactly; a warning is logged when that happens.
pub fn encode_value(raw: Option<f64>) -> (Option<i64>, Option<i64>) {
    encode_value_with(raw, 1)
}

/// Like [`encode_value`] but with a caller-supplied multiplier for whole
/// numbers (e.g. a provider that always reports centi-units).
pub fn encode_value_with(raw: Option<f64>, default_multiplier: i64) -> (Option<i64>, Option<i64>) {
    let v = match raw {
        Some(v) if v.is_finite() => v,
        _ => return (None, None),
    };

    if v.fract() == 0.0 {
        return (Some(v as i64), Some(default_multiplier));
    }

    let scaled = (v * FRACTIONAL_MULTIPLIER as f64).round();
    let reconstructed = scaled / FRACTIONAL_MULTIPLIER as f64;
    if (reconstructed - v).abs() > f64::EPSILON * v.abs().max(1.0) {
        warn!(
            value = v,
            "value has more than 3 fractional digits, encoding is lossy"
        );
    }

    (Some(scaled as i64), Some(FRACTIONAL_MULTIPLIER))
}
