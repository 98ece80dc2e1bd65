//! Fixed-point quantization of embedding coordinates.
//!
//! A coordinate x becomes round(x · 2^(B-1)) clamped to [-2^(B-1), 2^(B-1) - 1].
//! Both entry points are total: out-of-range inputs saturate.

/// Widest supported precision; quantized values are stored as `i8`
pub const MAX_PRECISION_BITS: u32 = 8;

/// Inclusive bounds of a `precision_bits`-wide signed value.
///
/// Precision is clamped into 1..=8 so the bounds always fit in `i8`.
#[inline]
pub fn bounds(precision_bits: u32) -> (i64, i64) {
    let bits = precision_bits.clamp(1, MAX_PRECISION_BITS);
    let half = 1i64 << (bits - 1);
    (-half, half - 1)
}

/// Quantize a floating-point coordinate
pub fn quantize(value: f64, precision_bits: u32) -> i8 {
    let (min, _) = bounds(precision_bits);
    let scaled = (value * (-min) as f64).round();
    // `as` saturates (NaN → 0), so huge inputs land on the clamp
    clamp(scaled as i64, precision_bits)
}

/// Clamp an already-discretized coordinate
pub fn clamp(value: i64, precision_bits: u32) -> i8 {
    let (min, max) = bounds(precision_bits);
    value.clamp(min, max) as i8
}

/// Quantize a whole embedding
pub fn quantize_embedding(values: &[f64], precision_bits: u32) -> Vec<i8> {
    values.iter().map(|&v| quantize(v, precision_bits)).collect()
}
