//! Plaintext modulus selection and residue (un)wrapping.
//!
//! Inner products are computed in ℤ_p. As long as p is at least
//! 2 · 2^(2B-2) · dim, every score a database can produce lies strictly
//! inside (-p/2, p/2] and unwraps to the exact signed value.

use tracing::debug;

use crate::error::{Result, SearchError};
use crate::params::LweParams;

/// Largest inner product two `dim`-long, `precision_bits`-wide vectors may
/// produce, with a factor-two margin: 2 · 2^(2B-2) · dim.
pub fn max_inner_product(precision_bits: u32, dim: usize) -> u128 {
    let bits = precision_bits.max(1);
    2 * (1u128 << (2 * bits - 2)) * dim as u128
}

/// Worst-case noise a database with `cols` columns adds to one answer row
pub fn worst_case_noise(params: &LweParams, precision_bits: u32, cols: usize) -> u128 {
    let max_entry = 1u128 << (precision_bits.max(1) - 1);
    cols as u128 * max_entry * params.noise_bound as u128
}

/// Choose p = 2^bits for a database of `cols` columns storing `dim`-long
/// vectors at `precision_bits`.
///
/// Starts from `params.record_bits` and widens until inner products cannot
/// wrap. Fails when the required width does not fit the ring, or when the
/// remaining gap Δ = q/p is too narrow for the engine noise.
pub fn select_plaintext_bits(
    params: &LweParams,
    precision_bits: u32,
    dim: usize,
    cols: usize,
) -> Result<u32> {
    let required = max_inner_product(precision_bits, dim);
    let mut bits = params.record_bits.max(precision_bits);
    while (1u128 << bits) < required {
        bits += 1;
    }

    let noise = worst_case_noise(params, precision_bits, cols);
    let viable = bits < params.log_q && 2 * noise < (1u128 << (params.log_q - bits));
    if !viable {
        return Err(SearchError::NoViableModulus {
            required_bits: bits,
            log_q: params.log_q,
            noise,
        });
    }

    debug!(
        "plaintext modulus 2^{} (max inner product {}, noise {})",
        bits, required, noise
    );
    Ok(bits)
}

/// Map a signed value into [0, modulus)
#[inline]
pub fn wrap_residue(value: i64, modulus: u64) -> u64 {
    (value as i128).rem_euclid(modulus as i128) as u64
}

/// Interpret a residue as a signed value: v if v ≤ p/2, else v − p.
///
/// Returns `None` when `value > modulus`, which no well-behaved engine produces.
#[inline]
pub fn unwrap_residue(value: u64, modulus: u64) -> Option<i64> {
    if value > modulus {
        return None;
    }
    if value > modulus / 2 {
        Some((value as i128 - modulus as i128) as i64)
    } else {
        Some(value as i64)
    }
}

/// Unwrap a whole answer, reporting the first offending row
pub fn unwrap_residues(values: &[u64], modulus: u64) -> Result<Vec<i64>> {
    values
        .iter()
        .enumerate()
        .map(|(row, &value)| {
            unwrap_residue(value, modulus).ok_or(SearchError::ResidueOutOfRange {
                row,
                value,
                modulus,
            })
        })
        .collect()
}
