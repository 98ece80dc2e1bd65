use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::quantize::MAX_PRECISION_BITS;
use crate::reconstruct::SelectionMode;

/// Hint size used by Tiptoe for text embeddings
pub const DEFAULT_HINT_SIZE: usize = 900;

/// Database rows per unit of hint size
pub const ROWS_PER_HINT_UNIT: usize = 125;

/// Ring parameters of the reference LWE engine.
///
/// Ciphertexts live in ℤ_q with q = 2^log_q; all arithmetic is wrapping `u64`
/// masked down to `log_q` bits. The plaintext modulus p = 2^plaintext_bits is
/// not fixed here: it is chosen per database by
/// [`select_plaintext_bits`](crate::modulus::select_plaintext_bits), starting
/// from `record_bits`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LweParams {
    pub n: usize,           // LWE dimension (e.g., 1024)
    pub log_q: u32,         // Ciphertext modulus width (q = 2^log_q)
    pub record_bits: u32,   // Smallest plaintext width tried (Tiptoe uses 15)
    pub noise_bound: u64,   // Noise is uniform in [-noise_bound, noise_bound]
}

impl LweParams {
    pub fn default_128bit() -> Self {
        Self {
            n: 1024,
            log_q: 64,
            record_bits: 15,
            noise_bound: 8,
        }
    }

    /// Bit mask reducing a wrapping `u64` into ℤ_q
    #[inline]
    pub fn q_mask(&self) -> u64 {
        if self.log_q >= 64 {
            u64::MAX
        } else {
            (1u64 << self.log_q) - 1
        }
    }

    /// Scaling factor Δ = q / p for p = 2^plaintext_bits
    #[inline]
    pub fn delta(&self, plaintext_bits: u32) -> u64 {
        1u64 << (self.log_q - plaintext_bits)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(SearchError::InvalidParams("LWE dimension must be positive".into()));
        }
        if !(16..=64).contains(&self.log_q) {
            return Err(SearchError::InvalidParams(format!(
                "ring width {} outside 16..=64",
                self.log_q
            )));
        }
        if self.record_bits == 0 || self.record_bits >= self.log_q {
            return Err(SearchError::InvalidParams(format!(
                "record width {} must be in 1..{}",
                self.record_bits, self.log_q
            )));
        }
        Ok(())
    }
}

impl Default for LweParams {
    fn default() -> Self {
        Self::default_128bit()
    }
}

/// Knobs for building and querying a search database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Desired maximum rows per bin (H)
    pub capacity_hint: usize,
    /// Bits per quantized coordinate
    pub precision_bits: u32,
    pub lwe: LweParams,
    pub mode: SelectionMode,
    pub top_k: usize,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.precision_bits == 0 || self.precision_bits > MAX_PRECISION_BITS {
            return Err(SearchError::InvalidPrecision {
                bits: self.precision_bits,
                max: MAX_PRECISION_BITS,
            });
        }
        if self.top_k == 0 {
            return Err(SearchError::InvalidParams("top_k must be positive".into()));
        }
        self.lwe.validate()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            capacity_hint: DEFAULT_HINT_SIZE * ROWS_PER_HINT_UNIT,
            precision_bits: 5,
            lwe: LweParams::default_128bit(),
            mode: SelectionMode::BinWide,
            top_k: 10,
        }
    }
}
