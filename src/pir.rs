use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::params::LweParams;

/// Seed for deterministic matrix generation (32 bytes for ChaCha20)
pub type MatrixSeed = [u8; 32];

/// LWE public matrix A (shared between client and server)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LweMatrix {
    pub data: Vec<u64>, // row-major: A[i][j] = data[i * cols + j]
    pub rows: usize,    // M (db.cols)
    pub cols: usize,    // n (LWE dimension)
}

/// Client hint: preprocessed db · A
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHint {
    pub data: Vec<u64>, // row-major: hint_c[i][j]
    pub rows: usize,    // L (db.rows)
    pub cols: usize,    // n
}

impl LweMatrix {
    /// Draw a fresh seed
    pub fn generate_seed(rng: &mut impl Rng) -> MatrixSeed {
        let mut seed = [0u8; 32];
        rng.fill(&mut seed);
        seed
    }

    /// Expand A from a seed with ChaCha20; both sides derive the same matrix
    pub fn from_seed(seed: &MatrixSeed, rows: usize, cols: usize) -> Self {
        let mut prg = ChaCha20Rng::from_seed(*seed);
        let data: Vec<u64> = (0..rows * cols)
            .map(|_| prg.random()) // uniform in ℤ_q after masking
            .collect();
        Self { data, rows, cols }
    }

    /// Get element A[row, col]
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data[row * self.cols + col]
    }

    /// Row i of A
    #[inline]
    pub fn row(&self, i: usize) -> &[u64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

impl ClientHint {
    #[inline]
    pub fn row(&self, i: usize) -> &[u64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

// ============================================================================
// Protocol Messages (what travels between client & server)
// ============================================================================

/// Shape of the database as the engine sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInfo {
    pub rows: usize,         // L
    pub cols: usize,         // M
    pub plaintext_bits: u32, // p = 2^plaintext_bits
    pub params: LweParams,
}

/// Sent from server to client once, at session setup.
/// Contains the seed (32 bytes) instead of the full A matrix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineHint {
    pub matrix_seed: MatrixSeed,
    pub info: DbInfo,
}

/// Client's request for fresh preprocessing material
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintQuery {
    pub round: u64,
}

/// Server's reply to a [`HintQuery`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintAnswer {
    pub round: u64,
    pub hint_c: ClientHint,
}

/// Client's query (sent to server)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query(pub Vec<u64>); // M elements

/// Server's answer (sent to client)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer(pub Vec<u64>); // L elements

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_matrix_generation() {
        let seed: MatrixSeed = [42u8; 32];
        let a1 = LweMatrix::from_seed(&seed, 10, 8);
        let a2 = LweMatrix::from_seed(&seed, 10, 8);
        assert_eq!(a1, a2, "Same seed should produce identical matrix");

        let a3 = LweMatrix::from_seed(&[43u8; 32], 10, 8);
        assert_ne!(a1.data, a3.data, "Different seeds should produce different matrices");
    }

    #[test]
    fn test_matrix_rows() {
        let a = LweMatrix::from_seed(&[7u8; 32], 3, 4);
        assert_eq!(a.row(1), &a.data[4..8]);
        assert_eq!(a.get(2, 3), a.data[11]);
    }

    #[test]
    fn test_messages_serialize() {
        let hint = EngineHint {
            matrix_seed: [9u8; 32],
            info: DbInfo {
                rows: 100,
                cols: 10,
                plaintext_bits: 15,
                params: LweParams::default_128bit(),
            },
        };
        let bytes = bincode::serialize(&hint).unwrap();
        let decoded: EngineHint = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, hint);

        let answer = HintAnswer {
            round: 3,
            hint_c: ClientHint {
                data: vec![1, 2, 3, 4, 5, 6],
                rows: 2,
                cols: 3,
            },
        };
        let bytes = bincode::serialize(&answer).unwrap();
        let decoded: HintAnswer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.hint_c.row(1), &[4, 5, 6]);
    }
}
