//! Trait-based interface to the PIR engine.
//!
//! The search layer only ever talks to the engine through these traits:
//! one-time setup, the hint phase (hint query, hint answer, apply) and the
//! query phase (build query, answer, recover). Any engine that can encrypt a
//! sparse plaintext vector and multiply the database by it homomorphically
//! fits behind them; [`SimplePir`](crate::client::SimplePir) is the bundled
//! reference implementation.

use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};

use crate::{database::PlaintextMatrix, error::Result, params::LweParams};

/// Core PIR protocol trait: the message types exchanged by one engine.
pub trait PirProtocol {
    /// One-time setup data from server to client (part of the search hint)
    type Setup: Clone + Serialize + DeserializeOwned + CommunicationCost;
    /// Client request opening a round's hint phase
    type HintQuery: CommunicationCost;
    /// Server reply carrying fresh preprocessing material
    type HintAnswer: CommunicationCost;
    /// Query sent from client to server
    type Query: CommunicationCost;
    /// Answer sent from server to client
    type Answer: CommunicationCost;
}

/// Server-side PIR operations.
///
/// The server state is read-only after setup and may be shared between
/// any number of concurrent sessions.
pub trait PirServer: Sized + Sync {
    /// The protocol this server implements
    type Protocol: PirProtocol;

    /// Preprocess the database once. Returns the server state and the setup
    /// data every client needs.
    fn setup(
        db: PlaintextMatrix,
        params: &LweParams,
        rng: &mut impl Rng,
    ) -> Result<(Self, <Self::Protocol as PirProtocol>::Setup)>;

    /// Answer a hint query with fresh preprocessing material
    fn hint_answer(
        &self,
        query: &<Self::Protocol as PirProtocol>::HintQuery,
    ) -> Result<<Self::Protocol as PirProtocol>::HintAnswer>;

    /// Compute the homomorphic answer over the whole database
    fn answer(
        &self,
        query: &<Self::Protocol as PirProtocol>::Query,
    ) -> Result<<Self::Protocol as PirProtocol>::Answer>;
}

/// Client-side PIR operations.
///
/// Preprocessing material installed by `apply_hint_answer` is single-use:
/// `build_query` consumes it and `recover_answer` consumes the secret of the
/// query in flight.
pub trait PirClient: Sized {
    /// The protocol this client implements
    type Protocol: PirProtocol;

    /// Initialize client from server's setup data
    fn from_setup(setup: &<Self::Protocol as PirProtocol>::Setup) -> Result<Self>;

    /// Open a hint phase
    fn hint_query(&mut self) -> <Self::Protocol as PirProtocol>::HintQuery;

    /// Install fresh preprocessing material
    fn apply_hint_answer(
        &mut self,
        answer: &<Self::Protocol as PirProtocol>::HintAnswer,
        rng: &mut impl Rng,
    ) -> Result<()>;

    /// Encrypt a plaintext vector of length `db_cols()`
    fn build_query(
        &mut self,
        plaintext: &SparseVector,
        rng: &mut impl Rng,
    ) -> Result<<Self::Protocol as PirProtocol>::Query>;

    /// Decrypt an answer into one residue mod p per database row
    fn recover_answer(
        &mut self,
        answer: &<Self::Protocol as PirProtocol>::Answer,
    ) -> Result<Vec<u64>>;

    /// p
    fn plaintext_modulus(&self) -> u64;

    /// L
    fn db_rows(&self) -> usize;

    /// M
    fn db_cols(&self) -> usize;
}

// ============================================================================
// Query plaintexts
// ============================================================================

/// A length-`len` vector that is zero except for `values` starting at `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseVector {
    pub len: usize,
    pub offset: usize,
    pub values: Vec<i64>,
}

impl SparseVector {
    pub fn new(len: usize, offset: usize, values: Vec<i64>) -> Self {
        Self {
            len,
            offset,
            values,
        }
    }

    /// Entry `i` of the dense vector
    #[inline]
    pub fn get(&self, i: usize) -> i64 {
        if i >= self.offset && i < self.offset + self.values.len() {
            self.values[i - self.offset]
        } else {
            0
        }
    }

    /// Whether the nonzero window lies inside the vector
    pub fn is_well_formed(&self) -> bool {
        self.offset + self.values.len() <= self.len
    }

    #[cfg(test)]
    fn to_dense(&self) -> Vec<i64> {
        (0..self.len).map(|i| self.get(i)).collect()
    }
}

// ============================================================================
// Communication cost estimation
// ============================================================================

/// Trait for estimating communication costs.
///
/// Useful for benchmarking and for the per-round performance record.
pub trait CommunicationCost {
    /// Size in bytes when serialized
    fn size_bytes(&self) -> usize;
}
