use rand::Rng;
use tracing::trace;

use crate::{
    error::{Result, SearchError},
    pir::{Answer, DbInfo, EngineHint, HintAnswer, HintQuery, LweMatrix, Query},
    pir_trait::{CommunicationCost, PirClient, PirProtocol, SparseVector},
    regev::{SecretKey, dot_product, encrypt, round_decode, sample_secret},
    session::RoundPhase,
};

// ============================================================================
// SimplePIR Protocol Type
// ============================================================================

/// Marker type for the reference SimplePIR-style engine
pub struct SimplePir;

impl PirProtocol for SimplePir {
    type Setup = EngineHint;
    type HintQuery = HintQuery;
    type HintAnswer = HintAnswer;
    type Query = Query;
    type Answer = Answer;
}

/// Single-use secret state: a fresh secret and its folded hint
struct QueryKey {
    secret: Vec<u64>,
    hint_s: Vec<u64>, // hint_c · s, one entry per database row
}

/// Client state (reusable across rounds)
pub struct SimplePirClient {
    a: LweMatrix, // Regenerated from seed, not stored/transmitted
    info: DbInfo,
    round: u64,
    prepared: Option<QueryKey>,
    in_flight: Option<QueryKey>,
}

impl SimplePirClient {
    /// Initialize client from setup message.
    /// Regenerates matrix A locally from the seed using ChaCha20.
    pub fn new(hint: &EngineHint) -> Result<Self> {
        let info = hint.info;
        info.params.validate()?;
        if info.rows == 0 || info.cols == 0 {
            return Err(SearchError::InvalidParams(format!(
                "empty database shape {} x {}",
                info.rows, info.cols
            )));
        }
        if info.plaintext_bits == 0 || info.plaintext_bits >= info.params.log_q {
            return Err(SearchError::InvalidParams(format!(
                "plaintext width {} must be in 1..{}",
                info.plaintext_bits, info.params.log_q
            )));
        }
        let a = LweMatrix::from_seed(&hint.matrix_seed, info.cols, info.params.n);
        Ok(Self {
            a,
            info,
            round: 0,
            prepared: None,
            in_flight: None,
        })
    }

    fn phase(&self) -> RoundPhase {
        match (&self.prepared, &self.in_flight) {
            (Some(_), _) => RoundPhase::HintApplied,
            (None, Some(_)) => RoundPhase::QuerySent,
            (None, None) => RoundPhase::Idle,
        }
    }

    /// Fold the server hint with a fresh secret
    pub fn apply_hint(&mut self, answer: &HintAnswer, rng: &mut impl Rng) -> Result<()> {
        if answer.round != self.round {
            return Err(SearchError::MalformedMessage {
                what: "hint answer round",
                expected: self.round as usize,
                actual: answer.round as usize,
            });
        }
        let hint_c = &answer.hint_c;
        if hint_c.rows != self.info.rows || hint_c.cols != self.info.params.n {
            return Err(SearchError::MalformedMessage {
                what: "hint answer",
                expected: self.info.rows * self.info.params.n,
                actual: hint_c.rows * hint_c.cols,
            });
        }
        if hint_c.data.len() != hint_c.rows * hint_c.cols {
            return Err(SearchError::MalformedMessage {
                what: "hint answer",
                expected: hint_c.rows * hint_c.cols,
                actual: hint_c.data.len(),
            });
        }

        let mask = self.info.params.q_mask();
        let secret = sample_secret(&self.info.params, rng);
        let hint_s = (0..hint_c.rows)
            .map(|i| dot_product(hint_c.row(i), &secret) & mask)
            .collect();

        self.prepared = Some(QueryKey { secret, hint_s });
        self.in_flight = None;
        trace!("round {}: preprocessing refreshed", self.round);
        Ok(())
    }

    /// Query: qu = A·s + e + Δ·v
    pub fn query(&mut self, plaintext: &SparseVector, rng: &mut impl Rng) -> Result<Query> {
        if plaintext.len != self.info.cols || !plaintext.is_well_formed() {
            return Err(SearchError::MalformedMessage {
                what: "query plaintext",
                expected: self.info.cols,
                actual: plaintext.len.max(plaintext.offset + plaintext.values.len()),
            });
        }
        let Some(key) = self.prepared.take() else {
            return Err(SearchError::PhaseViolation {
                operation: "build_query",
                expected: RoundPhase::HintApplied,
                actual: self.phase(),
            });
        };

        let sk = SecretKey { s: &key.secret };
        let query_data: Vec<u64> = (0..self.info.cols)
            .map(|i| {
                encrypt(
                    &self.info.params,
                    self.info.plaintext_bits,
                    self.a.row(i),
                    &sk,
                    plaintext.get(i),
                    rng,
                )
            })
            .collect();

        self.in_flight = Some(key);
        Ok(Query(query_data))
    }

    /// Recover: one residue mod p per database row.
    ///
    /// Row i is Regev-decrypted as (hint_c[i,:], ans[i]); hint_c · s was
    /// folded in advance.
    pub fn recover(&mut self, answer: &Answer) -> Result<Vec<u64>> {
        if answer.0.len() != self.info.rows {
            return Err(SearchError::MalformedMessage {
                what: "answer",
                expected: self.info.rows,
                actual: answer.0.len(),
            });
        }
        let Some(key) = self.in_flight.take() else {
            return Err(SearchError::PhaseViolation {
                operation: "recover_answer",
                expected: RoundPhase::QuerySent,
                actual: self.phase(),
            });
        };

        Ok(answer
            .0
            .iter()
            .zip(&key.hint_s)
            .map(|(&ans, &hs)| {
                round_decode(ans.wrapping_sub(hs), &self.info.params, self.info.plaintext_bits)
            })
            .collect())
    }
}

// ============================================================================
// Trait Implementations for SimplePIR
// ============================================================================

impl PirClient for SimplePirClient {
    type Protocol = SimplePir;

    fn from_setup(setup: &EngineHint) -> Result<Self> {
        SimplePirClient::new(setup)
    }

    fn hint_query(&mut self) -> HintQuery {
        self.round += 1;
        HintQuery { round: self.round }
    }

    fn apply_hint_answer(&mut self, answer: &HintAnswer, rng: &mut impl Rng) -> Result<()> {
        self.apply_hint(answer, rng)
    }

    fn build_query(&mut self, plaintext: &SparseVector, rng: &mut impl Rng) -> Result<Query> {
        self.query(plaintext, rng)
    }

    fn recover_answer(&mut self, answer: &Answer) -> Result<Vec<u64>> {
        self.recover(answer)
    }

    fn plaintext_modulus(&self) -> u64 {
        1u64 << self.info.plaintext_bits
    }

    fn db_rows(&self) -> usize {
        self.info.rows
    }

    fn db_cols(&self) -> usize {
        self.info.cols
    }
}

// ============================================================================
// Communication Cost Implementations
// ============================================================================

impl CommunicationCost for EngineHint {
    fn size_bytes(&self) -> usize {
        // matrix_seed: 32 bytes
        // dimensions and parameters: 7 words
        32 + 7 * std::mem::size_of::<u64>()
    }
}

impl CommunicationCost for HintQuery {
    fn size_bytes(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}

impl CommunicationCost for HintAnswer {
    fn size_bytes(&self) -> usize {
        // round + hint_c: rows * cols * 8 bytes
        std::mem::size_of::<u64>() + self.hint_c.data.len() * std::mem::size_of::<u64>()
    }
}

impl CommunicationCost for Query {
    fn size_bytes(&self) -> usize {
        self.0.len() * std::mem::size_of::<u64>()
    }
}

impl CommunicationCost for Answer {
    fn size_bytes(&self) -> usize {
        self.0.len() * std::mem::size_of::<u64>()
    }
}
