//! Session orchestration: one server-built database, any number of clients.
//!
//! Every round runs the hint phase before the query phase, because the
//! engine's preprocessing material is consumed by exactly one query:
//!
//! ```text
//!   Idle ─hint_query─▶ HintRequested ─apply_hint_answer─▶ HintApplied
//!    ▲                                                        │ query
//!    │                                                        ▼
//!  Reconstructed ◀─reconstruct─ AnswerReceived ◀─recover_answer─ QuerySent
//! ```

use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, trace};

use crate::{
    database::{Cluster, ClusterEntry, ClusterIndexMap, ClusterLayout, Metadata, VectorDatabase},
    error::{Result, SearchError},
    metrics::QueryPerf,
    packing::Packing,
    params::SearchConfig,
    pir_trait::{CommunicationCost, PirClient, PirProtocol, PirServer, SparseVector},
    quantize,
    reconstruct::{SelectionMode, VectorScore, reconstruct},
};

/// Where a client session stands within its current round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    HintRequested,
    HintApplied,
    QuerySent,
    AnswerReceived,
    Reconstructed,
}

/// Everything a client needs to join: dataset facts, the engine's setup
/// data and the cluster index map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint<E> {
    pub metadata: Metadata,
    pub engine: E,
    pub index: ClusterIndexMap,
}

/// The hint shipped by engine protocol `P`
pub type SearchHint<P> = Hint<<P as PirProtocol>::Setup>;

impl<E: Serialize> Hint<E> {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

impl<E: DeserializeOwned> Hint<E> {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl<E: CommunicationCost> CommunicationCost for Hint<E> {
    fn size_bytes(&self) -> usize {
        // metadata: 4 words, index: 3 words per cluster
        self.engine.size_bytes() + (4 + 3 * self.index.len()) * std::mem::size_of::<u64>()
    }
}

// ============================================================================
// Server
// ============================================================================

/// Search server: the packed database behind a PIR engine.
///
/// Read-only after [`build`](Self::build); share it by reference across
/// concurrent sessions.
pub struct SearchServer<S: PirServer> {
    engine: S,
    hint: SearchHint<S::Protocol>,
    layout: ClusterLayout,
    packing: Packing,
}

impl<S: PirServer> SearchServer<S> {
    /// Pack the clusters, lay out the database and run engine setup
    pub fn build(
        metadata: &Metadata,
        clusters: &[Cluster],
        config: &SearchConfig,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        config.validate()?;
        if config.precision_bits != metadata.precision_bits {
            return Err(SearchError::PrecisionConflict {
                config: config.precision_bits,
                metadata: metadata.precision_bits,
            });
        }
        let start = Instant::now();

        let VectorDatabase {
            matrix,
            layout,
            packing,
        } = VectorDatabase::build(metadata, clusters, config.capacity_hint, &config.lwe)?;
        let (engine, setup) = S::setup(matrix, &config.lwe, rng)?;

        let hint = Hint {
            metadata: *metadata,
            engine: setup,
            index: layout.index.clone(),
        };
        info!(
            "search server ready: {} clusters in {} bins, built in {:?}",
            metadata.num_clusters,
            packing.num_bins(),
            start.elapsed()
        );

        Ok(Self {
            engine,
            hint,
            layout,
            packing,
        })
    }

    pub fn hint(&self) -> &SearchHint<S::Protocol> {
        &self.hint
    }

    pub fn layout(&self) -> &ClusterLayout {
        &self.layout
    }

    pub fn packing(&self) -> &Packing {
        &self.packing
    }

    pub fn hint_answer(
        &self,
        query: &<S::Protocol as PirProtocol>::HintQuery,
    ) -> Result<<S::Protocol as PirProtocol>::HintAnswer> {
        trace!("answering hint query");
        self.engine.hint_answer(query)
    }

    pub fn answer(
        &self,
        query: &<S::Protocol as PirProtocol>::Query,
    ) -> Result<<S::Protocol as PirProtocol>::Answer> {
        trace!("answering query");
        self.engine.answer(query)
    }
}

// ============================================================================
// Client
// ============================================================================

/// One client session. Strictly sequential: a round must finish (or be
/// [`reset`](Self::reset)) before the next begins.
pub struct SearchClient<C: PirClient> {
    engine: C,
    metadata: Metadata,
    layout: ClusterLayout,
    phase: RoundPhase,
    target: Option<usize>,
    residues: Option<Vec<u64>>,
}

impl<C: PirClient> SearchClient<C> {
    /// Join a server from its hint
    pub fn new(hint: &SearchHint<C::Protocol>) -> Result<Self> {
        let engine = C::from_setup(&hint.engine)?;
        let layout = ClusterLayout::from_index(
            hint.index.clone(),
            engine.db_rows(),
            engine.db_cols(),
            hint.metadata.dim,
        )?;
        if layout.num_clusters() != hint.metadata.num_clusters {
            return Err(SearchError::ClusterCountMismatch {
                expected: hint.metadata.num_clusters,
                actual: layout.num_clusters(),
            });
        }
        debug!(
            "client joined: {} x {} database, {} clusters",
            layout.rows,
            layout.cols,
            layout.num_clusters()
        );

        Ok(Self {
            engine,
            metadata: hint.metadata,
            layout,
            phase: RoundPhase::Idle,
            target: None,
            residues: None,
        })
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn layout(&self) -> &ClusterLayout {
        &self.layout
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Abandon the current round. The next round starts with a fresh hint
    /// phase.
    pub fn reset(&mut self) {
        self.transition(RoundPhase::Idle);
        self.target = None;
        self.residues = None;
    }

    fn require(&self, operation: &'static str, expected: RoundPhase) -> Result<()> {
        if self.phase != expected {
            return Err(SearchError::PhaseViolation {
                operation,
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: RoundPhase) {
        trace!("{:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Open a round's hint phase
    pub fn hint_query(&mut self) -> Result<<C::Protocol as PirProtocol>::HintQuery> {
        self.require("hint_query", RoundPhase::Idle)?;
        let query = self.engine.hint_query();
        self.transition(RoundPhase::HintRequested);
        Ok(query)
    }

    /// Refresh the single-use preprocessing state
    pub fn apply_hint_answer(
        &mut self,
        answer: &<C::Protocol as PirProtocol>::HintAnswer,
        rng: &mut impl Rng,
    ) -> Result<()> {
        self.require("apply_hint_answer", RoundPhase::HintRequested)?;
        self.engine.apply_hint_answer(answer, rng)?;
        self.transition(RoundPhase::HintApplied);
        Ok(())
    }

    /// Check that `cluster_id` exists and `embedding` has the database
    /// dimension. Touches neither the engine nor the round phase.
    pub fn check_target(&self, cluster_id: usize, embedding: &[i8]) -> Result<ClusterEntry> {
        let num_clusters = self.metadata.num_clusters;
        let entry = match self.layout.index.get(cluster_id) {
            Some(entry) if cluster_id < num_clusters => *entry,
            _ => {
                return Err(SearchError::ClusterOutOfRange {
                    cluster_id,
                    num_clusters,
                });
            }
        };
        if embedding.len() != self.layout.dim {
            return Err(SearchError::EmbeddingDimension {
                expected: self.layout.dim,
                actual: embedding.len(),
            });
        }
        Ok(entry)
    }

    /// Encrypt `embedding` against the columns of `cluster_id`'s bin.
    ///
    /// Caller faults are detected before the engine is touched, so the
    /// session stays in `HintApplied` and may retry with a valid query.
    pub fn query(
        &mut self,
        embedding: &[i8],
        cluster_id: usize,
        rng: &mut impl Rng,
    ) -> Result<<C::Protocol as PirProtocol>::Query> {
        self.require("query", RoundPhase::HintApplied)?;
        let entry = self.check_target(cluster_id, embedding)?;

        let precision_bits = self.metadata.precision_bits;
        let values = embedding
            .iter()
            .map(|&v| quantize::clamp(v as i64, precision_bits) as i64)
            .collect();
        let offset = entry.flat_index % self.layout.cols;
        let plaintext = SparseVector::new(self.layout.cols, offset, values);

        let query = self.engine.build_query(&plaintext, rng)?;
        self.target = Some(cluster_id);
        self.transition(RoundPhase::QuerySent);
        Ok(query)
    }

    /// Decrypt the server's answer into per-row residues
    pub fn recover_answer(&mut self, answer: &<C::Protocol as PirProtocol>::Answer) -> Result<()> {
        self.require("recover_answer", RoundPhase::QuerySent)?;
        let residues = self.engine.recover_answer(answer)?;
        self.residues = Some(residues);
        self.transition(RoundPhase::AnswerReceived);
        Ok(())
    }

    /// Rank the recovered round and return to `Idle`
    pub fn reconstruct(&mut self, mode: SelectionMode) -> Result<Vec<VectorScore>> {
        self.require("reconstruct", RoundPhase::AnswerReceived)?;
        let (Some(cluster_id), Some(residues)) = (self.target, self.residues.as_deref()) else {
            return Err(SearchError::PhaseViolation {
                operation: "reconstruct",
                expected: RoundPhase::AnswerReceived,
                actual: self.phase,
            });
        };

        let scores = reconstruct(
            residues,
            self.engine.plaintext_modulus(),
            &self.layout,
            cluster_id,
            mode,
        )?;
        self.transition(RoundPhase::Reconstructed);
        self.reset();
        Ok(scores)
    }
}

// ============================================================================
// One full round
// ============================================================================

/// Ranked scores of a round plus its performance record
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub scores: Vec<VectorScore>,
    pub perf: QueryPerf,
}

/// Run hint phase, query phase and reconstruction for one query.
///
/// The target is checked before the hint phase opens. A failure in any
/// later step abandons the round, leaving the session `Idle`.
pub fn run_round<S, C>(
    server: &SearchServer<S>,
    client: &mut SearchClient<C>,
    embedding: &[i8],
    cluster_id: usize,
    mode: SelectionMode,
    rng: &mut impl Rng,
) -> Result<RoundOutcome>
where
    S: PirServer,
    C: PirClient<Protocol = S::Protocol>,
{
    client.check_target(cluster_id, embedding)?;
    let outcome = drive_round(server, client, embedding, cluster_id, mode, rng);
    if outcome.is_err() {
        client.reset();
    }
    outcome
}

fn drive_round<S, C>(
    server: &SearchServer<S>,
    client: &mut SearchClient<C>,
    embedding: &[i8],
    cluster_id: usize,
    mode: SelectionMode,
    rng: &mut impl Rng,
) -> Result<RoundOutcome>
where
    S: PirServer,
    C: PirClient<Protocol = S::Protocol>,
{
    let mut perf = QueryPerf::default();

    let start = Instant::now();
    let hint_query = client.hint_query()?;
    perf.client_hint_query = start.elapsed();
    perf.hint_query_bytes = hint_query.size_bytes();

    let start = Instant::now();
    let hint_answer = server.hint_answer(&hint_query)?;
    perf.server_hint_answer = start.elapsed();
    perf.hint_answer_bytes = hint_answer.size_bytes();

    let start = Instant::now();
    client.apply_hint_answer(&hint_answer, rng)?;
    perf.client_hint_apply = start.elapsed();

    let start = Instant::now();
    let query = client.query(embedding, cluster_id, rng)?;
    perf.client_query = start.elapsed();
    perf.query_bytes = query.size_bytes();

    let start = Instant::now();
    let answer = server.answer(&query)?;
    perf.server_answer = start.elapsed();
    perf.answer_bytes = answer.size_bytes();

    let start = Instant::now();
    client.recover_answer(&answer)?;
    let scores = client.reconstruct(mode)?;
    perf.client_reconstruct = start.elapsed();

    debug!(
        "round for cluster {} done: {} scores, {} online bytes",
        cluster_id,
        scores.len(),
        perf.online_bytes()
    );
    Ok(RoundOutcome { scores, perf })
}
