//! Error types for private vector search
//!
//! Every fault carries enough context (cluster id, row, expected vs. actual)
//! to diagnose it. Nothing in the core retries; callers decide what to do.

use thiserror::Error;

use crate::session::RoundPhase;

/// Coarse classification of a [`SearchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Parameters that make database construction impossible
    Configuration,
    /// Input data that disagrees with its own metadata
    Data,
    /// A request the caller should not have made
    CallerContract,
    /// A broken internal invariant (a bug, never bad input)
    InternalConsistency,
    /// Filesystem or serialization failure
    Io,
}

#[derive(Error, Debug)]
pub enum SearchError {
    // ------------------------------------------------------------------
    // Configuration faults
    // ------------------------------------------------------------------
    #[error("no clusters supplied")]
    NoClusters,

    #[error("unsupported precision: {bits} bits (expected 1..={max})")]
    InvalidPrecision { bits: u32, max: u32 },

    #[error(
        "no viable plaintext modulus: inner products need {required_bits} bits, \
         ring width is {log_q} bits, worst-case noise {noise}"
    )]
    NoViableModulus {
        required_bits: u32,
        log_q: u32,
        noise: u128,
    },

    #[error("configured precision {config} bits disagrees with dataset precision {metadata} bits")]
    PrecisionConflict { config: u32, metadata: u32 },

    #[error("invalid LWE parameters: {0}")]
    InvalidParams(String),

    // ------------------------------------------------------------------
    // Data faults
    // ------------------------------------------------------------------
    #[error("cluster {cluster_id}: dimension mismatch (expected {expected}, got {actual})")]
    DimensionMismatch {
        cluster_id: usize,
        expected: usize,
        actual: usize,
    },

    #[error("cluster {cluster_id}: precision mismatch (expected {expected} bits, got {actual})")]
    PrecisionMismatch {
        cluster_id: usize,
        expected: u32,
        actual: u32,
    },

    #[error("vector count mismatch: metadata declares {expected}, clusters hold {actual}")]
    VectorCountMismatch { expected: usize, actual: usize },

    #[error("cluster count mismatch: metadata declares {expected}, got {actual}")]
    ClusterCountMismatch { expected: usize, actual: usize },

    #[error("cluster {cluster_id} has no vectors")]
    EmptyCluster { cluster_id: usize },

    #[error("cluster {cluster_id}: {len} values is not a whole number of {dim}-dim vectors")]
    RaggedCluster {
        cluster_id: usize,
        len: usize,
        dim: usize,
    },

    #[error("cluster {cluster_id} appears at position {position}; ids must be 0..{count}")]
    ClusterIdMismatch {
        cluster_id: usize,
        position: usize,
        count: usize,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: String,
        line: u64,
        reason: String,
    },

    // ------------------------------------------------------------------
    // Caller-contract faults
    // ------------------------------------------------------------------
    #[error("cluster id {cluster_id} out of range ({num_clusters} clusters)")]
    ClusterOutOfRange {
        cluster_id: usize,
        num_clusters: usize,
    },

    #[error("query embedding has {actual} coordinates, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },

    #[error("round phase violation: {operation} needs {expected:?}, session is {actual:?}")]
    PhaseViolation {
        operation: &'static str,
        expected: RoundPhase,
        actual: RoundPhase,
    },

    // ------------------------------------------------------------------
    // Internal-consistency faults
    // ------------------------------------------------------------------
    #[error("cluster {cluster_id}: rows cover {actual} vectors, index map declares {expected}")]
    CoverageMismatch {
        cluster_id: usize,
        expected: usize,
        actual: usize,
    },

    #[error("cluster {cluster_id}: row {row} exceeds database height {rows}")]
    RowOverflow {
        cluster_id: usize,
        row: usize,
        rows: usize,
    },

    #[error("row {row}: residue {value} exceeds modulus {modulus}")]
    ResidueOutOfRange { row: usize, value: u64, modulus: u64 },

    #[error("cluster {cluster_id} already has an index-map entry")]
    DuplicateIndexEntry { cluster_id: usize },

    #[error("cluster {cluster_id}: row {row} of bin {bin} already belongs to cluster {owner}")]
    OverlappingRows {
        cluster_id: usize,
        bin: usize,
        row: usize,
        owner: usize,
    },

    #[error("cluster {cluster_id}: flat index {flat_index} is not aligned to dimension {dim}")]
    MisalignedIndex {
        cluster_id: usize,
        flat_index: usize,
        dim: usize,
    },

    #[error("malformed {what}: expected {expected} entries, got {actual}")]
    MalformedMessage {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    // ------------------------------------------------------------------
    // I/O and serialization
    // ------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl SearchError {
    /// Which part of the fault taxonomy this error belongs to
    pub fn kind(&self) -> FaultKind {
        use SearchError::*;
        match self {
            NoClusters
            | InvalidPrecision { .. }
            | PrecisionConflict { .. }
            | NoViableModulus { .. }
            | InvalidParams(_) => FaultKind::Configuration,
            DimensionMismatch { .. }
            | PrecisionMismatch { .. }
            | VectorCountMismatch { .. }
            | ClusterCountMismatch { .. }
            | EmptyCluster { .. }
            | RaggedCluster { .. }
            | ClusterIdMismatch { .. }
            | Parse { .. } => FaultKind::Data,
            ClusterOutOfRange { .. } | EmbeddingDimension { .. } | PhaseViolation { .. } => {
                FaultKind::CallerContract
            }
            RowOverflow { .. }
            | CoverageMismatch { .. }
            | ResidueOutOfRange { .. }
            | DuplicateIndexEntry { .. }
            | OverlappingRows { .. }
            | MisalignedIndex { .. }
            | MalformedMessage { .. } => FaultKind::InternalConsistency,
            Io(_) | Json(_) | Csv(_) | Bincode(_) => FaultKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kinds() {
        assert_eq!(SearchError::NoClusters.kind(), FaultKind::Configuration);
        assert_eq!(
            SearchError::VectorCountMismatch {
                expected: 100,
                actual: 99
            }
            .kind(),
            FaultKind::Data
        );
        assert_eq!(
            SearchError::ClusterOutOfRange {
                cluster_id: 7,
                num_clusters: 5
            }
            .kind(),
            FaultKind::CallerContract
        );
        assert_eq!(
            SearchError::ResidueOutOfRange {
                row: 3,
                value: 10,
                modulus: 8
            }
            .kind(),
            FaultKind::InternalConsistency
        );
        assert_eq!(
            SearchError::PrecisionConflict {
                config: 8,
                metadata: 5
            }
            .kind(),
            FaultKind::Configuration
        );
        assert_eq!(
            SearchError::CoverageMismatch {
                cluster_id: 2,
                expected: 20,
                actual: 17
            }
            .kind(),
            FaultKind::InternalConsistency
        );
    }

    #[test]
    fn test_messages_carry_context() {
        let err = SearchError::RowOverflow {
            cluster_id: 4,
            row: 101,
            rows: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("cluster 4"));
        assert!(msg.contains("101"));
        assert!(msg.contains("100"));
    }
}
