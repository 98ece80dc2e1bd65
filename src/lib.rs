//! Private top-k nearest-neighbour search over a PIR engine
//!
//! The server packs clustered, quantized embeddings into one matrix so that
//! a single homomorphic matrix-vector product scores a query against every
//! vector in the target cluster's column block. The client learns the
//! scores; the server learns nothing about which cluster was queried.
//!
//! Key components:
//! - `quantize`, `packing`, `database`: turn clusters into a plaintext matrix
//!   plus the cluster index map
//! - `pir_trait`: the engine boundary; `server` / `client` provide a
//!   SimplePIR-style reference engine behind it
//! - `session`: hint phase and query phase per round
//! - `reconstruct`: residues back to ranked scores

pub mod error;
pub mod params;
pub mod quantize;
pub mod modulus;
pub mod packing;
pub mod database;
pub mod pir;
pub mod regev;
pub mod pir_trait;
pub mod server;
pub mod client;
pub mod session;
pub mod reconstruct;
pub mod dataset;
pub mod metrics;

pub use client::{SimplePir, SimplePirClient};
pub use database::{Cluster, ClusterIndexMap, ClusterLayout, Metadata, VectorDatabase};
pub use error::{FaultKind, Result, SearchError};
pub use params::{LweParams, SearchConfig};
pub use reconstruct::{SelectionMode, VectorScore};
pub use server::SimplePirServer;
pub use session::{
    Hint, RoundOutcome, RoundPhase, SearchClient, SearchHint, SearchServer, run_round,
};

/// Search server backed by the reference engine
pub type SimpleSearchServer = SearchServer<SimplePirServer>;

/// Search client backed by the reference engine
pub type SimpleSearchClient = SearchClient<SimplePirClient>;
