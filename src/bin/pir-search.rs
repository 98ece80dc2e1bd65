//! pir-search: run a file of private nearest-neighbour queries
//!
//! Reads `{preamble}_metadata.json` and `{preamble}_cluster_{i}.csv`, builds
//! the search database, then answers every line of `{preamble}_queries.csv`
//! through a full PIR round. Results and per-round timings go to
//! `{preamble}_results*.csv` and `{preamble}_perf*.csv`.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pir_search::dataset::{
    DatasetPaths, PerfWriter, QueryReader, ResultWriter, ValueEncoding, load_clusters,
};
use pir_search::params::{DEFAULT_HINT_SIZE, LweParams, ROWS_PER_HINT_UNIT, SearchConfig};
use pir_search::pir_trait::CommunicationCost;
use pir_search::{SelectionMode, SimpleSearchClient, SimpleSearchServer, run_round};

#[derive(Parser)]
#[command(name = "pir-search")]
#[command(about = "Private top-k nearest-neighbour search over clustered embeddings")]
#[command(version)]
struct Args {
    /// Dataset path prefix, e.g. data/msmarco/test
    #[arg(long)]
    preamble: PathBuf,

    /// Number of results to write per query
    #[arg(long, default_value_t = 10)]
    top_k: usize,

    /// Bits per quantized coordinate (default: the metadata's prec_bits)
    #[arg(long)]
    prec_bits: Option<u32>,

    /// Rank only the queried cluster instead of its whole bin
    #[arg(long)]
    cluster_only: bool,

    /// Desired maximum rows per bin
    #[arg(long, default_value_t = DEFAULT_HINT_SIZE * ROWS_PER_HINT_UNIT)]
    capacity_hint: usize,

    /// LWE secret dimension of the reference engine
    #[arg(long, default_value_t = 1024)]
    lwe_dim: usize,

    /// Cluster files hold already-discretized integers
    #[arg(long)]
    integer_input: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let args = Args::parse();
    if args.top_k == 0 {
        return Err(eyre::eyre!("top-k must be a positive integer"));
    }

    let encoding = if args.integer_input {
        ValueEncoding::Integer
    } else {
        ValueEncoding::Float
    };
    let paths = DatasetPaths::new(&args.preamble);

    info!("Preamble: {}", args.preamble.display());
    info!("Top K: {}", args.top_k);

    let build_start = Instant::now();
    let (metadata, clusters) = load_clusters(&paths, args.prec_bits, encoding)
        .wrap_err_with(|| format!("loading dataset {}", args.preamble.display()))?;

    let config = SearchConfig {
        capacity_hint: args.capacity_hint,
        precision_bits: metadata.precision_bits,
        lwe: LweParams {
            n: args.lwe_dim,
            ..LweParams::default_128bit()
        },
        mode: if args.cluster_only {
            SelectionMode::ClusterOnly
        } else {
            SelectionMode::BinWide
        },
        top_k: args.top_k,
    };
    info!("Mode: {:?}", config.mode);

    let mut rng = rand::rng();
    let server = SimpleSearchServer::build(&metadata, &clusters, &config, &mut rng)
        .wrap_err("building search database")?;
    info!("Server database construction time: {:?}", build_start.elapsed());
    info!("Hint size: {} bytes", server.hint().size_bytes());

    let mut client = SimpleSearchClient::new(server.hint()).wrap_err("joining as client")?;

    let queries = QueryReader::open(paths.queries(), metadata.dim, metadata.precision_bits)
        .wrap_err("opening query file")?;
    let mut results = ResultWriter::create(paths.results(config.mode), config.top_k)?;
    let mut perf = PerfWriter::create(paths.perf(config.mode))?;

    let mut count = 0usize;
    for record in queries {
        let record = record?;
        let outcome = run_round(
            &server,
            &mut client,
            &record.embedding,
            record.cluster_id,
            config.mode,
            &mut rng,
        )
        .wrap_err_with(|| format!("query {count} (cluster {})", record.cluster_id))?;
        results.write(&outcome.scores)?;
        perf.write(&outcome.perf)?;

        count += 1;
        if count % 1000 == 0 {
            info!("Processed {} queries", count);
        }
    }

    info!("Done: {} queries", count);
    Ok(())
}
