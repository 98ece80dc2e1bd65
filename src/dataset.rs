//! Dataset files around a preamble `dir/prefix`:
//!
//! - `prefix_metadata.json`: `{num_vectors, dim, num_clusters[, prec_bits]}`
//! - `prefix_cluster_{i}.csv`: headerless, one vector per row
//! - `prefix_queries.csv`: `cluster_id, x_0, ..., x_{dim-1}` per row
//! - `prefix_results[_cluster_only].csv`, `prefix_perf[_cluster_only].csv`

use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    database::{Cluster, Metadata, validate_clusters},
    error::{Result, SearchError},
    metrics::{PERF_HEADER, QueryPerf},
    quantize,
    reconstruct::{SelectionMode, VectorScore, top_k},
};

/// How cluster files store coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Real-valued coordinates, quantized on load
    Float,
    /// Already-discretized integers, clamped on load
    Integer,
}

/// File names derived from a preamble
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    dir: PathBuf,
    prefix: String,
}

impl DatasetPaths {
    pub fn new(preamble: impl AsRef<Path>) -> Self {
        let preamble = preamble.as_ref();
        let dir = match preamble.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = preamble
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { dir, prefix }
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, suffix))
    }

    pub fn metadata(&self) -> PathBuf {
        self.file("_metadata.json")
    }

    pub fn cluster(&self, id: usize) -> PathBuf {
        self.file(&format!("_cluster_{id}.csv"))
    }

    pub fn queries(&self) -> PathBuf {
        self.file("_queries.csv")
    }

    pub fn results(&self, mode: SelectionMode) -> PathBuf {
        match mode {
            SelectionMode::BinWide => self.file("_results.csv"),
            SelectionMode::ClusterOnly => self.file("_results_cluster_only.csv"),
        }
    }

    pub fn perf(&self, mode: SelectionMode) -> PathBuf {
        match mode {
            SelectionMode::BinWide => self.file("_perf.csv"),
            SelectionMode::ClusterOnly => self.file("_perf_cluster_only.csv"),
        }
    }
}

fn parse_error(path: &Path, line: u64, reason: impl Into<String>) -> SearchError {
    SearchError::Parse {
        path: path.display().to_string(),
        line,
        reason: reason.into(),
    }
}

fn record_line(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |pos| pos.line())
}

fn csv_reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(rdr)
}

// ============================================================================
// Inputs
// ============================================================================

pub fn read_metadata(path: impl AsRef<Path>) -> Result<Metadata> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Load one cluster file
pub fn read_cluster_csv(
    path: impl AsRef<Path>,
    id: usize,
    dim: usize,
    precision_bits: u32,
    encoding: ValueEncoding,
) -> Result<Cluster> {
    let path = path.as_ref();
    let mut reader = csv_reader(File::open(path)?);

    let mut vectors = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != dim {
            return Err(SearchError::DimensionMismatch {
                cluster_id: id,
                expected: dim,
                actual: record.len(),
            });
        }
        for field in record.iter() {
            let value = match encoding {
                ValueEncoding::Float => field
                    .parse::<f64>()
                    .map(|v| quantize::quantize(v, precision_bits))
                    .map_err(|e| e.to_string()),
                ValueEncoding::Integer => field
                    .parse::<i64>()
                    .map(|v| quantize::clamp(v, precision_bits))
                    .map_err(|e| e.to_string()),
            }
            .map_err(|e| parse_error(path, record_line(&record), format!("{field:?}: {e}")))?;
            vectors.push(value);
        }
    }

    Cluster::new(id, dim, precision_bits, vectors)
}

/// Load metadata and every cluster of a dataset.
///
/// `precision_bits` overrides the metadata's `prec_bits` when given.
pub fn load_clusters(
    paths: &DatasetPaths,
    precision_bits: Option<u32>,
    encoding: ValueEncoding,
) -> Result<(Metadata, Vec<Cluster>)> {
    let mut metadata = read_metadata(paths.metadata())?;
    if let Some(bits) = precision_bits {
        metadata.precision_bits = bits;
    }
    info!(
        "building database with {} {}-dim {}-bit vectors, organized in {} clusters",
        metadata.num_vectors, metadata.dim, metadata.precision_bits, metadata.num_clusters
    );

    let clusters = (0..metadata.num_clusters)
        .map(|id| {
            read_cluster_csv(
                paths.cluster(id),
                id,
                metadata.dim,
                metadata.precision_bits,
                encoding,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    validate_clusters(&metadata, &clusters)?;
    Ok((metadata, clusters))
}

/// One line of the query file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub cluster_id: usize,
    pub embedding: Vec<i8>,
}

/// Streams query records; ends cleanly at EOF
pub struct QueryReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    path: PathBuf,
    dim: usize,
    precision_bits: u32,
}

impl QueryReader<File> {
    pub fn open(path: impl AsRef<Path>, dim: usize, precision_bits: u32) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_reader(File::open(path)?, path, dim, precision_bits))
    }
}

impl<R: Read> QueryReader<R> {
    /// `path` is only used to label errors
    pub fn from_reader(
        rdr: R,
        path: impl Into<PathBuf>,
        dim: usize,
        precision_bits: u32,
    ) -> Self {
        Self {
            records: csv_reader(rdr).into_records(),
            path: path.into(),
            dim,
            precision_bits,
        }
    }

    fn parse(&self, record: &csv::StringRecord) -> Result<QueryRecord> {
        let line = record_line(record);
        if record.len() != self.dim + 1 {
            return Err(parse_error(
                &self.path,
                line,
                format!("expected {} columns, got {}", self.dim + 1, record.len()),
            ));
        }
        let cluster_id = record[0].parse::<usize>().map_err(|e| {
            parse_error(&self.path, line, format!("cluster id {:?}: {e}", &record[0]))
        })?;
        let values = record
            .iter()
            .skip(1)
            .map(|field| {
                field
                    .parse::<f64>()
                    .map_err(|e| parse_error(&self.path, line, format!("{field:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let embedding = quantize::quantize_embedding(&values, self.precision_bits);
        Ok(QueryRecord {
            cluster_id,
            embedding,
        })
    }
}

impl<R: Read> Iterator for QueryReader<R> {
    type Item = Result<QueryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map_err(SearchError::from).and_then(|r| self.parse(&r)))
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Writes one line of `cluster_id, id_within_cluster` pairs per query
pub struct ResultWriter<W: Write> {
    writer: csv::Writer<W>,
    top_k: usize,
}

impl ResultWriter<File> {
    pub fn create(path: impl AsRef<Path>, top_k: usize) -> Result<Self> {
        Ok(Self::from_writer(File::create(path)?, top_k))
    }
}

impl<W: Write> ResultWriter<W> {
    pub fn from_writer(wtr: W, top_k: usize) -> Self {
        Self {
            writer: csv::WriterBuilder::new().flexible(true).from_writer(wtr),
            top_k,
        }
    }

    /// Write the best `top_k` of a ranked list
    pub fn write(&mut self, ranked: &[VectorScore]) -> Result<()> {
        let record: Vec<String> = top_k(ranked, self.top_k)
            .iter()
            .flat_map(|s| [s.cluster_id.to_string(), s.id_within_cluster.to_string()])
            .collect();
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| SearchError::Io(e.into_error()))
    }
}

/// Writes the performance table, header first
pub struct PerfWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl PerfWriter<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> PerfWriter<W> {
    pub fn from_writer(wtr: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(wtr);
        writer.write_record(PERF_HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, perf: &QueryPerf) -> Result<()> {
        self.writer.write_record(perf.to_record())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| SearchError::Io(e.into_error()))
    }
}
