use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{Result, SearchError},
    modulus::{select_plaintext_bits, unwrap_residue, wrap_residue},
    packing::{Packing, pack_clusters},
    params::LweParams,
    quantize::{self, MAX_PRECISION_BITS},
};

/// Row-major flat index of (row, col) in a matrix with `m` columns
#[inline]
pub fn db_index(row: usize, col: usize, m: usize) -> usize {
    row * m + col
}

fn default_precision_bits() -> u32 {
    5
}

// ============================================================================
// Input data
// ============================================================================

/// Dataset-wide facts, loaded once and checked against the clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub num_vectors: usize,
    pub dim: usize,
    pub num_clusters: usize,
    #[serde(rename = "prec_bits", default = "default_precision_bits")]
    pub precision_bits: u32,
}

/// One cluster of quantized vectors, stored flat: vector i is
/// `vectors[i * dim..(i + 1) * dim]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: usize,
    pub num_vectors: usize,
    pub dim: usize,
    pub precision_bits: u32,
    pub vectors: Vec<i8>,
}

impl Cluster {
    /// Wrap already-quantized values. Values outside the precision range are
    /// saturated.
    pub fn new(id: usize, dim: usize, precision_bits: u32, mut vectors: Vec<i8>) -> Result<Self> {
        if dim == 0 {
            return Err(SearchError::InvalidParams("dimension must be positive".into()));
        }
        if vectors.is_empty() {
            return Err(SearchError::EmptyCluster { cluster_id: id });
        }
        if vectors.len() % dim != 0 {
            return Err(SearchError::RaggedCluster {
                cluster_id: id,
                len: vectors.len(),
                dim,
            });
        }
        for v in vectors.iter_mut() {
            *v = quantize::clamp(*v as i64, precision_bits);
        }
        Ok(Self {
            id,
            num_vectors: vectors.len() / dim,
            dim,
            precision_bits,
            vectors,
        })
    }

    /// Get vector `idx`
    #[inline]
    pub fn vector(&self, idx: usize) -> &[i8] {
        &self.vectors[idx * self.dim..(idx + 1) * self.dim]
    }
}

/// Check clusters against their metadata before anything is built
pub fn validate_clusters(metadata: &Metadata, clusters: &[Cluster]) -> Result<()> {
    if clusters.is_empty() {
        return Err(SearchError::NoClusters);
    }
    if metadata.dim == 0 {
        return Err(SearchError::InvalidParams("dimension must be positive".into()));
    }
    if metadata.precision_bits == 0 || metadata.precision_bits > MAX_PRECISION_BITS {
        return Err(SearchError::InvalidPrecision {
            bits: metadata.precision_bits,
            max: MAX_PRECISION_BITS,
        });
    }
    if clusters.len() != metadata.num_clusters {
        return Err(SearchError::ClusterCountMismatch {
            expected: metadata.num_clusters,
            actual: clusters.len(),
        });
    }

    let mut total = 0;
    for (position, cluster) in clusters.iter().enumerate() {
        if cluster.id != position {
            return Err(SearchError::ClusterIdMismatch {
                cluster_id: cluster.id,
                position,
                count: clusters.len(),
            });
        }
        if cluster.dim != metadata.dim {
            return Err(SearchError::DimensionMismatch {
                cluster_id: cluster.id,
                expected: metadata.dim,
                actual: cluster.dim,
            });
        }
        if cluster.precision_bits != metadata.precision_bits {
            return Err(SearchError::PrecisionMismatch {
                cluster_id: cluster.id,
                expected: metadata.precision_bits,
                actual: cluster.precision_bits,
            });
        }
        if cluster.num_vectors == 0 {
            return Err(SearchError::EmptyCluster {
                cluster_id: cluster.id,
            });
        }
        total += cluster.num_vectors;
    }

    if total != metadata.num_vectors {
        return Err(SearchError::VectorCountMismatch {
            expected: metadata.num_vectors,
            actual: total,
        });
    }
    Ok(())
}

// ============================================================================
// Plaintext matrix (handed to the PIR engine)
// ============================================================================

/// L × M matrix of residues mod p = 2^plaintext_bits, row-major
#[derive(Clone, Debug)]
pub struct PlaintextMatrix {
    pub data: Vec<u64>,
    pub rows: usize,
    pub cols: usize,
    pub plaintext_bits: u32,
}

impl PlaintextMatrix {
    #[inline]
    pub fn modulus(&self) -> u64 {
        1u64 << self.plaintext_bits
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data[db_index(row, col, self.cols)]
    }

    /// Entry (row, col) as its centred signed representative
    #[inline]
    pub fn signed(&self, row: usize, col: usize) -> i64 {
        unwrap_residue(self.get(row, col), self.modulus()).unwrap_or_default()
    }

    /// Matrix-vector product over ℤ_p
    pub fn multiply_vec(&self, query: &[i64]) -> Result<Vec<u64>> {
        if query.len() != self.cols {
            return Err(SearchError::MalformedMessage {
                what: "plaintext query",
                expected: self.cols,
                actual: query.len(),
            });
        }
        let modulus = self.modulus();
        Ok((0..self.rows)
            .map(|row| {
                let sum: i128 = (0..self.cols)
                    .map(|col| self.signed(row, col) as i128 * query[col] as i128)
                    .sum();
                sum.rem_euclid(modulus as i128) as u64
            })
            .collect())
    }
}

// ============================================================================
// Cluster index map and row slots
// ============================================================================

/// Where a cluster starts and how many rows it owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    /// row × M + col of the cluster's first coordinate
    pub flat_index: usize,
    pub num_vectors: usize,
}

/// Cluster id → starting flat index in the database matrix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIndexMap {
    entries: BTreeMap<usize, ClusterEntry>,
}

impl ClusterIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cluster; a second entry for the same id is a layout bug
    pub fn insert(&mut self, cluster_id: usize, entry: ClusterEntry) -> Result<()> {
        if self.entries.contains_key(&cluster_id) {
            return Err(SearchError::DuplicateIndexEntry { cluster_id });
        }
        self.entries.insert(cluster_id, entry);
        Ok(())
    }

    pub fn get(&self, cluster_id: usize) -> Option<&ClusterEntry> {
        self.entries.get(&cluster_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ClusterEntry)> {
        self.entries.iter().map(|(&id, entry)| (id, entry))
    }
}

/// What one row of one bin holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSlot {
    Occupied { cluster_id: usize, vector_id: usize },
    Empty,
}

/// Per-(bin, row) ownership table.
///
/// Zero is a legal quantized value, so padding rows cannot be told apart
/// from data by content; this table is the only source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSlots {
    rows: usize,
    num_bins: usize,
    slots: Vec<RowSlot>,
}

impl RowSlots {
    fn empty(rows: usize, num_bins: usize) -> Self {
        Self {
            rows,
            num_bins,
            slots: vec![RowSlot::Empty; rows * num_bins],
        }
    }

    /// Claim `row` of `bin` for a vector, refusing to overwrite another owner
    fn claim(&mut self, bin: usize, row: usize, cluster_id: usize, vector_id: usize) -> Result<()> {
        if row >= self.rows {
            return Err(SearchError::RowOverflow {
                cluster_id,
                row,
                rows: self.rows,
            });
        }
        let slot = &mut self.slots[bin * self.rows + row];
        if let RowSlot::Occupied { cluster_id: owner, .. } = *slot {
            return Err(SearchError::OverlappingRows {
                cluster_id,
                bin,
                row,
                owner,
            });
        }
        *slot = RowSlot::Occupied {
            cluster_id,
            vector_id,
        };
        Ok(())
    }

    /// Rebuild the table from an index map, as a client holding only the
    /// hint does.
    pub fn from_index(
        index: &ClusterIndexMap,
        rows: usize,
        cols: usize,
        dim: usize,
    ) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(SearchError::InvalidParams(format!(
                "empty database shape {rows} x {cols}"
            )));
        }
        if dim == 0 || cols % dim != 0 {
            return Err(SearchError::InvalidParams(format!(
                "{cols} columns do not split into {dim}-wide bins"
            )));
        }
        let mut slots = Self::empty(rows, cols / dim);
        for (cluster_id, entry) in index.iter() {
            let (row0, col0) = (entry.flat_index / cols, entry.flat_index % cols);
            if col0 % dim != 0 {
                return Err(SearchError::MisalignedIndex {
                    cluster_id,
                    flat_index: entry.flat_index,
                    dim,
                });
            }
            for vector_id in 0..entry.num_vectors {
                slots.claim(col0 / dim, row0 + vector_id, cluster_id, vector_id)?;
            }
        }
        Ok(slots)
    }

    #[inline]
    pub fn get(&self, bin: usize, row: usize) -> RowSlot {
        self.slots[bin * self.rows + row]
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }
}

/// Everything a reader of the matrix needs to interpret it
#[derive(Debug, Clone)]
pub struct ClusterLayout {
    pub dim: usize,
    /// L
    pub rows: usize,
    /// M = bins × dim
    pub cols: usize,
    pub index: ClusterIndexMap,
    pub slots: RowSlots,
}

impl ClusterLayout {
    /// Client-side layout: everything follows from the index map and the
    /// engine's matrix shape
    pub fn from_index(
        index: ClusterIndexMap,
        rows: usize,
        cols: usize,
        dim: usize,
    ) -> Result<Self> {
        let slots = RowSlots::from_index(&index, rows, cols, dim)?;
        Ok(Self {
            dim,
            rows,
            cols,
            index,
            slots,
        })
    }

    pub fn num_clusters(&self) -> usize {
        self.index.len()
    }

    /// (bin, first row) of a cluster
    pub fn locate(&self, cluster_id: usize) -> Option<(usize, usize)> {
        self.index.get(cluster_id).map(|entry| {
            (
                (entry.flat_index % self.cols) / self.dim,
                entry.flat_index / self.cols,
            )
        })
    }
}

// ============================================================================
// Layout builder
// ============================================================================

/// A packed vector database ready for PIR setup.
///
/// Clusters are packed into bins; bin b occupies columns `[b·dim, (b+1)·dim)`
/// and its clusters are stacked top to bottom in packing order, one vector per
/// row. Rows below a bin's last cluster stay zero and are marked empty.
///
/// ```text
///            bin 0 (cols 0..d)   bin 1 (cols d..2d)
///          ┌───────────────────┬───────────────────┐
///  row 0   │ C1 v0             │ C3 v0             │  ← index[C1] = 0·M + 0
///  row 1   │ C1 v1             │ C3 v1             │    index[C3] = 0·M + d
///  row 2   │ C1 v2             │ C0 v0             │  ← index[C0] = 2·M + d
///  row 3   │ C2 v0             │ (empty)           │  ← index[C2] = 3·M + 0
///          └───────────────────┴───────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct VectorDatabase {
    pub matrix: PlaintextMatrix,
    pub layout: ClusterLayout,
    pub packing: Packing,
}

impl VectorDatabase {
    /// Pack, size, and fill the database
    pub fn build(
        metadata: &Metadata,
        clusters: &[Cluster],
        capacity_hint: usize,
        params: &LweParams,
    ) -> Result<Self> {
        validate_clusters(metadata, clusters)?;
        params.validate()?;

        let counts: Vec<(usize, usize)> = clusters.iter().map(|c| (c.id, c.num_vectors)).collect();
        let packing = pack_clusters(&counts, capacity_hint)?;

        let dim = metadata.dim;
        let cols = packing.num_bins() * dim;
        let rows = packing.max_occupancy();
        info!(
            "DB size is {} -- best possible would be {}",
            rows * cols,
            metadata.num_vectors * dim
        );

        let plaintext_bits = select_plaintext_bits(params, metadata.precision_bits, dim, cols)?;
        let modulus = 1u64 << plaintext_bits;

        let mut data = vec![0u64; rows * cols];
        let mut index = ClusterIndexMap::new();
        let mut slots = RowSlots::empty(rows, packing.num_bins());

        for (bin_idx, bin) in packing.bins.iter().enumerate() {
            let col0 = bin_idx * dim;
            let mut row = 0;
            for &cluster_id in &bin.clusters {
                let cluster = &clusters[cluster_id];
                index.insert(
                    cluster_id,
                    ClusterEntry {
                        flat_index: db_index(row, col0, cols),
                        num_vectors: cluster.num_vectors,
                    },
                )?;

                for vector_id in 0..cluster.num_vectors {
                    slots.claim(bin_idx, row, cluster_id, vector_id)?;
                    for (j, &value) in cluster.vector(vector_id).iter().enumerate() {
                        data[db_index(row, col0 + j, cols)] = wrap_residue(value as i64, modulus);
                    }
                    row += 1;
                }
            }
        }

        info!("DB dimensions: {} by {} (p = 2^{})", rows, cols, plaintext_bits);

        Ok(Self {
            matrix: PlaintextMatrix {
                data,
                rows,
                cols,
                plaintext_bits,
            },
            layout: ClusterLayout {
                dim,
                rows,
                cols,
                index,
                slots,
            },
            packing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cluster `id` with `n` vectors whose coordinates encode (id, vector, coord)
    fn make_cluster(id: usize, n: usize, dim: usize) -> Cluster {
        let vectors = (0..n * dim)
            .map(|i| ((id * 7 + i) % 31) as i8 - 15)
            .collect();
        Cluster::new(id, dim, 5, vectors).unwrap()
    }

    fn make_dataset(sizes: &[usize], dim: usize) -> (Metadata, Vec<Cluster>) {
        let clusters: Vec<Cluster> = sizes
            .iter()
            .enumerate()
            .map(|(id, &n)| make_cluster(id, n, dim))
            .collect();
        let metadata = Metadata {
            num_vectors: sizes.iter().sum(),
            dim,
            num_clusters: sizes.len(),
            precision_bits: 5,
        };
        (metadata, clusters)
    }

    fn test_params() -> LweParams {
        LweParams {
            n: 16,
            ..LweParams::default_128bit()
        }
    }

    #[test]
    fn test_single_bin_layout() {
        let (metadata, clusters) = make_dataset(&[18, 25, 20, 17, 20], 10);
        let db = VectorDatabase::build(&metadata, &clusters, 900, &test_params()).unwrap();

        assert_eq!(db.matrix.cols, 10);
        assert_eq!(db.matrix.rows, 100);
        assert_eq!(db.matrix.plaintext_bits, 15);

        // packing order 1, 2, 4, 0, 3 stacks clusters at rows 0, 25, 45, 65, 83
        let starts: Vec<usize> = [1, 2, 4, 0, 3]
            .iter()
            .map(|&c| db.layout.index.get(c).unwrap().flat_index / 10)
            .collect();
        assert_eq!(starts, vec![0, 25, 45, 65, 83]);
    }

    #[test]
    fn test_vectors_are_written_as_residues() {
        let (metadata, clusters) = make_dataset(&[3, 2], 4);
        let db = VectorDatabase::build(&metadata, &clusters, 900, &test_params()).unwrap();
        let p = db.matrix.modulus();

        for cluster in &clusters {
            let entry = db.layout.index.get(cluster.id).unwrap();
            let cols = db.matrix.cols;
            let (row0, col0) = (entry.flat_index / cols, entry.flat_index % cols);
            for v in 0..cluster.num_vectors {
                for (j, &value) in cluster.vector(v).iter().enumerate() {
                    assert_eq!(db.matrix.get(row0 + v, col0 + j), wrap_residue(value as i64, p));
                    assert_eq!(db.matrix.signed(row0 + v, col0 + j), value as i64);
                }
            }
        }
    }

    #[test]
    fn test_multi_bin_layout_pads_with_empty_rows() {
        // capacity 10: 6 → bin 0, 5 → bin 1, 3 → bin 0 (9 < 10), 2 → bin 1 (7 < 10)
        let (metadata, clusters) = make_dataset(&[6, 5, 3, 2], 2);
        let db = VectorDatabase::build(&metadata, &clusters, 10, &test_params()).unwrap();

        assert_eq!(db.packing.bins[0].clusters, vec![0, 2]);
        assert_eq!(db.packing.bins[1].clusters, vec![1, 3]);
        assert_eq!(db.layout.cols, 4);
        assert_eq!(db.layout.rows, 9);

        assert_eq!(db.layout.index.get(2).unwrap().flat_index, db_index(6, 0, 4));
        assert_eq!(db.layout.locate(3), Some((1, 5)));

        // bin 0 is full; bin 1 ends with two padding rows
        assert_eq!(
            db.layout.slots.get(0, 8),
            RowSlot::Occupied {
                cluster_id: 2,
                vector_id: 2
            }
        );
        assert_eq!(
            db.layout.slots.get(1, 6),
            RowSlot::Occupied {
                cluster_id: 3,
                vector_id: 1
            }
        );
        assert_eq!(db.layout.slots.get(1, 7), RowSlot::Empty);
        assert_eq!(db.layout.slots.get(1, 8), RowSlot::Empty);
        assert_eq!(db.matrix.get(7, 2), 0);
        assert_eq!(db.matrix.get(8, 3), 0);
    }

    #[test]
    fn test_client_rebuilds_identical_slots() {
        let (metadata, clusters) = make_dataset(&[9, 1, 4, 4, 7, 2, 3], 3);
        let db = VectorDatabase::build(&metadata, &clusters, 8, &test_params()).unwrap();
        let rebuilt =
            RowSlots::from_index(&db.layout.index, db.layout.rows, db.layout.cols, db.layout.dim)
                .unwrap();
        assert_eq!(rebuilt, db.layout.slots);
    }

    #[test]
    fn test_index_map_alignment_and_order() {
        let (metadata, clusters) = make_dataset(&[9, 1, 4, 4, 7, 2, 3], 3);
        let db = VectorDatabase::build(&metadata, &clusters, 8, &test_params()).unwrap();
        let cols = db.layout.cols;

        for (bin_idx, bin) in db.packing.bins.iter().enumerate() {
            let mut last_row = None;
            for &cluster_id in &bin.clusters {
                let flat = db.layout.index.get(cluster_id).unwrap().flat_index;
                assert_eq!(flat % db.layout.dim, 0);
                assert_eq!(flat % cols, bin_idx * db.layout.dim);
                let row = flat / cols;
                if let Some(prev) = last_row {
                    assert!(row > prev, "rows must increase in packing order");
                }
                last_row = Some(row);
            }
        }
    }

    #[test]
    fn test_duplicate_index_entry_is_rejected() {
        let mut index = ClusterIndexMap::new();
        let entry = ClusterEntry {
            flat_index: 0,
            num_vectors: 1,
        };
        index.insert(3, entry).unwrap();
        assert!(matches!(
            index.insert(3, entry),
            Err(SearchError::DuplicateIndexEntry { cluster_id: 3 })
        ));
    }

    #[test]
    fn test_from_index_detects_overlap_and_overflow() {
        let mut index = ClusterIndexMap::new();
        index.insert(0, ClusterEntry { flat_index: 0, num_vectors: 3 }).unwrap();
        index.insert(1, ClusterEntry { flat_index: db_index(2, 0, 4), num_vectors: 1 }).unwrap();
        assert!(matches!(
            RowSlots::from_index(&index, 4, 4, 2),
            Err(SearchError::OverlappingRows { cluster_id: 1, row: 2, owner: 0, .. })
        ));

        let mut index = ClusterIndexMap::new();
        index.insert(0, ClusterEntry { flat_index: db_index(2, 2, 4), num_vectors: 3 }).unwrap();
        assert!(matches!(
            RowSlots::from_index(&index, 4, 4, 2),
            Err(SearchError::RowOverflow { cluster_id: 0, row: 4, rows: 4 })
        ));

        let mut index = ClusterIndexMap::new();
        index.insert(0, ClusterEntry { flat_index: 1, num_vectors: 1 }).unwrap();
        assert!(matches!(
            RowSlots::from_index(&index, 4, 4, 2),
            Err(SearchError::MisalignedIndex { .. })
        ));
    }

    #[test]
    fn test_from_index_rejects_empty_shape() {
        let mut index = ClusterIndexMap::new();
        index.insert(0, ClusterEntry { flat_index: 0, num_vectors: 1 }).unwrap();
        assert!(matches!(
            RowSlots::from_index(&index, 4, 0, 2),
            Err(SearchError::InvalidParams(_))
        ));
        assert!(matches!(
            RowSlots::from_index(&index, 0, 4, 2),
            Err(SearchError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_validation_faults() {
        let params = test_params();

        let (mut metadata, clusters) = make_dataset(&[3, 2], 4);
        metadata.num_vectors = 6;
        assert!(matches!(
            VectorDatabase::build(&metadata, &clusters, 10, &params),
            Err(SearchError::VectorCountMismatch { expected: 6, actual: 5 })
        ));

        let (mut metadata, clusters) = make_dataset(&[3, 2], 4);
        metadata.dim = 5;
        assert!(matches!(
            VectorDatabase::build(&metadata, &clusters, 10, &params),
            Err(SearchError::DimensionMismatch { cluster_id: 0, expected: 5, actual: 4 })
        ));

        let (metadata, _) = make_dataset(&[3, 2], 4);
        assert!(matches!(
            VectorDatabase::build(&metadata, &[], 10, &params),
            Err(SearchError::NoClusters)
        ));

        let (metadata, mut clusters) = make_dataset(&[3, 2], 4);
        clusters.swap(0, 1);
        assert!(matches!(
            VectorDatabase::build(&metadata, &clusters, 10, &params),
            Err(SearchError::ClusterIdMismatch { .. })
        ));

        let (mut metadata, clusters) = make_dataset(&[3, 2], 4);
        metadata.precision_bits = 6;
        assert!(matches!(
            VectorDatabase::build(&metadata, &clusters, 10, &params),
            Err(SearchError::PrecisionMismatch { .. })
        ));
    }

    #[test]
    fn test_cluster_new_checks_shape() {
        assert!(matches!(
            Cluster::new(2, 3, 5, vec![1, 2, 3, 4]),
            Err(SearchError::RaggedCluster { cluster_id: 2, len: 4, dim: 3 })
        ));
        assert!(matches!(
            Cluster::new(2, 3, 5, vec![]),
            Err(SearchError::EmptyCluster { cluster_id: 2 })
        ));
        // out-of-range values saturate
        let cluster = Cluster::new(0, 2, 5, vec![100, -100]).unwrap();
        assert_eq!(cluster.vectors, vec![15, -16]);
        assert_eq!(cluster.num_vectors, 1);
    }

    #[test]
    fn test_plaintext_multiply_vec() {
        // 2×2 matrix [[1, -2], [3, 4]] mod 2^4
        let matrix = PlaintextMatrix {
            data: vec![1, 14, 3, 4],
            rows: 2,
            cols: 2,
            plaintext_bits: 4,
        };
        // [1·2 + (-2)·1, 3·2 + 4·1] = [0, 10]
        assert_eq!(matrix.multiply_vec(&[2, 1]).unwrap(), vec![0, 10]);
        // -2 wraps to 14
        assert_eq!(matrix.multiply_vec(&[0, 1]).unwrap(), vec![14, 4]);
        assert!(matrix.multiply_vec(&[1]).is_err());
    }
}
