//! Answer reconstruction and ranking.
//!
//! The recovered answer holds one residue per database row: the inner
//! product of the query embedding with whatever vector sits in that row of
//! the target's bin. Reconstruction unwraps those residues, decides which
//! rows are results, and ranks them.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{
    database::{ClusterLayout, RowSlot, RowSlots},
    error::{Result, SearchError},
    modulus::unwrap_residues,
};

/// Which rows of the target's bin become results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Only the target cluster's own rows
    ClusterOnly,
    /// Every occupied row of the bin, across all co-packed clusters
    #[default]
    BinWide,
}

/// One scored database vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorScore {
    pub cluster_id: usize,
    pub id_within_cluster: usize,
    pub score: i64,
}

/// Rows of `bin` belonging to `cluster_id`, starting at `start`.
///
/// Scans forward until a row owned by another cluster, an empty row, or the
/// end of the matrix.
pub fn find_row_range(
    slots: &RowSlots,
    bin: usize,
    start: usize,
    cluster_id: usize,
) -> Range<usize> {
    let end = (start..slots.rows())
        .find(|&row| {
            !matches!(
                slots.get(bin, row),
                RowSlot::Occupied { cluster_id: owner, .. } if owner == cluster_id
            )
        })
        .unwrap_or(slots.rows());
    start..end
}

/// Sort by score, highest first. Stable, so equal scores keep the order in
/// which they were emitted (ascending row).
pub fn rank(scores: &mut [VectorScore]) {
    scores.sort_by(|a, b| b.score.cmp(&a.score));
}

/// The best `k` of an already ranked list
pub fn top_k(ranked: &[VectorScore], k: usize) -> &[VectorScore] {
    &ranked[..k.min(ranked.len())]
}

/// Turn recovered residues into ranked scores for `cluster_id`
pub fn reconstruct(
    residues: &[u64],
    modulus: u64,
    layout: &ClusterLayout,
    cluster_id: usize,
    mode: SelectionMode,
) -> Result<Vec<VectorScore>> {
    if residues.len() != layout.rows {
        return Err(SearchError::MalformedMessage {
            what: "recovered answer",
            expected: layout.rows,
            actual: residues.len(),
        });
    }
    let (Some((bin, start)), Some(entry)) =
        (layout.locate(cluster_id), layout.index.get(cluster_id))
    else {
        return Err(SearchError::ClusterOutOfRange {
            cluster_id,
            num_clusters: layout.num_clusters(),
        });
    };
    let values = unwrap_residues(residues, modulus)?;

    let rows = match mode {
        SelectionMode::ClusterOnly => {
            let range = find_row_range(&layout.slots, bin, start, cluster_id);
            if range.len() != entry.num_vectors {
                return Err(SearchError::CoverageMismatch {
                    cluster_id,
                    expected: entry.num_vectors,
                    actual: range.len(),
                });
            }
            range
        }
        SelectionMode::BinWide => 0..layout.rows,
    };

    let mut scores: Vec<VectorScore> = rows
        .filter_map(|row| match layout.slots.get(bin, row) {
            RowSlot::Occupied {
                cluster_id,
                vector_id,
            } => Some(VectorScore {
                cluster_id,
                id_within_cluster: vector_id,
                score: values[row],
            }),
            RowSlot::Empty => None,
        })
        .collect();

    rank(&mut scores);
    Ok(scores)
}
