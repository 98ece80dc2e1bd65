//! Greedy first-fit-decreasing packing of clusters into column bins.
//!
//! Each bin becomes one `dim`-wide column block of the database, so the
//! number of bins fixes the matrix width and the fullest bin fixes its
//! height. Packing several small clusters into one bin trades a wider
//! answer for fewer wasted rows.
//!
//! ```text
//!            bin 0        bin 1
//!          ┌──────────┬──────────┐
//!  row 0   │ C2[0]    │ C0[0]    │
//!  row 1   │ C2[1]    │ C0[1]    │
//!  row 2   │ C2[2]    │ C4[0]    │
//!  row 3   │ C1[0]    │ (empty)  │
//!  row 4   │ C1[1]    │ (empty)  │
//!          └──────────┴──────────┘
//! ```

use tracing::info;

use crate::error::{Result, SearchError};

/// A column group: the clusters sharing one column block, in packing order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub clusters: Vec<usize>,
    pub occupancy: usize,
}

/// Outcome of [`pack_clusters`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packing {
    pub bins: Vec<Bin>,
    /// Effective capacity: max(hint, largest cluster)
    pub capacity: usize,
}

impl Packing {
    /// Height of the database: the fullest bin
    pub fn max_occupancy(&self) -> usize {
        self.bins.iter().map(|b| b.occupancy).max().unwrap_or(0)
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// Bin holding `cluster_id`, if any
    pub fn bin_of(&self, cluster_id: usize) -> Option<usize> {
        self.bins
            .iter()
            .position(|b| b.clusters.contains(&cluster_id))
    }
}

/// Pack clusters given as `(cluster_id, vector_count)` pairs.
///
/// Clusters are visited largest first (ties by ascending id). Each goes into
/// the first existing bin where `occupancy + count < capacity`; otherwise it
/// opens a new bin. The comparison is strict, so a bin never fills its last
/// row unless a single cluster alone reaches the capacity.
pub fn pack_clusters(counts: &[(usize, usize)], capacity_hint: usize) -> Result<Packing> {
    if counts.is_empty() {
        return Err(SearchError::NoClusters);
    }

    let mut order: Vec<(usize, usize)> = counts.to_vec();
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let largest = order[0].1;
    let capacity = capacity_hint.max(largest);
    info!(
        "largest cluster has {} vectors -- max capacity is {}",
        largest, capacity
    );

    let mut bins: Vec<Bin> = Vec::new();
    for (cluster_id, count) in order {
        match bins
            .iter_mut()
            .find(|bin| bin.occupancy + count < capacity)
        {
            Some(bin) => {
                bin.occupancy += count;
                bin.clusters.push(cluster_id);
            }
            None => bins.push(Bin {
                clusters: vec![cluster_id],
                occupancy: count,
            }),
        }
    }

    Ok(Packing { bins, capacity })
}
