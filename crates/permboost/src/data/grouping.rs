//! Query (group) boundaries over a sample ordering.
//!
//! Folds and permutations never split a query, so every component that cuts
//! the sample axis snaps its cut points to query starts through
//! [`QueryGrouping`].

use serde::{Deserialize, Serialize};

use super::error::DatasetError;
use super::slice::Slice;

/// Start offsets of contiguous queries.
///
/// `offsets` has `query_count + 1` entries: `offsets[0] == 0` and the last
/// entry equals the number of samples. Without explicit groups every sample is
/// its own query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGrouping {
    offsets: Vec<usize>,
}

impl QueryGrouping {
    /// One query per sample.
    pub fn per_sample(n_samples: usize) -> Self {
        Self {
            offsets: (0..=n_samples).collect(),
        }
    }

    /// Build from query sizes, in storage order. Zero sizes are skipped.
    pub fn from_sizes(sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut offsets = vec![0];
        let mut total = 0;
        for size in sizes.into_iter().filter(|&s| s > 0) {
            total += size;
            offsets.push(total);
        }
        Self { offsets }
    }

    /// Build from per-sample group ids.
    ///
    /// Samples of the same group must be adjacent.
    pub fn from_group_ids(group_ids: &[u32]) -> Result<Self, DatasetError> {
        let mut offsets = vec![0];
        let mut seen = std::collections::HashSet::new();
        for (i, window) in group_ids.windows(2).enumerate() {
            if window[0] != window[1] {
                seen.insert(window[0]);
                if seen.contains(&window[1]) {
                    return Err(DatasetError::NonContiguousGroup {
                        group_id: window[1],
                        sample: i + 1,
                    });
                }
                offsets.push(i + 1);
            }
        }
        if !group_ids.is_empty() {
            offsets.push(group_ids.len());
        }
        Ok(Self { offsets })
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    #[inline]
    pub fn query_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// First sample of query `query`; `query_count()` maps to the sample count.
    #[inline]
    pub fn query_offset(&self, query: usize) -> usize {
        self.offsets[query.min(self.query_count())]
    }

    #[inline]
    pub fn query_size(&self, query: usize) -> usize {
        self.offsets[query + 1] - self.offsets[query]
    }

    /// Sample range of query `query`.
    #[inline]
    pub fn query_slice(&self, query: usize) -> Slice {
        Slice::new(self.offsets[query], self.offsets[query + 1])
    }

    /// Smallest query start that is `>= line`, or the sample count.
    pub fn next_query_offset_for_line(&self, line: usize) -> usize {
        let idx = self.offsets.partition_point(|&o| o < line);
        self.offsets
            .get(idx)
            .copied()
            .unwrap_or_else(|| self.n_samples())
    }

    /// Index of the query containing sample `line`.
    pub fn query_of(&self, line: usize) -> usize {
        debug_assert!(line < self.n_samples());
        self.offsets.partition_point(|&o| o <= line) - 1
    }

    /// Whether every query holds exactly one sample.
    #[inline]
    pub fn is_per_sample(&self) -> bool {
        self.query_count() == self.n_samples()
    }

    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.windows(2).map(|w| w[1] - w[0])
    }
}
