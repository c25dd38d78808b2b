//! Per-iteration cache of sample-to-leaf assignments.

use std::collections::HashMap;
use std::sync::Arc;

use crate::data::DatasetId;

/// Bins of one structure over one dataset, computed once per iteration.
///
/// The boosting loop resets the cache at the start of every iteration, so
/// entries never outlive the structure they were computed for.
#[derive(Debug, Default)]
pub struct IterationCache {
    bins: HashMap<(DatasetId, u64), Arc<[u32]>>,
}

impl IterationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub fn reset(&mut self) {
        self.bins.clear();
    }

    #[inline]
    pub fn contains(&self, dataset: DatasetId, fingerprint: u64) -> bool {
        self.bins.contains_key(&(dataset, fingerprint))
    }

    pub fn insert(&mut self, dataset: DatasetId, fingerprint: u64, bins: Vec<u32>) {
        self.bins.insert((dataset, fingerprint), bins.into());
    }

    #[inline]
    pub fn bins(&self, dataset: DatasetId, fingerprint: u64) -> Option<&Arc<[u32]>> {
        self.bins.get(&(dataset, fingerprint))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}
