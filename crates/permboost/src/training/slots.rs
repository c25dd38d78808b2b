//! Uniform storage for per-fold and estimation values.
//!
//! Every learn permutation has its own folds, and one extra slot belongs to
//! the estimation permutation. [`SlotStorage`] keeps all of them in one flat
//! vector addressed by [`Slot`], so the estimation entry is an explicit
//! variant rather than an extra element at the end of a nested container.

use serde::{Deserialize, Serialize};

/// Address of one running-prediction buffer or per-iteration model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Fold { permutation: usize, fold: usize },
    Estimation,
}

/// Flat storage with one entry per [`Slot`].
///
/// Fold slots come first, permutation-major, followed by the estimation slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotStorage<T> {
    /// `offsets[p]..offsets[p + 1]` are the fold entries of permutation `p`.
    offsets: Vec<usize>,
    entries: Vec<T>,
}

impl<T> SlotStorage<T> {
    /// Create one entry per fold of every permutation plus the estimation
    /// entry, visiting slots in storage order.
    pub fn from_fn(fold_counts: &[usize], mut f: impl FnMut(Slot) -> T) -> Self {
        let mut offsets = Vec::with_capacity(fold_counts.len() + 1);
        let mut entries = Vec::with_capacity(fold_counts.iter().sum::<usize>() + 1);
        offsets.push(0);
        for (permutation, &count) in fold_counts.iter().enumerate() {
            for fold in 0..count {
                entries.push(f(Slot::Fold { permutation, fold }));
            }
            offsets.push(entries.len());
        }
        entries.push(f(Slot::Estimation));
        Self { offsets, entries }
    }

    /// Rebuild from entries in storage order.
    ///
    /// Returns `None` if the entry count does not match the fold layout.
    pub fn from_entries(fold_counts: &[usize], entries: Vec<T>) -> Option<Self> {
        let expected = fold_counts.iter().sum::<usize>() + 1;
        if entries.len() != expected {
            return None;
        }
        let mut offsets = vec![0];
        for &count in fold_counts {
            offsets.push(offsets[offsets.len() - 1] + count);
        }
        Some(Self { offsets, entries })
    }

    #[inline]
    pub fn permutation_count(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    pub fn fold_count(&self, permutation: usize) -> usize {
        self.offsets[permutation + 1] - self.offsets[permutation]
    }

    pub fn fold_counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Total number of slots, the estimation slot included.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index(&self, slot: Slot) -> usize {
        match slot {
            Slot::Fold { permutation, fold } => {
                debug_assert!(fold < self.fold_count(permutation));
                self.offsets[permutation] + fold
            }
            Slot::Estimation => self.entries.len() - 1,
        }
    }

    fn slot_at(&self, index: usize) -> Slot {
        if index + 1 == self.entries.len() {
            return Slot::Estimation;
        }
        let permutation = self.offsets.partition_point(|&o| o <= index) - 1;
        Slot::Fold {
            permutation,
            fold: index - self.offsets[permutation],
        }
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> &T {
        &self.entries[self.index(slot)]
    }

    #[inline]
    pub fn get_mut(&mut self, slot: Slot) -> &mut T {
        let index = self.index(slot);
        &mut self.entries[index]
    }

    /// Replace the value at `slot`, returning the old one.
    pub fn replace(&mut self, slot: Slot, value: T) -> T {
        std::mem::replace(self.get_mut(slot), value)
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.entries.len()).map(|i| self.slot_at(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, v)| (self.slot_at(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Slot, &mut T)> + '_ {
        let slots: Vec<Slot> = self.slots().collect();
        slots.into_iter().zip(self.entries.iter_mut())
    }

    /// Entries in storage order.
    #[inline]
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn map<U>(&self, mut f: impl FnMut(Slot, &T) -> U) -> SlotStorage<U> {
        let entries = self.iter().map(|(slot, v)| f(slot, v)).collect();
        SlotStorage {
            offsets: self.offsets.clone(),
            entries,
        }
    }
}
