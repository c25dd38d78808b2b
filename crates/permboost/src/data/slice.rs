//! Half-open index ranges over sample positions.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Half-open range `[left, right)` of sample positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Slice {
    pub left: usize,
    pub right: usize,
}

impl Slice {
    #[inline]
    pub fn new(left: usize, right: usize) -> Self {
        debug_assert!(left <= right, "invalid slice [{left}, {right})");
        Self { left, right }
    }

    /// `[0, len)`.
    #[inline]
    pub fn full(len: usize) -> Self {
        Self::new(0, len)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.right - self.left
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.left == self.right
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.left..self.right
    }

    /// Whether `other` lies entirely inside `self`.
    #[inline]
    pub fn contains_slice(&self, other: &Slice) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    /// Express `other` relative to `self.left`.
    #[inline]
    pub fn relative(&self, other: &Slice) -> Slice {
        debug_assert!(self.contains_slice(other));
        Slice::new(other.left - self.left, other.right - self.left)
    }
}

impl std::fmt::Display for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.left, self.right)
    }
}
