//! Persistence of training progress.
//!
//! # Features
//!
//! - `snapshot-compression`: compress snapshot payloads with zstd

pub mod snapshot;

pub use snapshot::{
    SnapshotData, SnapshotError, SnapshotHeader, SnapshotRef, read_snapshot, write_snapshot,
};
