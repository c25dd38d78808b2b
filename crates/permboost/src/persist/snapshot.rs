//! Binary snapshot format for resuming interrupted training.
//!
//! A snapshot is a 16-byte header followed by a Postcard-encoded payload.
//!
//! # Header layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Magic ("PBSN")
//! 4       1     Version major
//! 5       1     Version minor
//! 6       2     Flags (bitfield)
//! 8       4     Payload size (bytes)
//! 12      4     CRC32 checksum of payload
//! ```
//!
//! # Payload
//!
//! Fields are written and read back in this order: tracker state, RNG state,
//! ensemble, fold cursors (slot order), estimation cursor, test cursor,
//! best-test cursor.

use std::io::{Read, Write};

use rand_xoshiro::Xoshiro256PlusPlus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::AdditiveModel;
use crate::training::TrackerState;

// ============================================================================
// Constants
// ============================================================================

pub const MAGIC: &[u8; 4] = b"PBSN";

pub const CURRENT_VERSION_MAJOR: u8 = 1;

pub const CURRENT_VERSION_MINOR: u8 = 0;

pub const HEADER_SIZE: usize = 16;

/// Payload is compressed with zstd.
pub const FLAG_COMPRESSED: u16 = 1 << 0;

#[cfg(feature = "snapshot-compression")]
const COMPRESSION_THRESHOLD: usize = 32 * 1024;

#[cfg(feature = "snapshot-compression")]
const COMPRESSION_LEVEL: i32 = 3;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Wrong magic bytes.
    #[error("not a snapshot file")]
    NotASnapshot,

    #[error("snapshot requires format {major}.{minor} or later")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// The file sets flags this build cannot handle.
    #[error("unsupported snapshot flags {flags:#06x}")]
    UnsupportedFlags { flags: u16 },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("snapshot truncated: expected {expected} bytes")]
    Truncated { expected: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(postcard::Error),

    #[error("decoding error: {0}")]
    Decoding(postcard::Error),

    #[cfg(feature = "snapshot-compression")]
    #[error("compression error: {0}")]
    Compression(std::io::Error),

    #[cfg(feature = "snapshot-compression")]
    #[error("decompression error: {0}")]
    Decompression(std::io::Error),

    /// The snapshot was written by a run with a different layout.
    #[error("snapshot does not match the current run: {0}")]
    StateMismatch(String),
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub flags: u16,
    pub payload_size: u32,
    pub checksum: u32,
}

impl SnapshotHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, SnapshotError> {
        if &buf[0..4] != MAGIC {
            return Err(SnapshotError::NotASnapshot);
        }
        let version_major = buf[4];
        let version_minor = buf[5];
        if version_major > CURRENT_VERSION_MAJOR {
            return Err(SnapshotError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }
        Ok(Self {
            version_major,
            version_minor,
            flags: u16::from_le_bytes([buf[6], buf[7]]),
            payload_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            checksum: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Borrowed view of the state being saved.
#[derive(Debug, Serialize)]
#[serde(bound = "M: Serialize")]
pub struct SnapshotRef<'a, M> {
    pub tracker: &'a TrackerState,
    pub rng: &'a Xoshiro256PlusPlus,
    pub model: &'a AdditiveModel<M>,
    pub fold_cursors: &'a [Vec<f32>],
    pub estimation_cursor: &'a [f32],
    pub test_cursor: Option<&'a [f32]>,
    pub best_test_cursor: Option<&'a [f32]>,
}

/// Owned state read back from a snapshot.
#[derive(Debug, Deserialize)]
#[serde(bound = "M: DeserializeOwned")]
pub struct SnapshotData<M> {
    pub tracker: TrackerState,
    pub rng: Xoshiro256PlusPlus,
    pub model: AdditiveModel<M>,
    pub fold_cursors: Vec<Vec<f32>>,
    pub estimation_cursor: Vec<f32>,
    pub test_cursor: Option<Vec<f32>>,
    pub best_test_cursor: Option<Vec<f32>>,
}

// ============================================================================
// Codec
// ============================================================================

/// Write a complete snapshot.
pub fn write_snapshot<W, M>(writer: &mut W, snapshot: &SnapshotRef<'_, M>) -> Result<(), SnapshotError>
where
    W: Write + ?Sized,
    M: Serialize,
{
    let payload = postcard::to_allocvec(snapshot).map_err(SnapshotError::Encoding)?;

    #[cfg(feature = "snapshot-compression")]
    let (payload, flags) = if payload.len() >= COMPRESSION_THRESHOLD {
        let compressed =
            zstd::encode_all(payload.as_slice(), COMPRESSION_LEVEL).map_err(SnapshotError::Compression)?;
        (compressed, FLAG_COMPRESSED)
    } else {
        (payload, 0)
    };

    #[cfg(not(feature = "snapshot-compression"))]
    let flags = 0u16;

    let payload_size = u32::try_from(payload.len())
        .map_err(|_| SnapshotError::StateMismatch(format!("payload of {} bytes is too large", payload.len())))?;
    let header = SnapshotHeader {
        version_major: CURRENT_VERSION_MAJOR,
        version_minor: CURRENT_VERSION_MINOR,
        flags,
        payload_size,
        checksum: crc32fast::hash(&payload),
    };
    writer.write_all(&header.to_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read a complete snapshot.
pub fn read_snapshot<R, M>(reader: &mut R) -> Result<SnapshotData<M>, SnapshotError>
where
    R: Read + ?Sized,
    M: DeserializeOwned,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header_buf)
        .map_err(|e| truncated_or_io(e, HEADER_SIZE))?;
    let header = SnapshotHeader::from_bytes(&header_buf)?;

    // Buffer grows with the bytes actually present, not the claimed size.
    let expected = header.payload_size as usize;
    let mut payload = Vec::new();
    reader
        .take(u64::from(header.payload_size))
        .read_to_end(&mut payload)
        .map_err(|e| truncated_or_io(e, expected))?;
    if payload.len() < expected {
        return Err(SnapshotError::Truncated { expected });
    }

    let actual = crc32fast::hash(&payload);
    if actual != header.checksum {
        return Err(SnapshotError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    if header.flags & !FLAG_COMPRESSED != 0 {
        return Err(SnapshotError::UnsupportedFlags { flags: header.flags });
    }

    #[cfg(feature = "snapshot-compression")]
    let payload = if header.is_compressed() {
        zstd::decode_all(payload.as_slice()).map_err(SnapshotError::Decompression)?
    } else {
        payload
    };

    #[cfg(not(feature = "snapshot-compression"))]
    if header.is_compressed() {
        return Err(SnapshotError::UnsupportedFlags { flags: header.flags });
    }

    postcard::from_bytes(&payload).map_err(SnapshotError::Decoding)
}

fn truncated_or_io(err: std::io::Error, expected: usize) -> SnapshotError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        SnapshotError::Truncated { expected }
    } else {
        SnapshotError::Io(err)
    }
}

// ============================================================================
// Tests
// ============================================================================
