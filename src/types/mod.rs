#![forbid(unsafe_code)]
//! Shared identifiers, errors, and checksums.

use std::fmt;

pub mod checksum;

pub use checksum::{meta_crc32, Checksum, Crc32Fast};

/// Stable node identifier, assigned once and never reused.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct NodeId(pub u32);

/// Physical block number inside the table data file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId(pub u32);

/// Errors surfaced by the table stores and the tree facade.
#[derive(thiserror::Error, Debug)]
pub enum ArborError {
    /// Underlying file operation failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted state does not match what the engine expects.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed arguments that would break the table or tree.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A pre value beyond the current table length.
    #[error("pre {pre} out of range (table holds {len} records)")]
    OutOfRange {
        /// Requested position.
        pre: usize,
        /// Number of records in the table.
        len: usize,
    },
    /// An insert would place two text nodes next to each other.
    #[error("text node at pre {pre} would be adjacent to another text node")]
    AdjacentText {
        /// Insert position that was rejected.
        pre: usize,
    },
    /// The table was closed.
    #[error("table is closed")]
    Closed,
    /// Options could not be parsed.
    #[error("invalid options: {0}")]
    Options(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ArborError>;

impl NodeId {
    /// Returns the id following this one.
    pub fn next(self) -> NodeId {
        NodeId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}
