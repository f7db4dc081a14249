//! Low-level primitives for building the table stores.
//!
//! Includes byte utilities, positioned file I/O, and the block cache.

/// Byte-level fields, varints, and cursors.
pub mod bytes;

/// Positioned file I/O.
pub mod io;

/// Block cache over a data file.
pub mod pager;
