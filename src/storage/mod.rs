//! Record tables.
//!
//! A table is an ordered sequence of fixed-width node records addressed by
//! pre value. Two stores implement [`TableAccess`]: [`DiskTable`] keeps
//! records in a block file with a persisted directory, [`MemTable`] in one
//! growable buffer.

/// Node record layout and codec.
pub mod record;

mod disk;
mod memory;
mod meta;
mod options;
mod table;

pub use disk::{DiskTable, DATA_FILE, META_FILE};
pub use memory::MemTable;
pub use meta::{DirEntry, TableMeta, META_FORMAT_VERSION, META_MAGIC};
pub use options::{
    TableOptions, DEFAULT_BLOCK_SIZE, DEFAULT_FILL_FACTOR, DEFAULT_RECORD_POWER, MAX_RECORD_POWER,
};
pub use record::{NodeKind, Record};
pub use table::TableAccess;
