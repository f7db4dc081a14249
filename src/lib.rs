//! Arbor stores ordered, labeled trees as flat tables of fixed-width node
//! records in document order.
//!
//! Every node is addressed by its preorder rank (`pre`), which shifts as the
//! tree is edited, and by a stable [`NodeId`]. Records live either in a paged
//! [`storage::DiskTable`] or an in-memory [`storage::MemTable`]; the
//! [`tree::Tree`] facade interprets them and keeps sizes, parent distances and
//! attribute counts consistent across inserts and deletes.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod tree;
pub mod types;

pub use storage::{DiskTable, MemTable, NodeKind, Record, TableAccess, TableOptions};
pub use tree::{FragmentBuilder, Tree, VerifyReport};
pub use types::{ArborError, NodeId, Result};
