//! Storage engine for Larch.
//!
//! Two tightly coupled subsystems, each backed by one file:
//! - a disk-resident B+ tree index: fixed 4096-byte pages reachable
//!   through explicit page ids, with a header block and a free-page list
//! - a variable-length row store: length-prefixed records with a
//!   byte-offset free list of reclaimed slots
//!
//! Both files keep their mutable metadata (root, free-list heads) in a
//! small header block that is rewritten on every change and again on
//! close. The engine is single-threaded and synchronous; nodes and rows
//! are short-lived values decoded per operation, never cached.

pub mod index;
pub mod row;

pub use index::{DiskTree, IndexFile, IndexFileConfig, InternalNode, LeafNode, LeafPair, Node};
pub use row::{RowFile, RowFileConfig};
