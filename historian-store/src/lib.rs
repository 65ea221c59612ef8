//! Shell history storage partitioned by working directory.
//!
//! This crate provides:
//! - A sortable timestamp key codec
//! - A SQLite backed store with one partition per directory
//! - Range, day, last-N and filtered queries over the stored history
//!
//! # Module Structure
//!
//! - [`codec`] - Timestamp <-> key conversion
//! - [`db`] - Store lifecycle, partitions and writes
//! - [`query`] - Scans over partitions
//! - [`filter`] - Record predicates used by scans
//! - [`entry`] - History entry structure

pub mod codec;
pub mod db;
pub mod entry;
pub mod error;
pub mod filter;
mod options;
pub mod query;

#[cfg(test)]
mod tests;

pub use db::{Entry, Partition, PartitionInfo, Store};
pub use entry::History;
pub use error::{Result, StoreError};
pub use filter::{Contains, Filter, InDirectory, Pattern, Record, Since, Until};
pub use options::StoreOptions;
