//! Partition-table parsing and disk-level orchestration.
//!
//! - [`mbr`]: Master Boot Record decoding
//! - [`disk`]: opening a device and building one volume per partition

pub mod disk;
pub mod disk_error;
pub mod mbr;
