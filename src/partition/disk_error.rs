//! Error types for disk and partition operations.
//!
//! This module provides error handling for the partition-table layer: device I/O,
//! malformed boot records and unsupported partitioning schemes.

use std::io;
use thiserror;

use crate::filesystem::fs_error::FsError;

/// Represents errors that can occur while opening a disk and reading its partition table.
#[derive(thiserror::Error, Debug)]
pub enum DiskError {
    /// Wraps an I/O error that occurred during disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The master boot record buffer does not have the expected size.
    #[error("Invalid MBR length: {0} bytes, expected 512")]
    InvalidLength(usize),
    /// A GPT protective partition was found; GPT partition tables are not parsed.
    #[error("GPT partition table is not supported")]
    UnsupportedGpt,
    /// The requested volume does not exist on this disk.
    #[error("No volume #{0} on this disk")]
    NoSuchVolume(usize),
    /// A filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),
}
