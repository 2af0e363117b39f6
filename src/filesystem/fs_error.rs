//! Error types for boot-sector parsing, cluster-chain traversal and file extraction.

use std::fmt;
use std::io;
use thiserror::Error;

/// Reason a cluster chain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStop {
    /// A value in the end-of-chain range was reached.
    EndOfChain,
    /// A reserved cluster value (0 or 1) was found in the chain.
    Invalid(u32),
    /// The bad-cluster sentinel was found and the policy requested a stop.
    BadCluster(u32),
    /// The hop cap was reached, the chain is probably cyclic.
    HopLimit(usize),
    /// A cluster number points outside the allocation table.
    OutOfTable(u32),
}

impl ChainStop {
    /// Whether the chain ended on corruption rather than on its end marker.
    pub fn is_truncation(&self) -> bool {
        !matches!(self, ChainStop::EndOfChain)
    }
}

impl fmt::Display for ChainStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStop::EndOfChain => write!(f, "end of chain"),
            ChainStop::Invalid(value) => write!(f, "invalid cluster value 0x{value:X}"),
            ChainStop::BadCluster(cluster) => write!(f, "bad cluster mark after cluster {cluster}"),
            ChainStop::HopLimit(hops) => write!(f, "hop limit reached after {hops} clusters"),
            ChainStop::OutOfTable(cluster) => {
                write!(f, "cluster {cluster} is outside the allocation table")
            }
        }
    }
}

/// Errors raised by the filesystem readers.
#[derive(Error, Debug)]
pub enum FsError {
    /// Underlying device error; never recovered locally.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A fixed on-disk record could not be decoded.
    #[error("Decoding error: {0}")]
    BinRead(#[from] binread::Error),

    /// No detector recognised the boot sector.
    #[error("Unknown filesystem")]
    UnknownFileSystem,

    /// Geometry fields are contradictory or out of range.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Cluster numbers 0 and 1 are reserved and never address data.
    #[error("Invalid cluster number: `{0}`. Data clusters start at 2.")]
    InvalidCluster(u32),

    /// The cluster chain is corrupt.
    #[error("Corrupted cluster chain: {0}")]
    ChainCorruption(ChainStop),

    /// The chain ended before the declared file size was delivered.
    #[error("Short read: {delivered} of {expected} bytes delivered")]
    ShortRead { expected: u64, delivered: u64 },

    /// The operation is not supported by this filesystem reader.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl FsError {
    /// Format errors degrade a partition instead of aborting the scan.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            FsError::UnknownFileSystem
                | FsError::InvalidGeometry(_)
                | FsError::InvalidCluster(_)
                | FsError::BinRead(_)
        )
    }
}
