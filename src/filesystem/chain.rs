//! Cluster-chain traversal shared by the FAT and exFAT readers.
//!
//! The allocation table is loaded once into a [`FatTable`] and chains are
//! walked lazily with a [`ChainWalker`]. Corruption never panics: the walker
//! stops and records a [`ChainStop`] explaining why.

use log::{debug, warn};
use std::cell::OnceCell;

use super::boot_sector::BootSector;
use super::fs_error::{ChainStop, FsError};
use super::fs_type::{ClusterConstants, EntryWidth};
use crate::constants::{MAX_FAT_BYTES, RESERVED_CLUSTERS};
use crate::device::BlockDevice;
use crate::utils;

/// How the bad-cluster sentinel is handled while walking a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BadClusterPolicy {
    /// Log the mark and keep following the value as a cluster number.
    #[default]
    Warn,
    /// End the chain, reported as a `ChainStop::BadCluster` truncation.
    Stop,
}

/// In-memory copy of an allocation table.
#[derive(Debug, Clone)]
pub struct FatTable {
    bytes: Vec<u8>,
    constants: ClusterConstants,
}

impl FatTable {
    pub fn new(bytes: Vec<u8>, constants: ClusterConstants) -> Self {
        Self { bytes, constants }
    }

    /// Reads the first FAT of a volume.
    ///
    /// # Errors
    /// - `FsError::UnknownFileSystem` if the volume has no cluster constants.
    /// - `FsError::InvalidGeometry` if the table is larger than `MAX_FAT_BYTES`.
    /// - `FsError::Io` if the table cannot be read.
    pub fn load<D: BlockDevice + ?Sized>(
        device: &mut D,
        boot_sector: &BootSector,
    ) -> Result<Self, FsError> {
        let constants = boot_sector
            .constants()
            .ok_or(FsError::UnknownFileSystem)?;
        let geometry = boot_sector.geometry();

        if geometry.fat_size() > MAX_FAT_BYTES {
            return Err(FsError::InvalidGeometry(format!(
                "FAT of {} bytes exceeds the {MAX_FAT_BYTES} bytes limit",
                geometry.fat_size()
            )));
        }

        let mut bytes = vec![0; geometry.fat_size() as usize];
        device.read_at(geometry.fat_location(), &mut bytes)?;
        debug!(
            "Loaded {} bytes of FAT at offset {}",
            bytes.len(),
            geometry.fat_location()
        );

        Ok(Self::new(bytes, constants))
    }

    /// Table stored in `cell`, loaded on first call.
    pub fn cached<'t, D: BlockDevice + ?Sized>(
        cell: &'t OnceCell<FatTable>,
        device: &mut D,
        boot_sector: &BootSector,
    ) -> Result<&'t FatTable, FsError> {
        if let Some(table) = cell.get() {
            return Ok(table);
        }
        let table = Self::load(device, boot_sector)?;
        Ok(cell.get_or_init(|| table))
    }

    pub fn constants(&self) -> ClusterConstants {
        self.constants
    }

    /// Number of entries the table holds.
    pub fn entry_count(&self) -> u32 {
        let count = match self.constants.width {
            EntryWidth::Bits12 => self.bytes.len() * 2 / 3,
            _ => self.bytes.len() / self.constants.bytes_per_entry(),
        };
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Value stored for cluster `n`, `None` if `n` lies outside the table.
    pub fn next_cluster(&self, n: u32) -> Option<u32> {
        let t = &self.bytes;
        let n = n as usize;

        match self.constants.width {
            EntryWidth::Bits12 => {
                let i = n * 3 / 2;
                if i + 1 >= t.len() {
                    return None;
                }
                let value = if n % 2 == 0 {
                    u32::from(t[i]) | (u32::from(t[i + 1] & 0x0F) << 8)
                } else {
                    u32::from(t[i] >> 4) | (u32::from(t[i + 1]) << 4)
                };
                Some(value)
            }
            EntryWidth::Bits16 => {
                let i = n * 2;
                (i + 2 <= t.len()).then(|| u32::from(utils::u16_at(t, i)))
            }
            EntryWidth::Bits28 => {
                let i = n * 4;
                (i + 4 <= t.len()).then(|| utils::u32_at(t, i) & 0x0FFF_FFFF)
            }
            EntryWidth::Bits32 => {
                let i = n * 4;
                (i + 4 <= t.len()).then(|| utils::u32_at(t, i))
            }
        }
    }

    /// Decodes every entry of the table, reserved ones included.
    pub fn entries(&self) -> Vec<u32> {
        (0..self.entry_count())
            .map_while(|n| self.next_cluster(n))
            .collect()
    }

    /// Walks the chain starting at `start`.
    ///
    /// `hop_limit` caps the number of clusters yielded, `None` walks until the chain ends.
    pub fn chain(
        &self,
        start: u32,
        hop_limit: Option<usize>,
        policy: BadClusterPolicy,
    ) -> ChainWalker<'_> {
        ChainWalker {
            table: self,
            next: Some(start),
            current: None,
            visited: 0,
            hop_limit,
            policy,
            stop: None,
        }
    }
}

/// Lazy iterator over the clusters of a chain.
#[derive(Debug)]
pub struct ChainWalker<'a> {
    table: &'a FatTable,
    next: Option<u32>,
    current: Option<u32>,
    visited: usize,
    hop_limit: Option<usize>,
    policy: BadClusterPolicy,
    stop: Option<ChainStop>,
}

impl ChainWalker<'_> {
    /// Why the walk ended, `None` while clusters remain.
    pub fn stop(&self) -> Option<ChainStop> {
        self.stop
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    fn end(&mut self, stop: ChainStop) -> Option<u32> {
        if stop.is_truncation() {
            warn!("Cluster chain truncated: {stop}");
        }
        self.next = None;
        self.stop = Some(stop);
        None
    }

    /// Classifies a value read from the table.
    fn follow(&self, value: u32) -> Result<u32, ChainStop> {
        let constants = self.table.constants;
        let from = self.current.unwrap_or(value);

        if value < RESERVED_CLUSTERS {
            return Err(ChainStop::Invalid(value));
        }
        if value == constants.bad {
            match self.policy {
                BadClusterPolicy::Warn => {
                    warn!("Bad cluster mark 0x{value:X} found after cluster {from}")
                }
                BadClusterPolicy::Stop => return Err(ChainStop::BadCluster(from)),
            }
        } else if value >= constants.eof {
            return Err(ChainStop::EndOfChain);
        }
        Ok(value)
    }
}

impl Iterator for ChainWalker<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.stop.is_some() {
            return None;
        }

        let candidate = match (self.current, self.next) {
            (None, Some(start)) if start < RESERVED_CLUSTERS => {
                return self.end(ChainStop::Invalid(start));
            }
            (None, Some(start)) => start,
            (Some(current), _) => match self.table.next_cluster(current) {
                None => return self.end(ChainStop::OutOfTable(current)),
                Some(value) => match self.follow(value) {
                    Ok(cluster) => cluster,
                    Err(stop) => return self.end(stop),
                },
            },
            (None, None) => return None,
        };

        if let Some(limit) = self.hop_limit.filter(|limit| self.visited >= *limit) {
            return self.end(ChainStop::HopLimit(limit));
        }

        self.visited += 1;
        self.current = Some(candidate);
        debug!("Cluster hop #{} -> {candidate}", self.visited);
        Some(candidate)
    }
}

/// Clusters of a directory or file: a FAT chain or a contiguous run.
#[derive(Debug)]
pub enum ClusterRun<'a> {
    Chain(ChainWalker<'a>),
    /// exFAT allocation without a FAT chain.
    Contiguous { next: u32, remaining: u64 },
}

impl ClusterRun<'_> {
    /// Contiguous run covering `length` bytes from `start`.
    pub fn contiguous(start: u32, length: u64, cluster_size: u64) -> Self {
        ClusterRun::Contiguous {
            next: start,
            remaining: length.div_ceil(cluster_size.max(1)),
        }
    }

    pub fn stop(&self) -> Option<ChainStop> {
        match self {
            ClusterRun::Chain(walker) => walker.stop(),
            ClusterRun::Contiguous { remaining: 0, .. } => Some(ChainStop::EndOfChain),
            ClusterRun::Contiguous { .. } => None,
        }
    }
}

impl Iterator for ClusterRun<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            ClusterRun::Chain(walker) => walker.next(),
            ClusterRun::Contiguous { remaining: 0, .. } => None,
            ClusterRun::Contiguous { next, remaining } => {
                let cluster = *next;
                *next = next.checked_add(1)?;
                *remaining -= 1;
                Some(cluster)
            }
        }
    }
}
