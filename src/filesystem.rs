//! Filesystem readers.
//!
//! A partition's boot sector is parsed once ([`boot_sector`]); the detected type
//! selects a reader implementing [`FileSystem`]:
//! - [`fat::FatVol`]: FAT12, FAT16 and FAT32
//! - [`exfat::ExFatVol`]: exFAT
//! - [`ntfs::NtfsVol`]: NTFS system files only
//!
//! FAT and exFAT share the cluster-chain walker ([`chain`]) and the file data reader ([`file_data`]).

pub mod boot_sector;
pub mod chain;
pub mod dir_entry;
pub mod entries;
pub mod exfat;
pub mod fat;
pub mod file_data;
pub mod fs_error;
pub mod fs_type;
pub mod ntfs;

use log::error;
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

use boot_sector::BootSector;
use chain::BadClusterPolicy;
use dir_entry::{DirEntry, PartitionRef};
use entries::Entries;
use fs_error::FsError;
use fs_type::FsType;

use crate::device::BlockDevice;
use crate::traits::{NoProgress, ProgressSink};

/// Runtime options of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// List entries marked as deleted.
    pub include_deleted: bool,
    pub bad_cluster_policy: BadClusterPolicy,
}

/// State shared by every operation on one volume.
#[derive(Clone)]
pub struct VolumeContext {
    pub partition: PartitionRef,
    pub options: ScanOptions,
    pub progress: Rc<dyn ProgressSink>,
}

impl VolumeContext {
    pub fn new(partition: PartitionRef, options: ScanOptions, progress: Rc<dyn ProgressSink>) -> Self {
        Self {
            partition,
            options,
            progress,
        }
    }
}

impl Default for VolumeContext {
    fn default() -> Self {
        Self::new(PartitionRef(0), ScanOptions::default(), Rc::new(NoProgress))
    }
}

impl fmt::Debug for VolumeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeContext")
            .field("partition", &self.partition)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Directory to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirRef {
    Root,
    /// Directory starting at a data cluster.
    Cluster(u32),
}

impl From<u32> for DirRef {
    /// Cluster 0 is how FAT subdirectories refer to the root directory.
    fn from(cluster: u32) -> Self {
        match cluster {
            0 => DirRef::Root,
            n => DirRef::Cluster(n),
        }
    }
}

impl From<&DirEntry> for DirRef {
    fn from(entry: &DirEntry) -> Self {
        DirRef::from(entry.start_cluster())
    }
}

impl fmt::Display for DirRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirRef::Root => write!(f, "root directory"),
            DirRef::Cluster(n) => write!(f, "directory at cluster 0x{n:08X}"),
        }
    }
}

/// Read access to a filesystem. Implementations are selected from the detected `FsType`.
pub trait FileSystem {
    fn boot_sector(&self) -> &BootSector;

    fn context(&self) -> &VolumeContext;

    fn set_options(&mut self, options: ScanOptions);

    fn fs_type(&self) -> FsType {
        self.boot_sector().fs_type()
    }

    /// Lists a directory lazily.
    ///
    /// A corrupt directory chain ends the iteration early, the reason is
    /// available from [`Entries::truncation`].
    fn list_dir<'a>(
        &'a self,
        device: &'a mut dyn BlockDevice,
        dir: DirRef,
    ) -> Result<Entries<'a>, FsError>;

    /// Writes the content of `entry` to `sink` and returns the number of bytes written.
    ///
    /// # Errors
    /// - `FsError::ShortRead` if the chain ends before the declared size is reached.
    fn read_file(
        &self,
        device: &mut dyn BlockDevice,
        entry: &DirEntry,
        sink: &mut dyn Write,
    ) -> Result<u64, FsError>;

    fn write_file(
        &self,
        _device: &mut dyn BlockDevice,
        _entry: &DirEntry,
        _source: &mut dyn Read,
    ) -> Result<u64, FsError> {
        Err(unsupported(self.fs_type(), "write_file"))
    }

    fn create_file(
        &self,
        _device: &mut dyn BlockDevice,
        _dir: DirRef,
        _name: &str,
    ) -> Result<DirEntry, FsError> {
        Err(unsupported(self.fs_type(), "create_file"))
    }

    fn delete_file(&self, _device: &mut dyn BlockDevice, _entry: &DirEntry) -> Result<(), FsError> {
        Err(unsupported(self.fs_type(), "delete_file"))
    }

    fn format(&self, _device: &mut dyn BlockDevice) -> Result<(), FsError> {
        Err(unsupported(self.fs_type(), "format"))
    }
}

fn unsupported(fs_type: FsType, operation: &str) -> FsError {
    error!("{operation} is not supported on {fs_type} volumes");
    FsError::Unsupported(format!("{operation} on {fs_type}"))
}
