//! NTFS volume, limited to the system files of the MFT.
//!
//! The first 16 MFT records describe fixed system files. Their headers are
//! decoded; attributes, indexes and data runs are not.

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use log::{debug, info, warn};
use std::fmt;
use std::io::{Cursor, Write};

use super::boot_sector::{BootSector, Extension, NtfsExt};
use super::dir_entry::{DirEntry, Timestamps, attributes};
use super::entries::Entries;
use super::fs_error::FsError;
use super::fs_type::FsType;
use super::{DirRef, FileSystem, ScanOptions, VolumeContext, file_data};
use crate::constants::MFT_RECORD_SIZE;
use crate::device::BlockDevice;
use crate::traits::LayoutDisplay;

/// Size of the decoded part of an MFT record header.
const MFT_HEADER_SIZE: usize = 42;

/// Names of the system files, by MFT record number.
pub const SYSTEM_FILES: [&str; 16] = [
    "$MFT",
    "$MFTMirr",
    "$LogFile",
    "$Volume",
    "$AttrDef",
    ".",
    "$Bitmap",
    "$Boot",
    "$BadClus",
    "$Quota",
    "$UpCase",
    "$Extend",
    "$Reserved12",
    "$Reserved13",
    "$Reserved14",
    "$Reserved15",
];

const IN_USE_FLAG: u16 = 0x0001;
const DIRECTORY_FLAG: u16 = 0x0002;

/// Header of a 1024-byte MFT record.
#[derive(BinRead, Debug, Clone, Getters, CopyGetters)]
#[br(little)]
pub struct MftEntry {
    /// "FILE", or "BAAD" when a multi-sector transfer failed.
    #[get_copy = "pub"]
    signature: [u8; 4],
    #[get_copy = "pub"]
    usa_offset: u16,
    #[get_copy = "pub"]
    usa_count: u16,
    /// Log file sequence number.
    #[get_copy = "pub"]
    lsn: u64,
    #[get_copy = "pub"]
    sequence: u16,
    #[get_copy = "pub"]
    link_count: u16,
    /// Offset of the first attribute within the record.
    #[get_copy = "pub"]
    attr_offset: u16,
    #[get_copy = "pub"]
    flags: u16,
    #[get_copy = "pub"]
    used_size: u32,
    #[get_copy = "pub"]
    allocated_size: u32,
    /// File reference of the base record, 0 for base records.
    #[get_copy = "pub"]
    base_record: u64,
    #[get_copy = "pub"]
    next_attr_id: u16,
    /// Attribute area, kept opaque.
    #[br(count = MFT_RECORD_SIZE - MFT_HEADER_SIZE)]
    #[get = "pub"]
    attributes: Vec<u8>,
}

impl MftEntry {
    pub fn signature_string(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }

    pub fn is_valid(&self) -> bool {
        &self.signature == b"FILE"
    }

    pub fn is_bad(&self) -> bool {
        &self.signature == b"BAAD"
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & IN_USE_FLAG != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & DIRECTORY_FLAG != 0
    }
}

/// One of the fixed system files.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct SystemFile {
    /// MFT record number.
    #[get_copy = "pub"]
    index: usize,
    #[get_copy = "pub"]
    name: &'static str,
    /// First cluster, only known for `$MFT` and `$MFTMirr`.
    #[get_copy = "pub"]
    cluster: u64,
    #[get_copy = "pub"]
    size: u64,
    #[get = "pub"]
    entry: MftEntry,
}

impl fmt::Display for SystemFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = &self.entry;
        write!(
            f,
            "{:>2} {:<12} cluster {:>10} sig {:<4} seq {:>5} links {:>2} attr@{:<4} used {:>5}/{:<5} base {:016X}{}{}",
            self.index,
            self.name,
            self.cluster,
            e.signature_string(),
            e.sequence,
            e.link_count,
            e.attr_offset,
            e.used_size,
            e.allocated_size,
            e.base_record,
            if e.is_directory() { " dir" } else { "" },
            if e.is_in_use() { "" } else { " unused" }
        )
    }
}

/// An NTFS volume.
#[derive(Debug)]
pub struct NtfsVol {
    boot_sector: BootSector,
    ctx: VolumeContext,
}

impl NtfsVol {
    /// # Errors
    /// - `FsError::UnknownFileSystem` if the boot sector is not an NTFS one.
    pub fn new(boot_sector: BootSector, ctx: VolumeContext) -> Result<Self, FsError> {
        if boot_sector.fs_type() != FsType::NTFS {
            return Err(FsError::UnknownFileSystem);
        }
        Ok(Self { boot_sector, ctx })
    }

    fn ext(&self) -> Result<&NtfsExt, FsError> {
        match self.boot_sector.extension() {
            Extension::Ntfs(ext) => Ok(ext),
            _ => Err(FsError::UnknownFileSystem),
        }
    }

    /// Absolute byte offset of an NTFS cluster.
    ///
    /// # Errors
    /// - `FsError::InvalidGeometry` if the offset overflows.
    fn cluster_location(&self, cluster: u64) -> Result<u64, FsError> {
        self.boot_sector
            .geometry()
            .sector_cluster_location(self.boot_sector.start_sector(), cluster)
            .ok_or_else(|| FsError::InvalidGeometry(format!("NTFS cluster {cluster} out of range")))
    }

    /// Reads and decodes the MFT records of the system files.
    ///
    /// # Errors
    /// - `FsError::Io` if the MFT cannot be read.
    pub fn system_table(&self, device: &mut dyn BlockDevice) -> Result<Vec<SystemFile>, FsError> {
        let ext = self.ext()?;
        let mft_location = self.cluster_location(ext.mft_cluster())?;
        info!(
            "Reading {} system files from the MFT at offset 0x{mft_location:X}",
            SYSTEM_FILES.len()
        );

        let mut buffer = vec![0; SYSTEM_FILES.len() * MFT_RECORD_SIZE];
        device.read_at(mft_location, &mut buffer)?;

        SYSTEM_FILES
            .into_iter()
            .enumerate()
            .map(|(index, name)| -> Result<SystemFile, FsError> {
                let slot = &buffer[index * MFT_RECORD_SIZE..(index + 1) * MFT_RECORD_SIZE];
                let entry: MftEntry = Cursor::new(slot).read_le()?;
                if entry.is_bad() {
                    warn!("MFT record {index} ({name}) is marked BAAD");
                } else if !entry.is_valid() {
                    warn!(
                        "MFT record {index} ({name}) has signature {:?}",
                        entry.signature_string()
                    );
                }

                let cluster = match index {
                    0 => ext.mft_cluster(),
                    1 => ext.mft_mirr_cluster(),
                    _ => 0,
                };
                debug!("{index:02} => {name}: cluster {cluster}, flags 0x{:04X}", entry.flags);
                Ok(SystemFile {
                    index,
                    name,
                    cluster,
                    size: MFT_RECORD_SIZE as u64,
                    entry,
                })
            })
            .collect()
    }

    fn to_dir_entry(&self, file: &SystemFile) -> DirEntry {
        let kind = if file.entry.is_directory() {
            attributes::DIRECTORY
        } else {
            0
        };
        DirEntry {
            entry_type: 0,
            short_name: None,
            long_name: Some(file.name.to_string()),
            attributes: attributes::SYSTEM | attributes::HIDDEN | kind,
            timestamps: Timestamps::default(),
            start_cluster: u32::try_from(file.cluster).unwrap_or(u32::MAX),
            file_size: file.size,
            partition: self.ctx.partition,
            // 1-based like the FAT and exFAT scans.
            index: file.index + 1,
            deleted: false,
            contiguous: true,
        }
    }
}

impl FileSystem for NtfsVol {
    fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    fn context(&self) -> &VolumeContext {
        &self.ctx
    }

    fn set_options(&mut self, options: ScanOptions) {
        self.ctx.options = options;
    }

    /// Lists the system files. Only the root is known.
    fn list_dir<'a>(
        &'a self,
        device: &'a mut dyn BlockDevice,
        dir: DirRef,
    ) -> Result<Entries<'a>, FsError> {
        if dir != DirRef::Root {
            return Err(FsError::Unsupported(format!("NTFS listing of {dir}")));
        }

        self.ctx.progress.update(0);
        let entries = self
            .system_table(&mut *device)?
            .iter()
            .map(|file| self.to_dir_entry(file))
            .collect();

        Ok(Entries::prefilled(
            device,
            entries,
            self.ctx.partition,
            self.ctx.progress.clone(),
        ))
    }

    /// Single contiguous read from the first cluster, data runs are ignored.
    fn read_file(
        &self,
        device: &mut dyn BlockDevice,
        entry: &DirEntry,
        sink: &mut dyn Write,
    ) -> Result<u64, FsError> {
        let offset = self.cluster_location(u64::from(entry.start_cluster()))?;
        info!(
            "Reading {:?}: {} bytes at offset 0x{offset:X}",
            entry.full_name(),
            entry.file_size()
        );

        file_data::read_contiguous(
            device,
            offset,
            entry.file_size(),
            self.boot_sector.geometry().cluster_size(),
            sink,
            &*self.ctx.progress,
        )
    }
}

impl LayoutDisplay for NtfsVol {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        self.boot_sector.display_layout(indent)
    }
}
