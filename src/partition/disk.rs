//! Disk analysis.
//!
//! This module provides functionality for:
//! - Opening a block device and parsing its partition table (MBR only)
//! - Building one volume per partition from its boot sector
//! - Dispatching directory listings and file reads to the right filesystem
//! - Displaying disk layout information

use getset::{CopyGetters, Getters};
use log::{error, info, warn};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;
use std::rc::Rc;

use super::disk_error::DiskError;
use super::mbr::{Mbr, PTEntry};
use crate::constants::SECTOR_SIZE;
use crate::device::BlockDevice;
use crate::filesystem::boot_sector::BootSector;
use crate::filesystem::dir_entry::{DirEntry, PartitionRef};
use crate::filesystem::entries::Entries;
use crate::filesystem::exfat::ExFatVol;
use crate::filesystem::fat::FatVol;
use crate::filesystem::fs_error::FsError;
use crate::filesystem::fs_type::FsType;
use crate::filesystem::ntfs::{NtfsVol, SystemFile};
use crate::filesystem::{DirRef, FileSystem, ScanOptions, VolumeContext};
use crate::traits::{LayoutDisplay, ProgressSink};
use crate::utils;

/// A partition and the filesystem reader selected for it.
#[derive(Debug)]
pub enum Volume {
    Fat(FatVol),
    ExFat(ExFatVol),
    Ntfs(NtfsVol),
    /// Partition whose boot sector could not be interpreted.
    Unsupported { entry: PTEntry, reason: String },
}

impl Volume {
    /// Reads the boot sector of `entry` and selects the reader matching its type.
    ///
    /// Format errors yield `Volume::Unsupported`, device errors are returned.
    pub fn open<D: BlockDevice + ?Sized>(
        device: &mut D,
        entry: PTEntry,
        ctx: VolumeContext,
    ) -> Result<Volume, FsError> {
        let mut buffer = vec![0; SECTOR_SIZE];
        utils::read_sector(device, u64::from(*entry.lba_start()), SECTOR_SIZE, &mut buffer)?;

        let volume = BootSector::parse(&entry, &buffer).and_then(|boot_sector| {
            match boot_sector.fs_type() {
                FsType::FAT12 | FsType::FAT16 | FsType::FAT32 => {
                    FatVol::new(boot_sector, ctx).map(Volume::Fat)
                }
                FsType::ExFAT => ExFatVol::new(boot_sector, ctx).map(Volume::ExFat),
                FsType::NTFS => NtfsVol::new(boot_sector, ctx).map(Volume::Ntfs),
                FsType::Unknown => Err(FsError::UnknownFileSystem),
            }
        });

        match volume {
            Ok(volume) => Ok(volume),
            Err(err) if err.is_format_error() => {
                warn!(
                    "Partition at sector {} skipped: {err}",
                    entry.lba_start()
                );
                Ok(Volume::Unsupported {
                    entry,
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn file_system(&self) -> Option<&dyn FileSystem> {
        match self {
            Volume::Fat(vol) => Some(vol),
            Volume::ExFat(vol) => Some(vol),
            Volume::Ntfs(vol) => Some(vol),
            Volume::Unsupported { .. } => None,
        }
    }

    fn file_system_mut(&mut self) -> Option<&mut dyn FileSystem> {
        match self {
            Volume::Fat(vol) => Some(vol),
            Volume::ExFat(vol) => Some(vol),
            Volume::Ntfs(vol) => Some(vol),
            Volume::Unsupported { .. } => None,
        }
    }

    pub fn fs_type(&self) -> FsType {
        self.file_system()
            .map_or(FsType::Unknown, |fs| fs.fs_type())
    }
}

impl LayoutDisplay for Volume {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        match self {
            Volume::Fat(vol) => vol.display_layout(indent),
            Volume::ExFat(vol) => vol.display_layout(indent),
            Volume::Ntfs(vol) => vol.display_layout(indent),
            Volume::Unsupported { entry, reason } => {
                let mut out = String::new();
                let indent = " ".repeat(indent.into());
                writeln!(out, "{}┌{:─^55}┐", indent, " Unsupported Volume ")?;
                writeln!(out, "{}├{:<35}{:>20}┤", indent, "Partition Type", entry.pt_type().to_string())?;
                writeln!(out, "{}├{:<35}{:>20}┤", indent, "Start Sector", entry.lba_start())?;
                writeln!(out, "{}├{:<35}{:>20}┤", indent, "Sector Count", entry.sector_cnt())?;
                writeln!(out, "{}│ {:<54}│", indent, reason)?;
                writeln!(out, "{}└{:─^55}┘", indent, "")?;
                Ok(out)
            }
        }
    }
}

/// An open device with its partition table and volumes.
#[derive(Getters, CopyGetters)]
pub struct Disk<D: BlockDevice> {
    device: D,
    /// The partition table found on the disk.
    #[get = "pub"]
    mbr: Mbr,
    /// One volume per partition, in table order.
    #[get = "pub"]
    volumes: Vec<Volume>,
    #[get_copy = "pub"]
    options: ScanOptions,
    /// Whether partition processing stopped on a GPT protective entry.
    #[get_copy = "pub"]
    gpt: bool,
}

impl<D: BlockDevice> Disk<D> {
    /// Reads the partition table of `device` and opens every partition.
    ///
    /// A device without partition entries is opened as a single volume.
    ///
    /// # Errors
    /// - `DiskError::Io` or `DiskError::Fs(FsError::Io)` if the device cannot be read.
    pub fn open(
        mut device: D,
        options: ScanOptions,
        progress: Rc<dyn ProgressSink>,
    ) -> Result<Self, DiskError> {
        progress.update(0);
        let mbr = Mbr::from(&mut device)?;
        progress.update(10);

        if mbr.is_signature_valid() {
            info!("MBR signature valid, {} partition(s) found", mbr.pt_entries().len());
        } else {
            warn!("MBR signature is {}, expected 55AA", mbr.signature());
        }
        if mbr.has_overlapping_partitions() {
            warn!("MBR partitions overlap");
        }

        let entries = if mbr.pt_entries().is_empty() {
            info!("No partition entry, reading the whole device as one volume");
            vec![PTEntry::whole_device()]
        } else {
            mbr.pt_entries().clone()
        };

        let mut volumes = vec![];
        let mut gpt = false;
        for (i, entry) in entries.into_iter().enumerate() {
            let partition = PartitionRef(i);
            info!(
                "Partition {partition}: {}, start sector {}, {} sectors{}",
                entry.pt_type(),
                entry.lba_start(),
                entry.sector_cnt(),
                if entry.is_bootable() { ", bootable" } else { "" }
            );
            if entry.is_gpt() {
                error!("Partition {partition}: {}", DiskError::UnsupportedGpt);
                gpt = true;
                break;
            }

            let ctx = VolumeContext::new(partition, options, progress.clone());
            let volume = Volume::open(&mut device, entry, ctx)?;
            info!("Partition {partition}: {}", volume.fs_type());
            volumes.push(volume);
        }
        progress.update(40);

        let disk = Disk {
            device,
            mbr,
            volumes,
            options,
            gpt,
        };
        progress.update(100);
        Ok(disk)
    }

    /// Returns the device.
    pub fn into_device(self) -> D {
        self.device
    }

    pub fn volume(&self, vol: usize) -> Result<&Volume, DiskError> {
        self.volumes.get(vol).ok_or(DiskError::NoSuchVolume(vol + 1))
    }

    /// Changes the scan options of the disk and of every open volume.
    pub fn set_options(&mut self, options: ScanOptions) {
        self.options = options;
        for volume in self.volumes.iter_mut() {
            if let Some(fs) = volume.file_system_mut() {
                fs.set_options(options);
            }
        }
    }

    /// Lists a directory of volume `vol`.
    pub fn list_dir(&mut self, vol: usize, dir: DirRef) -> Result<Entries<'_>, DiskError> {
        let Disk {
            device, volumes, ..
        } = self;
        let fs = file_system(volumes, vol)?;
        Ok(fs.list_dir(device, dir)?)
    }

    /// Lists the directory described by `entry`.
    ///
    /// exFAT directories allocated without a FAT chain are read as contiguous runs.
    pub fn list_entry(&mut self, vol: usize, entry: &DirEntry) -> Result<Entries<'_>, DiskError> {
        match self.volume(vol)?.fs_type() {
            FsType::ExFAT => {
                let Disk {
                    device, volumes, ..
                } = self;
                match volumes.get(vol) {
                    Some(Volume::ExFat(exfat)) => Ok(exfat.list_entry(device, entry)?),
                    _ => Err(DiskError::NoSuchVolume(vol + 1)),
                }
            }
            _ => self.list_dir(vol, DirRef::from(entry)),
        }
    }

    /// Writes the content of `entry` to `sink`.
    pub fn read_file(
        &mut self,
        vol: usize,
        entry: &DirEntry,
        sink: &mut dyn Write,
    ) -> Result<u64, DiskError> {
        if entry.is_dir() {
            return Err(DiskError::Fs(FsError::Unsupported(format!(
                "reading directory {:?} as a file",
                entry.full_name()
            ))));
        }
        let Disk {
            device, volumes, ..
        } = self;
        let fs = file_system(volumes, vol)?;
        Ok(fs.read_file(device, entry, sink)?)
    }

    /// Decodes the allocation table of a FAT or exFAT volume.
    pub fn fat_dump(&mut self, vol: usize) -> Result<Vec<u32>, DiskError> {
        let Disk {
            device, volumes, ..
        } = self;
        let dump = match volumes.get(vol) {
            Some(Volume::Fat(fat)) => fat.fat_dump(device)?,
            Some(Volume::ExFat(exfat)) => exfat.fat_dump(device)?,
            Some(volume) => {
                return Err(DiskError::Fs(FsError::Unsupported(format!(
                    "FAT dump on {}",
                    volume.fs_type()
                ))));
            }
            None => return Err(DiskError::NoSuchVolume(vol + 1)),
        };
        Ok(dump)
    }

    /// Reads the system file table of an NTFS volume.
    pub fn system_table(&mut self, vol: usize) -> Result<Vec<SystemFile>, DiskError> {
        let Disk {
            device, volumes, ..
        } = self;
        match volumes.get(vol) {
            Some(Volume::Ntfs(ntfs)) => Ok(ntfs.system_table(device)?),
            Some(volume) => Err(DiskError::Fs(FsError::Unsupported(format!(
                "system table on {}",
                volume.fs_type()
            )))),
            None => Err(DiskError::NoSuchVolume(vol + 1)),
        }
    }

    /// Renders the directory tree of volume `vol`.
    ///
    /// Directories already visited are not entered twice.
    pub fn tree(&mut self, vol: usize) -> Result<String, DiskError> {
        let mut out = String::new();
        let mut visited = HashSet::new();
        let root: Vec<DirEntry> = self
            .list_dir(vol, DirRef::Root)?
            .collect::<Result<_, _>>()?;
        self.tree_level(vol, root, 0, &mut visited, &mut out)?;
        Ok(out)
    }

    fn tree_level(
        &mut self,
        vol: usize,
        entries: Vec<DirEntry>,
        depth: usize,
        visited: &mut HashSet<u32>,
        out: &mut String,
    ) -> Result<(), DiskError> {
        for entry in entries {
            if entry.is_dot_link() || entry.is_volume_label() {
                continue;
            }
            out.push_str(&format!(
                "{}{}{}\n",
                "   ".repeat(depth),
                entry.full_name(),
                if entry.is_dir() { "/" } else { "" }
            ));

            if !entry.is_dir() || entry.start_cluster() == 0 || entry.deleted() {
                continue;
            }
            if !visited.insert(entry.start_cluster()) {
                warn!(
                    "Directory {:?} at cluster {} already visited",
                    entry.full_name(),
                    entry.start_cluster()
                );
                continue;
            }

            let children: Vec<DirEntry> = match self.list_entry(vol, &entry) {
                Ok(listing) => listing.collect::<Result<_, _>>()?,
                Err(DiskError::Fs(FsError::Unsupported(what))) => {
                    warn!("{what}");
                    continue;
                }
                Err(err) => return Err(err),
            };
            self.tree_level(vol, children, depth + 1, visited, out)?;
        }
        Ok(())
    }

    /// Prints the partition table and the layout of every volume.
    pub fn print_layout(&self, indent: u8) -> Result<(), std::fmt::Error> {
        print!("{}", self.display_layout(indent)?);
        Ok(())
    }
}

/// Reader of volume `vol`, an error for missing or unsupported volumes.
fn file_system(volumes: &[Volume], vol: usize) -> Result<&dyn FileSystem, DiskError> {
    match volumes.get(vol) {
        None => Err(DiskError::NoSuchVolume(vol + 1)),
        Some(Volume::Unsupported { reason, .. }) => Err(DiskError::Fs(FsError::Unsupported(
            format!("partition {}: {reason}", PartitionRef(vol)),
        ))),
        Some(volume) => volume
            .file_system()
            .ok_or(DiskError::NoSuchVolume(vol + 1)),
    }
}

impl<D: BlockDevice> LayoutDisplay for Disk<D> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = self.mbr.display_layout(indent)?;
        for vol in self.volumes.iter() {
            write!(out, "\n{}", vol.display_layout(indent + 3)?)?;
        }
        Ok(out)
    }
}
