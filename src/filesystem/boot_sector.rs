//! Boot sector parsing, filesystem detection and geometry derivation.
//!
//! This module implements:
//! - decoding of the BIOS Parameter Block shared by FAT, exFAT and NTFS boot sectors
//! - ranked filesystem detection (OEM name, cluster count, filesystem label)
//! - decoding of the filesystem-specific extension
//! - derivation of the byte offsets of the FAT, root directory and data region

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use log::{debug, info, warn};
use std::fmt::Write;
use std::io::Cursor;

use super::fs_error::FsError;
use super::fs_type::{ClusterConstants, Detection, DetectionSource, FsType};
use crate::constants::{DIR_ENTRY_SIZE, RESERVED_CLUSTERS, SECTOR_SIZE, SIGNATURE_OFFSET};
use crate::partition::mbr::{PTEntry, SECTOR_SIGNATURE};
use crate::traits::LayoutDisplay;
use crate::utils;

/// Cluster counts at or above this value cannot be FAT16.
const FAT16_CLUSTER_LIMIT: u64 = 0xFFF7;
/// Cluster counts at or above this value cannot be FAT12.
const FAT12_CLUSTER_LIMIT: u64 = 0x0FF7;

/// Offset of the FAT12/16 tail (drive number, label, filesystem string).
const FAT_TAIL_OFFSET: u64 = 36;
/// Offset of the FAT tail when preceded by the FAT32 extension.
const FAT32_TAIL_OFFSET: u64 = 64;
const EXFAT_EXT_OFFSET: u64 = 64;
const NTFS_EXT_OFFSET: u64 = 40;

/// Fields common to every boot sector, bytes 0 to 35.
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct BpbCommon {
    /// Jump instruction to the boot code.
    jmp: [u8; 3],
    /// OEM identifier, e.g. "MSWIN4.1", "EXFAT   " or "NTFS    ".
    oem_name: [u8; 8],
    bytes_per_sec: u16,
    sec_per_clus: u8,
    rsvd_sec_cnt: u16,
    num_fats: u8,
    /// Root directory capacity in entries, FAT12/16 only.
    root_ent_cnt: u16,
    tot_sec_16: u16,
    media: u8,
    fat_sz_16: u16,
    sec_per_trk: u16,
    num_heads: u16,
    hidd_sec: u32,
    tot_sec_32: u32,
}

impl BpbCommon {
    /// Sector count of the volume: the 16-bit field unless it is zero.
    pub fn total_sectors(&self) -> u64 {
        if self.tot_sec_16 != 0 {
            self.tot_sec_16.into()
        } else {
            self.tot_sec_32.into()
        }
    }

    pub fn oem_string(&self) -> String {
        utils::ascii_at(&self.oem_name, 0, self.oem_name.len())
    }
}

/// FAT32 extension, bytes 36 to 63.
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct Fat32Ext {
    fat_sz_32: u32,
    ext_flags: u16,
    fs_ver: u16,
    root_clus: u32,
    fs_info: u16,
    bk_boot_sec: u16,
    reserved: [u8; 12],
}

/// Drive number, volume id, label and filesystem string of a FAT boot sector.
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct FatTail {
    drv_num: u8,
    reserved_1: u8,
    /// Extended boot signature (0x29).
    boot_sig: u8,
    vol_id: u32,
    vol_lab: [u8; 11],
    fil_sys_type: [u8; 8],
}

impl FatTail {
    pub fn volume_label(&self) -> String {
        utils::trim_nul(&utils::ascii_at(&self.vol_lab, 0, 11)).to_string()
    }

    pub fn fs_string(&self) -> String {
        utils::trim_nul(&utils::ascii_at(&self.fil_sys_type, 0, 8)).to_string()
    }
}

/// exFAT extension, bytes 64 to 119.
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct ExFatExt {
    partition_offset: u64,
    volume_length: u64,
    /// FAT offset, in sectors from the partition start.
    fat_offset: u32,
    /// FAT length, in sectors.
    fat_length: u32,
    /// Cluster heap offset, in sectors from the partition start.
    cluster_heap_offset: u32,
    cluster_count: u32,
    root_dir_cluster: u32,
    volume_serial: u32,
    fs_revision: u16,
    volume_flags: u16,
    bytes_per_sector_shift: u8,
    sectors_per_cluster_shift: u8,
    num_fats: u8,
    drive_select: u8,
    percent_in_use: u8,
    reserved: [u8; 7],
}

/// NTFS extension, bytes 40 to 83.
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct NtfsExt {
    total_sectors: u64,
    mft_mirr_cluster: u64,
    mft_cluster: u64,
    clusters_per_record: u32,
    clusters_per_index: u8,
    #[br(pad_before = 3)]
    volume_serial: u64,
    checksum: u32,
}

/// The filesystem-specific part of a boot sector, matching its detected type.
#[derive(Debug, Clone)]
pub enum Extension {
    /// FAT12/16 and FAT32. Unrecognised sectors are decoded with this layout too.
    Fat {
        fat32: Option<Fat32Ext>,
        tail: FatTail,
    },
    ExFat(ExFatExt),
    Ntfs(NtfsExt),
}

/// Byte offsets and sizes derived from the boot sector, all relative to the device start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Geometry {
    bytes_per_sector: u64,
    sectors_per_cluster: u64,
    cluster_size: u64,
    fat_size: u64,
    fat_location: u64,
    root_dir_location: u64,
    data_location: u64,
    total_sectors: u64,
    partition_size: u64,
}

impl Geometry {
    /// Byte offset of a data cluster relative to the data region.
    ///
    /// # Errors
    /// - `FsError::InvalidCluster` for the reserved clusters 0 and 1.
    pub fn cluster_offset(&self, cluster: u32) -> Result<u64, FsError> {
        if cluster < RESERVED_CLUSTERS {
            return Err(FsError::InvalidCluster(cluster));
        }
        Ok(u64::from(cluster - RESERVED_CLUSTERS) * self.cluster_size)
    }

    /// Absolute byte offset of a data cluster on the device.
    pub fn cluster_location(&self, cluster: u32) -> Result<u64, FsError> {
        Ok(self.data_location + self.cluster_offset(cluster)?)
    }

    /// Absolute byte offset of a cluster counted from the partition start, as NTFS does.
    /// `None` if the offset does not fit in 64 bits.
    pub fn sector_cluster_location(&self, start_sector: u64, cluster: u64) -> Option<u64> {
        cluster
            .checked_mul(self.sectors_per_cluster)?
            .checked_add(start_sector)?
            .checked_mul(self.bytes_per_sector)
    }
}

/// A parsed boot sector. Built once per partition and never modified.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct BootSector {
    /// The 512 raw bytes.
    #[get = "pub"]
    raw: Vec<u8>,
    /// First sector of the partition.
    #[get_copy = "pub"]
    start_sector: u64,
    #[get = "pub"]
    common: BpbCommon,
    #[get_copy = "pub"]
    detection: Detection,
    #[get = "pub"]
    extension: Extension,
    #[get_copy = "pub"]
    geometry: Geometry,
    /// Reserved cluster values, `None` when the type is unknown.
    #[get_copy = "pub"]
    constants: Option<ClusterConstants>,
    #[get = "pub"]
    boot_code: Vec<u8>,
    /// Boot signature, as hex.
    #[get = "pub"]
    signature: String,
}

impl BootSector {
    /// Parses the boot sector of the partition described by `entry`.
    ///
    /// Detection never fails: an unrecognised sector yields `FsType::Unknown`.
    ///
    /// # Errors
    /// - `FsError::BinRead` if the buffer is too short for the decoded records.
    /// - `FsError::InvalidGeometry` if a detected filesystem has unusable geometry.
    /// - `FsError::InvalidCluster` if the root directory cluster is reserved.
    pub fn parse(entry: &PTEntry, buffer: &[u8]) -> Result<BootSector, FsError> {
        if buffer.len() < SECTOR_SIZE {
            return Err(FsError::InvalidGeometry(format!(
                "boot sector is {} bytes long, expected {SECTOR_SIZE}",
                buffer.len()
            )));
        }

        let mut reader = Cursor::new(buffer);
        let common: BpbCommon = reader.read_le()?;
        let start_sector = u64::from(*entry.lba_start());

        let mut detection = detect_by_oem_name(&common);
        if detection.fs_type == FsType::Unknown {
            detection = detect_by_cluster_count(&common);
        }

        let (extension, boot_code_offset) = match detection.fs_type {
            FsType::ExFAT => {
                reader.set_position(EXFAT_EXT_OFFSET);
                (Extension::ExFat(reader.read_le()?), 120)
            }
            FsType::NTFS => {
                reader.set_position(NTFS_EXT_OFFSET);
                (Extension::Ntfs(reader.read_le()?), 84)
            }
            _ => {
                let fat32: Option<Fat32Ext> = if detection.fs_type == FsType::FAT32 {
                    reader.set_position(FAT_TAIL_OFFSET);
                    Some(reader.read_le()?)
                } else {
                    None
                };
                reader.set_position(if fat32.is_some() {
                    FAT32_TAIL_OFFSET
                } else {
                    FAT_TAIL_OFFSET
                });
                let tail: FatTail = reader.read_le()?;

                detection = refine_by_fs_label(detection, &tail);
                let boot_code_offset = if fat32.is_some() { 90 } else { 62 };
                (Extension::Fat { fat32, tail }, boot_code_offset)
            }
        };

        if detection.is_reliable() {
            info!("Detected {detection}");
        } else {
            warn!("Filesystem detected as {detection}");
        }

        let constants = ClusterConstants::for_type(detection.fs_type);
        let geometry = derive_geometry(entry, &common, &extension, detection.fs_type)?;
        debug!("Geometry: {geometry:?}");

        Ok(BootSector {
            raw: buffer[..SECTOR_SIZE].to_vec(),
            start_sector,
            common,
            detection,
            extension,
            geometry,
            constants,
            boot_code: buffer[boot_code_offset..SIGNATURE_OFFSET].to_vec(),
            signature: utils::hex_at(buffer, SIGNATURE_OFFSET, 2),
        })
    }

    pub fn fs_type(&self) -> FsType {
        self.detection.fs_type
    }

    pub fn is_signature_valid(&self) -> bool {
        self.signature == SECTOR_SIGNATURE
    }

    pub fn jump_code(&self) -> String {
        utils::hex_at(&self.raw, 0, 3)
    }

    pub fn oem_name(&self) -> String {
        self.common.oem_string()
    }

    /// Volume label, FAT only.
    pub fn volume_label(&self) -> Option<String> {
        match &self.extension {
            Extension::Fat { tail, .. } => Some(tail.volume_label()),
            _ => None,
        }
    }

    /// Volume id or serial number, as hex.
    pub fn volume_id(&self) -> String {
        match &self.extension {
            Extension::Fat { tail, .. } => format!("{:08X}", tail.vol_id()),
            Extension::ExFat(ext) => format!("{:08X}", ext.volume_serial()),
            Extension::Ntfs(ext) => format!("{:016X}", ext.volume_serial()),
        }
    }

    /// Filesystem string of a FAT boot sector, NUL-trimmed.
    pub fn fs_string(&self) -> Option<String> {
        match &self.extension {
            Extension::Fat { tail, .. } => Some(tail.fs_string()),
            _ => None,
        }
    }

    /// First cluster of the root directory, FAT32 and exFAT only.
    pub fn root_cluster(&self) -> Option<u32> {
        match &self.extension {
            Extension::Fat {
                fat32: Some(ext), ..
            } => Some(ext.root_clus()),
            Extension::ExFat(ext) => Some(ext.root_dir_cluster()),
            _ => None,
        }
    }

    pub fn formatted_size(&self) -> String {
        utils::format_size(self.geometry.partition_size)
    }

    /// Last sector of the partition, exclusive.
    fn end_sector(&self) -> u64 {
        self.start_sector + self.geometry.total_sectors
    }
}

/// Step 1: OEM name.
fn detect_by_oem_name(common: &BpbCommon) -> Detection {
    let oem_name = common.oem_string();
    let fs_type = if oem_name.contains("EXFAT") {
        FsType::ExFAT
    } else if oem_name.contains("NTFS") {
        FsType::NTFS
    } else {
        return Detection::UNKNOWN;
    };

    Detection {
        fs_type,
        source: DetectionSource::OemName,
    }
}

/// Step 2: provisional FAT type from `total sectors / sectors per cluster`.
fn detect_by_cluster_count(common: &BpbCommon) -> Detection {
    let spc = u64::from(common.sec_per_clus);
    let total = common.total_sectors();
    if spc == 0 || total == 0 {
        return Detection::UNKNOWN;
    }

    let clusters = total / spc;
    let fs_type = if clusters >= FAT16_CLUSTER_LIMIT {
        FsType::FAT32
    } else if clusters >= FAT12_CLUSTER_LIMIT {
        FsType::FAT16
    } else if clusters > 0 {
        FsType::FAT12
    } else {
        return Detection::UNKNOWN;
    };

    Detection {
        fs_type,
        source: DetectionSource::ClusterCount,
    }
}

/// Step 3: the "FAT12"/"FAT16" label overrides a provisional guess.
fn refine_by_fs_label(detection: Detection, tail: &FatTail) -> Detection {
    if detection.is_reliable() {
        return detection;
    }

    let label = tail.fs_string();
    let fs_type = if label.contains("FAT12") {
        FsType::FAT12
    } else if label.contains("FAT16") {
        FsType::FAT16
    } else {
        return detection;
    };

    if detection.fs_type != FsType::Unknown && detection.fs_type != fs_type {
        warn!(
            "Filesystem label {label:?} overrides the cluster count guess {}",
            detection.fs_type
        );
    }

    Detection {
        fs_type,
        source: DetectionSource::FsLabel,
    }
}

fn derive_geometry(
    entry: &PTEntry,
    common: &BpbCommon,
    extension: &Extension,
    fs_type: FsType,
) -> Result<Geometry, FsError> {
    let start = u64::from(*entry.lba_start());

    let geometry = match extension {
        Extension::ExFat(ext) => {
            let bps_shift = ext.bytes_per_sector_shift;
            let spc_shift = ext.sectors_per_cluster_shift;
            if !(9..=12).contains(&bps_shift) || u32::from(spc_shift) > 25 - u32::from(bps_shift)
            {
                return Err(FsError::InvalidGeometry(format!(
                    "illegal exFAT shifts: bytes per sector 2^{bps_shift}, sectors per cluster 2^{spc_shift}"
                )));
            }
            let bps = 1u64 << bps_shift;
            let spc = 1u64 << spc_shift;
            let cluster_size = bps * spc;
            let data_location = (start + u64::from(ext.cluster_heap_offset)) * bps;

            let mut geometry = Geometry {
                bytes_per_sector: bps,
                sectors_per_cluster: spc,
                cluster_size,
                fat_size: u64::from(ext.fat_length) * bps,
                fat_location: (start + u64::from(ext.fat_offset)) * bps,
                root_dir_location: 0,
                data_location,
                total_sectors: u64::from(*entry.sector_cnt()),
                partition_size: u64::from(ext.cluster_count) * cluster_size,
            };
            geometry.root_dir_location = data_location + geometry.cluster_offset(ext.root_dir_cluster)?;
            geometry
        }
        Extension::Ntfs(ext) => {
            let bps = u64::from(common.bytes_per_sec);
            let spc = u64::from(common.sec_per_clus);
            let partition_size = ext.total_sectors.checked_mul(bps).ok_or_else(|| {
                FsError::InvalidGeometry(format!(
                    "NTFS volume of {} sectors of {bps} bytes overflows",
                    ext.total_sectors
                ))
            })?;
            let geometry = Geometry {
                bytes_per_sector: bps,
                sectors_per_cluster: spc,
                cluster_size: bps * spc,
                total_sectors: ext.total_sectors,
                partition_size,
                ..Geometry::default()
            };
            for (name, cluster) in [("$MFT", ext.mft_cluster), ("$MFTMirr", ext.mft_mirr_cluster)] {
                geometry.sector_cluster_location(start, cluster).ok_or_else(|| {
                    FsError::InvalidGeometry(format!("{name} cluster {cluster} lies beyond any device"))
                })?;
            }
            geometry
        }
        Extension::Fat { fat32, .. } => {
            let bps = u64::from(common.bytes_per_sec);
            let spc = u64::from(common.sec_per_clus);
            let num_fats = u64::from(common.num_fats);
            let fat_sz_16 = u64::from(common.fat_sz_16);
            let total_sectors = common.total_sectors();

            let fat_location = (start + u64::from(common.rsvd_sec_cnt)) * bps;
            let root_dir_location = fat_location + fat_sz_16 * num_fats * bps;
            let mut geometry = Geometry {
                bytes_per_sector: bps,
                sectors_per_cluster: spc,
                cluster_size: bps * spc,
                fat_size: fat_sz_16 * bps,
                fat_location,
                root_dir_location,
                data_location: root_dir_location
                    + u64::from(common.root_ent_cnt) * DIR_ENTRY_SIZE as u64,
                total_sectors,
                partition_size: total_sectors * bps,
            };

            let fat32 = fat32.as_ref().filter(|ext| fat_sz_16 == 0 && ext.fat_sz_32 != 0);
            if let Some(ext) = fat32 {
                let fat_sz_32 = u64::from(ext.fat_sz_32);
                geometry.fat_size = fat_sz_32 * bps;
                geometry.data_location = fat_location + fat_sz_32 * num_fats * bps;
                geometry.root_dir_location =
                    geometry.data_location + geometry.cluster_offset(ext.root_clus)?;
            }
            geometry
        }
    };

    if fs_type != FsType::Unknown && geometry.cluster_size == 0 {
        return Err(FsError::InvalidGeometry(format!(
            "{fs_type} volume with a cluster size of 0 ({} bytes per sector, {} sectors per cluster)",
            geometry.bytes_per_sector, geometry.sectors_per_cluster
        )));
    }

    Ok(geometry)
}

impl LayoutDisplay for BootSector {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::from("");
        let indent = " ".repeat(indent.into());
        let geo = &self.geometry;
        let bps = geo.bytes_per_sector.max(1);

        writeln!(
            out,
            "{}┌{:─^55}┐",
            indent,
            format!(" {} Partition Layout ", self.fs_type())
        )?;
        writeln!(out, "{}├{:<35}{:>20}┤", indent, "Detection", self.detection.to_string())?;
        writeln!(out, "{}├{:<35}{:>20}┤", indent, "OEM Name", self.oem_name().trim_end())?;
        writeln!(out, "{}├{:<35}{:>20}┤", indent, "Volume Id", self.volume_id())?;
        if let Some(label) = self.volume_label() {
            writeln!(out, "{}├{:<35}{:>20}┤", indent, "Volume Label", label.trim_end())?;
        }
        writeln!(out, "{}├{:<35}{:>20}┤", indent, "Cluster Size", geo.cluster_size)?;
        writeln!(out, "{}├{:<35}{:>20}┤", indent, "Size", self.formatted_size())?;
        writeln!(
            out,
            "{}├{:<35}{:>20}┤",
            indent,
            "Boot Signature",
            format!(
                "{}{}",
                self.signature,
                if self.is_signature_valid() { "" } else { "!" }
            )
        )?;
        writeln!(out, "{}├{:─^55}┤", indent, "")?;
        writeln!(
            out,
            "{}├{:^12}┬{:^12}┬{:^12}┬{:^16}┤",
            indent, "Region", "Start", "End", "Description"
        )?;
        writeln!(
            out,
            "{}├{:─<12}┼{:─<12}┼{:─<12}┼{:─<16}┤",
            indent, "", "", "", ""
        )?;

        if let Extension::Ntfs(ext) = &self.extension {
            let spc = geo.sectors_per_cluster;
            for (name, cluster) in [("$MFT", ext.mft_cluster), ("$MFTMirr", ext.mft_mirr_cluster)] {
                let start = self.start_sector.saturating_add(cluster.saturating_mul(spc));
                writeln!(
                    out,
                    "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                    indent,
                    name,
                    start,
                    start.saturating_add(spc),
                    "System File"
                )?;
            }
        } else {
            let fat_start = geo.fat_location / bps;
            writeln!(
                out,
                "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                indent, "Reserved", self.start_sector, fat_start, "Boot + Reserved"
            )?;
            let num_fats = match &self.extension {
                Extension::ExFat(ext) => ext.num_fats,
                _ => self.common.num_fats,
            };
            let fat_sectors = geo.fat_size / bps;
            for i in 0..u64::from(num_fats) {
                let fat_i_start = fat_start + i * fat_sectors;
                writeln!(
                    out,
                    "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                    indent,
                    format!("FAT #{i}"),
                    fat_i_start,
                    fat_i_start + fat_sectors,
                    "FAT Tables"
                )?;
            }
            if matches!(self.fs_type(), FsType::FAT12 | FsType::FAT16) {
                writeln!(
                    out,
                    "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                    indent,
                    "Root Dir",
                    geo.root_dir_location / bps,
                    geo.data_location / bps,
                    "Root Directory"
                )?;
            }
            writeln!(
                out,
                "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                indent,
                "Data",
                geo.data_location / bps,
                self.end_sector(),
                "Cluster Data"
            )?;
        }

        writeln!(
            out,
            "{}└{:─<12}┴{:─<12}┴{:─<12}┴{:─<16}┘",
            indent, "", "", "", ""
        )?;

        Ok(out)
    }
}
