//! This module provides functionality for parsing and handling the partition table
//! stored in a Master Boot Record (MBR).
//!
//! It defines structures and methods to interpret partition table entries,
//! filter out implausible ones, and extract relevant metadata from disk images.
use getset::Getters;
use std::fmt::Write;
use std::fmt::{self, Display};

use super::disk_error::DiskError;
use crate::constants::{
    MBR_BOOT_CODE_SIZE, MBR_PART_ENTRY_SIZE, MBR_PART_TABLE_OFFSET, PART_CNT, SECTOR_SIZE,
    SIGNATURE_OFFSET,
};
use crate::device::BlockDevice;
use crate::filesystem::fs_type::FsType;
use crate::traits::LayoutDisplay;
use crate::utils;

/// Hex rendering of a valid boot record signature.
pub const SECTOR_SIGNATURE: &str = "55AA";
/// Hex rendering of the copy-protection flag marking a protected drive.
pub const COPY_PROTECTED_FLAG: &str = "5A5A";
/// Hex rendering of the boot flag of an active partition.
pub const BOOTABLE_FLAG: &str = "80";

/// Represents the type code of a partition table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PTType {
    FAT12Chs,
    FAT16Chs,
    ExtendedChs,
    FAT16BigChs,
    NtfsExFatChs,
    FAT32Chs,
    FAT32Lba,
    FAT16BigLba,
    ExtendedLba,
    /// Protective entry of a GUID partition table.
    Gpt,
    /// Any other code, encapsulating the raw type byte.
    Other(u8),
}

impl Display for PTType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PTType::FAT12Chs => write!(f, "FAT12 CHS"),
            PTType::FAT16Chs => write!(f, "FAT16 CHS"),
            PTType::ExtendedChs => write!(f, "Extended CHS"),
            PTType::FAT16BigChs => write!(f, "FAT12/16 CHS"),
            PTType::NtfsExFatChs => write!(f, "NTFS/exFAT"),
            PTType::FAT32Chs => write!(f, "FAT32 CHS"),
            PTType::FAT32Lba => write!(f, "FAT32 LBA"),
            PTType::FAT16BigLba => write!(f, "FAT12/16 LBA"),
            PTType::ExtendedLba => write!(f, "Extended LBA"),
            PTType::Gpt => write!(f, "GPT"),
            PTType::Other(b) => write!(f, "Other: 0x{b:02X}"),
        }
    }
}

impl PTType {
    /// Creates a `PTType` instance from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => PTType::FAT12Chs,
            0x04 => PTType::FAT16Chs,
            0x05 => PTType::ExtendedChs,
            0x06 => PTType::FAT16BigChs,
            0x07 => PTType::NtfsExFatChs,
            0x0B => PTType::FAT32Chs,
            0x0C => PTType::FAT32Lba,
            0x0E => PTType::FAT16BigLba,
            0x0F => PTType::ExtendedLba,
            0xEE => PTType::Gpt,
            other => PTType::Other(other),
        }
    }

    /// Returns the raw type byte.
    pub fn code(&self) -> u8 {
        match self {
            PTType::FAT12Chs => 0x01,
            PTType::FAT16Chs => 0x04,
            PTType::ExtendedChs => 0x05,
            PTType::FAT16BigChs => 0x06,
            PTType::NtfsExFatChs => 0x07,
            PTType::FAT32Chs => 0x0B,
            PTType::FAT32Lba => 0x0C,
            PTType::FAT16BigLba => 0x0E,
            PTType::ExtendedLba => 0x0F,
            PTType::Gpt => 0xEE,
            PTType::Other(b) => *b,
        }
    }

    /// Filesystem suggested by the type code.
    ///
    /// Type codes are frequently wrong on real media, so this hint is only
    /// informative: filesystem detection relies on the boot sector.
    pub fn fs_hint(&self) -> FsType {
        match self {
            PTType::FAT12Chs => FsType::FAT12,
            PTType::FAT16Chs => FsType::FAT16,
            PTType::FAT32Chs | PTType::FAT32Lba => FsType::FAT32,
            _ => FsType::Unknown,
        }
    }
}

/// Represents a single partition table entry.
#[derive(Debug, Clone, Getters)]
pub struct PTEntry {
    /// Boot indicator, as hex ("80" when active).
    #[get = "pub"]
    boot_flag: String,
    /// CHS address of the first sector, as hex.
    #[get = "pub"]
    chs_begin: String,
    /// The type of the partition.
    #[get = "pub"]
    pt_type: PTType,
    /// CHS address of the last sector, as hex.
    #[get = "pub"]
    chs_end: String,
    /// The starting Logical Block Address (LBA) of the partition.
    #[get = "pub"]
    lba_start: u32,
    /// The number of sectors in the partition.
    #[get = "pub"]
    sector_cnt: u32,
}

impl PTEntry {
    /// Decodes a 16-byte partition table entry.
    pub fn from_slice(buf: &[u8]) -> Self {
        PTEntry {
            boot_flag: utils::hex_at(buf, 0, 1),
            chs_begin: utils::hex_at(buf, 1, 3),
            pt_type: PTType::from_byte(utils::u8_at(buf, 4)),
            chs_end: utils::hex_at(buf, 5, 3),
            lba_start: utils::u32_at(buf, 8),
            sector_cnt: utils::u32_at(buf, 12),
        }
    }

    /// Entry standing for a whole unpartitioned device.
    pub fn whole_device() -> Self {
        PTEntry {
            boot_flag: String::from("00"),
            chs_begin: String::from("000000"),
            pt_type: PTType::Other(0),
            chs_end: String::from("000000"),
            lba_start: 0,
            sector_cnt: 0,
        }
    }

    /// Whether the entry describes a plausible partition or a GPT protective entry.
    pub fn is_plausible(&self) -> bool {
        let code = self.pt_type.code();
        ((0x01..=0x0F).contains(&code) && self.lba_start > 0 && self.sector_cnt > 0)
            || self.pt_type == PTType::Gpt
    }

    pub fn is_bootable(&self) -> bool {
        self.boot_flag == BOOTABLE_FLAG
    }

    pub fn is_gpt(&self) -> bool {
        self.pt_type == PTType::Gpt
    }
}

/// Represents a Master Boot Record (MBR), including partition table entries
/// and the boot signature.
#[derive(Debug, Clone, Getters)]
pub struct Mbr {
    /// The 512 raw bytes of the record.
    #[get = "pub"]
    raw: Vec<u8>,
    /// The boot code area.
    #[get = "pub"]
    boot_code: Vec<u8>,
    /// Drive serial number, as hex.
    #[get = "pub"]
    drive_serial: String,
    /// Copy-protection flag, as hex.
    #[get = "pub"]
    copy_protection: String,
    /// Boot signature, as hex.
    #[get = "pub"]
    signature: String,
    /// Plausible partition table entries, in table order.
    #[get = "pub"]
    pt_entries: Vec<PTEntry>,
    /// Size of the disk in sectors, when known.
    #[get = "pub"]
    sector_cnt: u64,
}

impl Mbr {
    /// Reads and parses the MBR found in the first sector of a device.
    ///
    /// # Errors
    /// - `DiskError::Io` if the sector or the device size cannot be read.
    pub fn from<D: BlockDevice + ?Sized>(device: &mut D) -> Result<Mbr, DiskError> {
        let mut buffer = vec![0; SECTOR_SIZE];
        utils::read_sector(device, 0, SECTOR_SIZE, &mut buffer)?;

        let sector_cnt = device.len()? / SECTOR_SIZE as u64;
        Ok(Mbr::parse(&buffer)?.with_sector_cnt(sector_cnt))
    }

    /// Parses a 512-byte master boot record.
    ///
    /// Entries which are not plausible (see [`PTEntry::is_plausible`]) are dropped.
    ///
    /// # Errors
    /// - `DiskError::InvalidLength` if `buffer` is not exactly 512 bytes.
    pub fn parse(buffer: &[u8]) -> Result<Mbr, DiskError> {
        if buffer.len() != SECTOR_SIZE {
            return Err(DiskError::InvalidLength(buffer.len()));
        }

        let pt_entries = (0..PART_CNT)
            .map(|i| {
                let offset = MBR_PART_TABLE_OFFSET + i * MBR_PART_ENTRY_SIZE;
                PTEntry::from_slice(&buffer[offset..offset + MBR_PART_ENTRY_SIZE])
            })
            .filter(PTEntry::is_plausible)
            .collect();

        Ok(Mbr {
            raw: buffer.to_vec(),
            boot_code: buffer[..MBR_BOOT_CODE_SIZE].to_vec(),
            drive_serial: utils::hex_at(buffer, MBR_BOOT_CODE_SIZE, 4),
            copy_protection: utils::hex_at(buffer, MBR_BOOT_CODE_SIZE + 4, 2),
            signature: utils::hex_at(buffer, SIGNATURE_OFFSET, 2),
            pt_entries,
            sector_cnt: 0,
        })
    }

    fn with_sector_cnt(mut self, sector_cnt: u64) -> Self {
        self.sector_cnt = sector_cnt;
        self
    }

    pub fn is_signature_valid(&self) -> bool {
        self.signature == SECTOR_SIGNATURE
    }

    pub fn is_copy_protected(&self) -> bool {
        self.copy_protection == COPY_PROTECTED_FLAG
    }

    /// Whether the table holds a GPT protective entry.
    pub fn has_gpt(&self) -> bool {
        self.pt_entries.iter().any(PTEntry::is_gpt)
    }

    /// Checks if partition table entries overlap, comparing neighbours by start sector.
    pub fn has_overlapping_partitions(&self) -> bool {
        let mut entries: Vec<&PTEntry> = self.pt_entries.iter().collect();
        entries.sort_by_key(|entry| entry.lba_start);

        entries.windows(2).any(|pair| {
            u64::from(pair[0].lba_start) + u64::from(pair[0].sector_cnt)
                > u64::from(pair[1].lba_start)
        })
    }
}

/// Prints the layout of the disk based on the Master Boot Record (MBR).
///
/// # Behavior
/// - Prints the disk size and signature.
/// - Iterates through the partition table entries and prints their sector ranges.
impl LayoutDisplay for Mbr {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::from("");
        let indent = " ".repeat(indent.into());

        let mut last_end = 0;
        let disk_end = self.sector_cnt;

        writeln!(out, "{}┌{:─^55}┐", indent, " Master Boot Record Layout ")?;
        writeln!(out, "{}├{:<45}{:>10}┤", indent, "Disk Size", disk_end)?;
        writeln!(
            out,
            "{}├{:<45}{:>10}┤",
            indent,
            "Boot Signature",
            format!(
                "{}{}",
                self.signature,
                if self.is_signature_valid() { "" } else { "!" }
            )
        )?;
        writeln!(out, "{}├{:<45}{:>10}┤", indent, "Drive Serial", self.drive_serial)?;
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

        for (i, entry) in self.pt_entries.iter().enumerate() {
            let start = u64::from(entry.lba_start);
            let end = start + u64::from(entry.sector_cnt);

            if start > last_end {
                writeln!(
                    out,
                    "{}│{:^12}│{:>12}│{:>12}│{:^16}│",
                    indent, "", last_end, start, "Unallocated"
                )?;
            }

            writeln!(
                out,
                "{}│{:^12}│{:>12}│{:>12}│{:^16}│",
                indent,
                format!("Part #{}{}", i + 1, if entry.is_bootable() { "*" } else { "" }),
                start,
                end,
                entry.pt_type.to_string()
            )?;

            last_end = last_end.max(end);
        }

        if last_end < disk_end {
            writeln!(
                out,
                "{}│{:^12}│{:>12}│{:>12}│{:^16}│",
                indent, "", last_end, disk_end, "Unallocated"
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

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(buf: &mut [u8], i: usize, flag: u8, code: u8, start: u32, cnt: u32) {
        let off = MBR_PART_TABLE_OFFSET + i * MBR_PART_ENTRY_SIZE;
        buf[off] = flag;
        buf[off + 1..off + 4].copy_from_slice(&[0x20, 0x21, 0x00]);
        buf[off + 4] = code;
        buf[off + 5..off + 8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        buf[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
        buf[off + 12..off + 16].copy_from_slice(&cnt.to_le_bytes());
    }

    fn blank_mbr() -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        buf[440..444].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        buf[510] = 0x55;
        buf[511] = 0xAA;
        buf
    }

    #[test]
    fn plausible_entries_are_kept() {
        let mut buf = blank_mbr();
        entry(&mut buf, 0, 0x80, 0x0C, 2048, 204800);
        entry(&mut buf, 1, 0x00, 0x00, 0, 0);
        entry(&mut buf, 2, 0x00, 0x83, 206848, 1000);
        entry(&mut buf, 3, 0x00, 0x07, 0, 1000);

        let mbr = Mbr::parse(&buf).unwrap();

        assert_eq!(mbr.pt_entries().len(), 1);
        let part = &mbr.pt_entries()[0];
        assert_eq!(*part.pt_type(), PTType::FAT32Lba);
        assert_eq!(*part.lba_start(), 2048);
        assert_eq!(*part.sector_cnt(), 204800);
        assert!(part.is_bootable());
        assert_eq!(part.chs_begin(), "202100");
        assert_eq!(part.chs_end(), "FEFFFF");
    }

    #[test]
    fn gpt_protective_entry_is_kept_without_sectors() {
        let mut buf = blank_mbr();
        entry(&mut buf, 0, 0x00, 0xEE, 0, 0);

        let mbr = Mbr::parse(&buf).unwrap();

        assert!(mbr.has_gpt());
        assert_eq!(mbr.pt_entries()[0].pt_type().fs_hint(), FsType::Unknown);
    }

    #[test]
    fn header_fields_are_rendered_as_hex() {
        let mut buf = blank_mbr();
        buf[444] = 0x5A;
        buf[445] = 0x5A;

        let mbr = Mbr::parse(&buf).unwrap();

        assert_eq!(mbr.drive_serial(), "DEADBEEF");
        assert_eq!(mbr.signature(), "55AA");
        assert!(mbr.is_signature_valid());
        assert!(mbr.is_copy_protected());
        assert_eq!(mbr.boot_code().len(), MBR_BOOT_CODE_SIZE);
        assert!(mbr.pt_entries().is_empty());
    }

    #[test]
    fn invalid_signature_is_reported_not_rejected() {
        let mut buf = blank_mbr();
        buf[510] = 0;
        let mbr = Mbr::parse(&buf).unwrap();
        assert!(!mbr.is_signature_valid());
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(matches!(
            Mbr::parse(&[0u8; 100]),
            Err(DiskError::InvalidLength(100))
        ));
    }

    #[test]
    fn overlapping_partitions_are_detected() {
        let mut buf = blank_mbr();
        entry(&mut buf, 0, 0x00, 0x0C, 4096, 4096);
        entry(&mut buf, 1, 0x00, 0x0C, 2048, 4096);

        let mbr = Mbr::parse(&buf).unwrap();

        assert!(mbr.has_overlapping_partitions());
        assert!(mbr.display_layout(0).unwrap().contains("Part #2"));
    }
}
