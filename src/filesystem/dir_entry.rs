//! Directory entry shared by the FAT, exFAT and NTFS readers.

use getset::{CopyGetters, Getters};
use std::fmt;

use crate::utils;

/// Attribute bits of FAT and exFAT directory entries.
pub mod attributes {
    pub const READ_ONLY: u16 = 0x01;
    pub const HIDDEN: u16 = 0x02;
    pub const SYSTEM: u16 = 0x04;
    pub const VOLUME_ID: u16 = 0x08;
    pub const DIRECTORY: u16 = 0x10;
    pub const ARCHIVE: u16 = 0x20;
    /// Combination marking a long-file-name fragment.
    pub const LONG_NAME: u16 = READ_ONLY | HIDDEN | SYSTEM | VOLUME_ID;
}

/// Non-owning reference to the partition an entry was read from: its index on the disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PartitionRef(pub usize);

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0 + 1)
    }
}

/// Raw 8.3 name of a FAT entry, first byte included (0xE5 for deleted entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName {
    pub name: [u8; 8],
    pub ext: [u8; 3],
}

impl ShortName {
    /// Trimmed base name and extension joined as stored in FAT directories.
    ///
    /// The dot is only inserted for entries whose attribute is exactly `ARCHIVE`;
    /// any other attribute gets the extension appended directly.
    pub fn display_name(&self, attr: u16) -> String {
        let name = utils::ascii_at(&self.name, 0, self.name.len());
        let ext = utils::ascii_at(&self.ext, 0, self.ext.len());
        let mut full = name.trim_end_matches(' ').to_string();
        let ext = ext.trim_end_matches(' ');

        if !ext.is_empty() {
            if attr == attributes::ARCHIVE {
                full.push('.');
            }
            full.push_str(ext);
        }
        full
    }
}

/// DOS date and time pair, as found in FAT entries and exFAT timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DosTimestamp {
    pub date: u16,
    pub time: u16,
}

impl DosTimestamp {
    pub fn new(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// exFAT packs the date in the upper half of a 32-bit timestamp.
    pub fn from_exfat(raw: u32) -> Self {
        Self::new((raw >> 16) as u16, raw as u16)
    }

    pub fn is_set(&self) -> bool {
        self.date != 0 || self.time != 0
    }

    pub fn year(&self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub fn month(&self) -> u16 {
        (self.date >> 5) & 0x0F
    }

    pub fn day(&self) -> u16 {
        self.date & 0x1F
    }

    pub fn hour(&self) -> u16 {
        self.time >> 11
    }

    pub fn minute(&self) -> u16 {
        (self.time >> 5) & 0x3F
    }

    /// Seconds, stored with a two-second granularity.
    pub fn second(&self) -> u16 {
        (self.time & 0x1F) * 2
    }
}

impl fmt::Display for DosTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_set() {
            return write!(f, "-");
        }
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub created: DosTimestamp,
    pub modified: DosTimestamp,
    pub accessed: DosTimestamp,
}

/// A directory entry, whatever the filesystem it was decoded from.
///
/// Entries are built by the directory scanners and are immutable afterwards.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct DirEntry {
    /// First byte of the record: FAT name byte, exFAT entry type, or 0 for NTFS slots.
    #[get_copy = "pub"]
    pub(super) entry_type: u8,
    #[get_copy = "pub"]
    pub(super) short_name: Option<ShortName>,
    #[get = "pub"]
    pub(super) long_name: Option<String>,
    #[get_copy = "pub"]
    pub(super) attributes: u16,
    #[get_copy = "pub"]
    pub(super) timestamps: Timestamps,
    #[get_copy = "pub"]
    pub(super) start_cluster: u32,
    #[get_copy = "pub"]
    pub(super) file_size: u64,
    /// Partition the entry belongs to.
    #[get_copy = "pub"]
    pub(super) partition: PartitionRef,
    /// Position of the record within its scan, counting every record from 1.
    /// NTFS system files use their MFT record number plus one, so `$MFT` is 1.
    #[get_copy = "pub"]
    pub(super) index: usize,
    #[get_copy = "pub"]
    pub(super) deleted: bool,
    /// exFAT allocation without a FAT chain.
    #[get_copy = "pub"]
    pub(super) contiguous: bool,
}

impl DirEntry {
    /// Long name when one was reconstructed, otherwise the short name.
    /// The result is cut at its first NUL character.
    pub fn full_name(&self) -> String {
        let name = match (&self.long_name, &self.short_name) {
            (Some(long), _) => long.clone(),
            (None, Some(short)) => short.display_name(self.attributes),
            (None, None) => String::new(),
        };
        utils::trim_nul(&name).to_string()
    }

    pub fn is_dir(&self) -> bool {
        self.attributes & attributes::DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & attributes::VOLUME_ID != 0 && !self.is_dir()
    }

    /// The "." and ".." links of a subdirectory.
    pub fn is_dot_link(&self) -> bool {
        matches!(self.full_name().as_str(), "." | "..")
    }

    pub fn formatted_size(&self) -> String {
        utils::format_size(self.file_size)
    }

    /// One-letter flags: directory, read-only, hidden, system, volume, archive.
    pub fn attribute_flags(&self) -> String {
        [
            (attributes::DIRECTORY, 'D'),
            (attributes::READ_ONLY, 'R'),
            (attributes::HIDDEN, 'H'),
            (attributes::SYSTEM, 'S'),
            (attributes::VOLUME_ID, 'V'),
            (attributes::ARCHIVE, 'A'),
        ]
        .iter()
        .map(|(bit, c)| if self.attributes & bit != 0 { *c } else { '-' })
        .collect()
    }
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4} {} {:>12} {:>10} {} \"{}\"{}",
            self.index,
            self.attribute_flags(),
            self.file_size,
            self.start_cluster,
            self.timestamps.modified,
            self.full_name(),
            if self.deleted { " (deleted)" } else { "" }
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(short: Option<ShortName>, long: Option<&str>, attr: u16) -> DirEntry {
        DirEntry {
            entry_type: 0x41,
            short_name: short,
            long_name: long.map(str::to_string),
            attributes: attr,
            timestamps: Timestamps::default(),
            start_cluster: 2,
            file_size: 0,
            partition: PartitionRef(0),
            index: 1,
            deleted: false,
            contiguous: false,
        }
    }

    fn short(name: &[u8; 8], ext: &[u8; 3]) -> Option<ShortName> {
        Some(ShortName {
            name: *name,
            ext: *ext,
        })
    }

    #[test]
    fn short_name_dot_only_for_plain_archive() {
        let archive = entry(short(b"README  ", b"TXT"), None, attributes::ARCHIVE);
        let read_only = entry(
            short(b"README  ", b"TXT"),
            None,
            attributes::ARCHIVE | attributes::READ_ONLY,
        );
        let no_ext = entry(short(b"DOCS    ", b"   "), None, attributes::DIRECTORY);

        assert_eq!(archive.full_name(), "README.TXT");
        assert_eq!(read_only.full_name(), "READMETXT");
        assert_eq!(no_ext.full_name(), "DOCS");
        assert!(no_ext.is_dir());
    }

    #[test]
    fn long_name_wins_and_is_cut_at_nul() {
        let e = entry(short(b"LONGFI~1", b"TXT"), Some("long file.txt\0\u{FFFF}"), 0x20);
        assert_eq!(e.full_name(), "long file.txt");
    }

    #[test]
    fn dos_timestamp_decoding() {
        // 2024-03-15 13:45:30
        let date = ((2024 - 1980) << 9) | (3 << 5) | 15;
        let time = (13 << 11) | (45 << 5) | 15;
        let ts = DosTimestamp::new(date, time);

        assert_eq!(ts.to_string(), "2024-03-15 13:45:30");
        assert_eq!(DosTimestamp::from_exfat((u32::from(date) << 16) | u32::from(time)), ts);
        assert_eq!(DosTimestamp::default().to_string(), "-");
    }

    #[test]
    fn attribute_flags_rendering() {
        let e = entry(None, Some("x"), attributes::DIRECTORY | attributes::HIDDEN);
        assert_eq!(e.attribute_flags(), "D-H---");
        assert!(!e.is_volume_label());
        assert!(entry(None, Some("LABEL"), attributes::VOLUME_ID).is_volume_label());
    }
}
