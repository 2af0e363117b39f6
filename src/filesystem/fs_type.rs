//! Filesystem type tags and the per-type cluster constants.

use std::fmt;

/// Represents the filesystems the boot-sector parser can identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Unknown,
    FAT12,
    FAT16,
    FAT32,
    ExFAT,
    NTFS,
}

impl FsType {
    /// FAT12, FAT16 and FAT32 share the FAT boot sector layout and directory format.
    pub fn is_fat(&self) -> bool {
        matches!(self, FsType::FAT12 | FsType::FAT16 | FsType::FAT32)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsType::Unknown => "Unknown",
            FsType::FAT12 => "FAT12",
            FsType::FAT16 => "FAT16",
            FsType::FAT32 => "FAT32",
            FsType::ExFAT => "exFAT",
            FsType::NTFS => "NTFS",
        };
        write!(f, "{s}")
    }
}

/// Which detector produced the filesystem type.
///
/// Only the OEM name and the filesystem label are read from the medium;
/// the cluster-count heuristic is a guess and may be wrong on non-standard media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// No detector recognised the boot sector.
    None,
    /// The OEM name field contains "EXFAT" or "NTFS".
    OemName,
    /// Provisional guess derived from `total sectors / sectors per cluster`.
    ClusterCount,
    /// The FAT filesystem label contains "FAT12" or "FAT16".
    FsLabel,
}

/// Outcome of filesystem detection: the type and the detector it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub fs_type: FsType,
    pub source: DetectionSource,
}

impl Detection {
    pub const UNKNOWN: Detection = Detection {
        fs_type: FsType::Unknown,
        source: DetectionSource::None,
    };

    /// Whether the type was read from a signature rather than guessed.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self.source,
            DetectionSource::OemName | DetectionSource::FsLabel
        )
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            DetectionSource::None => "undetected",
            DetectionSource::OemName => "OEM name",
            DetectionSource::ClusterCount => "cluster count, unverified",
            DetectionSource::FsLabel => "FS label",
        };
        write!(f, "{} ({source})", self.fs_type)
    }
}

/// Width of one FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryWidth {
    /// Two entries packed in three bytes.
    Bits12,
    Bits16,
    /// FAT32 entries; the upper four bits are reserved and masked off.
    Bits28,
    /// exFAT entries, all 32 bits significant.
    Bits32,
}

impl EntryWidth {
    pub fn bits(&self) -> u32 {
        match self {
            EntryWidth::Bits12 => 12,
            EntryWidth::Bits16 => 16,
            EntryWidth::Bits28 | EntryWidth::Bits32 => 32,
        }
    }
}

/// Reserved cluster values of one filesystem type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConstants {
    pub width: EntryWidth,
    pub bad: u32,
    pub eof: u32,
    pub max: u32,
}

impl ClusterConstants {
    pub const FAT12: ClusterConstants = ClusterConstants {
        width: EntryWidth::Bits12,
        bad: 0x0FF7,
        eof: 0x0FF8,
        max: 0x0FFF,
    };
    pub const FAT16: ClusterConstants = ClusterConstants {
        width: EntryWidth::Bits16,
        bad: 0xFFF7,
        eof: 0xFFF8,
        max: 0xFFFF,
    };
    pub const FAT32: ClusterConstants = ClusterConstants {
        width: EntryWidth::Bits28,
        bad: 0x0FFF_FFF7,
        eof: 0x0FFF_FFF8,
        max: 0x0FFF_FFFF,
    };
    pub const EXFAT: ClusterConstants = ClusterConstants {
        width: EntryWidth::Bits32,
        bad: 0xFFFF_FFF7,
        eof: 0xFFFF_FFF8,
        max: 0xFFFF_FFFF,
    };

    /// Looks up the constants of a filesystem type. NTFS has no FAT but is
    /// given the exFAT values so cluster arithmetic stays uniform.
    pub fn for_type(fs_type: FsType) -> Option<ClusterConstants> {
        match fs_type {
            FsType::FAT12 => Some(Self::FAT12),
            FsType::FAT16 => Some(Self::FAT16),
            FsType::FAT32 => Some(Self::FAT32),
            FsType::ExFAT | FsType::NTFS => Some(Self::EXFAT),
            FsType::Unknown => None,
        }
    }

    /// Bytes occupied by one FAT entry, 0 for the packed 12-bit format.
    pub fn bytes_per_entry(&self) -> usize {
        match self.width {
            EntryWidth::Bits12 => 0,
            EntryWidth::Bits16 => 2,
            EntryWidth::Bits28 | EntryWidth::Bits32 => 4,
        }
    }
}
