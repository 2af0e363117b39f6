/// The number of partitions supported by the MBR partition table.
pub const PART_CNT: usize = 4;

/// The size of a sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Size of the boot code area at the start of the MBR.
pub const MBR_BOOT_CODE_SIZE: usize = 440;

/// Offset of the first partition table entry in the MBR.
pub const MBR_PART_TABLE_OFFSET: usize = 446;

/// Size of a single MBR partition table entry.
pub const MBR_PART_ENTRY_SIZE: usize = 16;

/// Offset of the two signature bytes closing a boot record.
pub const SIGNATURE_OFFSET: usize = 510;

/// Size of every FAT/exFAT directory record.
pub const DIR_ENTRY_SIZE: usize = 32;

/// Cluster numbers below this value are reserved and never address data.
pub const RESERVED_CLUSTERS: u32 = 2;

/// Maximum number of clusters visited while walking a directory chain.
pub const DIR_HOP_LIMIT: usize = 200;

/// Size of one MFT record slot.
pub const MFT_RECORD_SIZE: usize = 1024;

/// Largest FAT table loaded into memory.
pub const MAX_FAT_BYTES: u64 = 512 * 1024 * 1024;
