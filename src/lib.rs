//!
//! disk_forensics: A library and CLI reconstructing partitions, directories and files
//! from raw disk images and drives, without mounting them.
//!
//! This crate provides tools for:
//! - Parsing Master Boot Records (MBR)
//! - Detecting FAT12/16/32, exFAT and NTFS filesystems from their boot sector
//! - Walking cluster chains, listing directories and extracting files (FAT, exFAT)
//! - Decoding the NTFS system file table
//! - Printing disk and filesystem layouts
//!
//! # Re-exports
//! - [`Disk`]: Disk abstraction with partition and volume management
//! - [`Volume`]: Enum for supported volume types
//! - [`DiskImage`], [`PhysicalDrive`]: block device transports

pub mod commands;
pub mod constants;
pub mod device;
pub mod filesystem;
pub mod partition;
pub mod traits;
pub mod utils;

/// Disk image transport (see [`device::DiskImage`]).
pub use crate::device::DiskImage;
/// Physical media transport (see [`device::PhysicalDrive`]).
pub use crate::device::PhysicalDrive;
/// Disk abstraction with partition and volume management (see [`partition::disk::Disk`]).
pub use crate::partition::disk::Disk;
/// Enum for supported volume types (see [`partition::disk::Volume`]).
pub use crate::partition::disk::Volume;
