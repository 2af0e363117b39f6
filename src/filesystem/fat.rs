//! FAT12/16/32 volume.
//!
//! This module implements:
//! - decoding of 32-byte directory records and long-file-name fragments
//! - directory listing, from the fixed root region (FAT12/16) or from a cluster chain
//! - file extraction through the cluster chain
//! - dumping of the allocation table

use binread::{BinRead, BinReaderExt};
use log::{info, trace, warn};
use std::cell::OnceCell;
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::mem;

use super::boot_sector::BootSector;
use super::chain::{ClusterRun, FatTable};
use super::dir_entry::{DirEntry, DosTimestamp, ShortName, Timestamps, attributes};
use super::entries::{Decoder, Entries, RecordContext, Source, Step};
use super::fs_error::FsError;
use super::fs_type::FsType;
use super::{DirRef, FileSystem, ScanOptions, VolumeContext, file_data};
use crate::constants::{DIR_ENTRY_SIZE, DIR_HOP_LIMIT};
use crate::device::BlockDevice;
use crate::traits::LayoutDisplay;

/// First byte of a deleted entry.
pub const DELETED_MARK: u8 = 0xE5;
/// First byte of the record closing a directory.
pub const END_OF_DIRECTORY: u8 = 0x00;

/// FAT directory record.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct DirRecord {
    name: [u8; 8],
    ext: [u8; 3],
    attr: u8,
    _nt_res: u8,
    crt_time_tenth: u8,
    crt_time: u16,
    crt_date: u16,
    lst_acc_date: u16,
    fst_clus_hi: u16,
    wrt_time: u16,
    wrt_date: u16,
    fst_clus_lo: u16,
    file_size: u32,
}

impl DirRecord {
    /// Combines `fst_clus_hi` and `fst_clus_lo` into the first cluster number.
    pub fn cluster_number(&self) -> u32 {
        (u32::from(self.fst_clus_hi) << 16) | u32::from(self.fst_clus_lo)
    }

    pub fn crt_time_tenth(&self) -> u8 {
        self.crt_time_tenth
    }

    fn into_entry(self, long_name: Option<String>, ctx: RecordContext) -> DirEntry {
        DirEntry {
            entry_type: self.name[0],
            short_name: Some(ShortName {
                name: self.name,
                ext: self.ext,
            }),
            long_name,
            attributes: self.attr.into(),
            timestamps: Timestamps {
                created: DosTimestamp::new(self.crt_date, self.crt_time),
                modified: DosTimestamp::new(self.wrt_date, self.wrt_time),
                accessed: DosTimestamp::new(self.lst_acc_date, 0),
            },
            start_cluster: self.cluster_number(),
            file_size: self.file_size.into(),
            partition: ctx.partition,
            index: ctx.index,
            deleted: self.name[0] == DELETED_MARK,
            contiguous: false,
        }
    }
}

/// Long-file-name fragment: 13 UTF-16 units spread over three fields.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct LfnRecord {
    order: u8,
    name1: [u16; 5],
    _attr: u8,
    _lfn_type: u8,
    checksum: u8,
    name2: [u16; 6],
    _fst_clus_lo: u16,
    name3: [u16; 2],
}

impl LfnRecord {
    /// Sequence number, the last logical fragment has bit 0x40 set.
    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Characters of this fragment, up to the NUL terminator.
    pub fn fragment(&self) -> String {
        let units: Vec<u16> = self
            .name1
            .iter()
            .chain(&self.name2)
            .chain(&self.name3)
            .copied()
            .take_while(|unit| *unit != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }
}

#[derive(Debug, Default)]
enum LfnState {
    #[default]
    Idle,
    /// Fragments seen so far, in logical order.
    Accumulating(String),
}

/// Decoder of FAT directory records.
///
/// Fragments are stored last-first on disk, each one is prepended to the
/// pending name which the next regular record consumes.
#[derive(Debug)]
pub struct FatDecoder {
    include_deleted: bool,
    lfn: LfnState,
}

impl FatDecoder {
    pub fn new(include_deleted: bool) -> Self {
        Self {
            include_deleted,
            lfn: LfnState::Idle,
        }
    }

    pub fn decode(
        &mut self,
        record: &[u8],
        ctx: RecordContext,
        out: &mut VecDeque<DirEntry>,
    ) -> Result<Step, FsError> {
        match record[0] {
            END_OF_DIRECTORY => {
                trace!("{:03} => end of directory", ctx.index);
                return Ok(Step::EndOfDirectory);
            }
            DELETED_MARK if !self.include_deleted => {
                trace!("{:03} => deleted entry skipped", ctx.index);
                return Ok(Step::Continue);
            }
            _ => {}
        }

        let mut reader = Cursor::new(record);
        if u16::from(record[11]) == attributes::LONG_NAME {
            let lfn: LfnRecord = reader.read_le()?;
            let fragment = lfn.fragment();
            trace!(
                "{:03} => LFN fragment 0x{:02X}: {fragment:?}",
                ctx.index,
                lfn.order()
            );

            self.lfn = match mem::take(&mut self.lfn) {
                LfnState::Idle => LfnState::Accumulating(fragment),
                LfnState::Accumulating(rest) => LfnState::Accumulating(fragment + &rest),
            };
            return Ok(Step::Continue);
        }

        let long_name = match mem::take(&mut self.lfn) {
            LfnState::Idle => None,
            LfnState::Accumulating(name) => Some(name),
        };
        let record: DirRecord = reader.read_le()?;
        let entry = record.into_entry(long_name, ctx);
        trace!(
            "{:03} => cluster 0x{:08X}, size {}, attributes 0x{:02X}, {:?}",
            ctx.index,
            entry.start_cluster(),
            entry.file_size(),
            entry.attributes(),
            entry.full_name()
        );

        out.push_back(entry);
        Ok(Step::Continue)
    }

    pub fn finish(&mut self) {
        if let LfnState::Accumulating(name) = mem::take(&mut self.lfn) {
            warn!("Long name {name:?} has no matching entry, dropped");
        }
    }
}

/// A FAT12, FAT16 or FAT32 volume.
#[derive(Debug)]
pub struct FatVol {
    boot_sector: BootSector,
    ctx: VolumeContext,
    table: OnceCell<FatTable>,
}

impl FatVol {
    /// # Errors
    /// - `FsError::UnknownFileSystem` if the boot sector is not a FAT one.
    pub fn new(boot_sector: BootSector, ctx: VolumeContext) -> Result<Self, FsError> {
        if !boot_sector.fs_type().is_fat() {
            return Err(FsError::UnknownFileSystem);
        }

        Ok(Self {
            boot_sector,
            ctx,
            table: OnceCell::new(),
        })
    }

    /// Allocation table, read on first use.
    pub fn table(&self, device: &mut dyn BlockDevice) -> Result<&FatTable, FsError> {
        FatTable::cached(&self.table, device, &self.boot_sector)
    }

    /// Decodes every entry of the allocation table.
    pub fn fat_dump(&self, device: &mut dyn BlockDevice) -> Result<Vec<u32>, FsError> {
        info!(
            "Dumping FAT of partition {}: offset 0x{:X}, {} bytes",
            self.ctx.partition,
            self.boot_sector.geometry().fat_location(),
            self.boot_sector.geometry().fat_size()
        );
        Ok(self.table(device)?.entries())
    }

    /// Byte size of the fixed root directory region of FAT12/16.
    fn root_region_size(&self) -> u64 {
        u64::from(self.boot_sector.common().root_ent_cnt()) * DIR_ENTRY_SIZE as u64
    }
}

impl FileSystem for FatVol {
    fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    fn context(&self) -> &VolumeContext {
        &self.ctx
    }

    fn set_options(&mut self, options: ScanOptions) {
        self.ctx.options = options;
    }

    fn list_dir<'a>(
        &'a self,
        device: &'a mut dyn BlockDevice,
        dir: DirRef,
    ) -> Result<Entries<'a>, FsError> {
        let geometry = self.boot_sector.geometry();
        let options = self.ctx.options;
        self.ctx.progress.update(0);
        info!(
            "Listing {dir} of partition {} ({})",
            self.ctx.partition,
            self.fs_type()
        );

        let source = match (dir, self.fs_type()) {
            (DirRef::Root, FsType::FAT12 | FsType::FAT16) => Source::Region {
                offset: geometry.root_dir_location(),
                remaining: self.root_region_size(),
            },
            (dir, _) => {
                let start = match dir {
                    DirRef::Cluster(cluster) => cluster,
                    DirRef::Root => self.boot_sector.root_cluster().ok_or_else(|| {
                        FsError::InvalidGeometry(String::from("FAT32 volume without root cluster"))
                    })?,
                };
                let table = self.table(&mut *device)?;
                Source::Clusters {
                    run: ClusterRun::Chain(table.chain(
                        start,
                        Some(DIR_HOP_LIMIT),
                        options.bad_cluster_policy,
                    )),
                    geometry,
                }
            }
        };
        self.ctx.progress.update(40);

        Ok(Entries::new(
            device,
            source,
            Decoder::Fat(FatDecoder::new(options.include_deleted)),
            self.ctx.partition,
            geometry.cluster_size(),
            self.ctx.progress.clone(),
        ))
    }

    fn read_file(
        &self,
        device: &mut dyn BlockDevice,
        entry: &DirEntry,
        sink: &mut dyn Write,
    ) -> Result<u64, FsError> {
        info!(
            "Reading {:?}: cluster 0x{:08X}, {} bytes",
            entry.full_name(),
            entry.start_cluster(),
            entry.file_size()
        );
        if entry.file_size() == 0 {
            return Ok(0);
        }

        let table = self.table(&mut *device)?;
        let mut run = ClusterRun::Chain(table.chain(
            entry.start_cluster(),
            None,
            self.ctx.options.bad_cluster_policy,
        ));

        file_data::read_clusters(
            device,
            &self.boot_sector.geometry(),
            &mut run,
            entry.file_size(),
            sink,
            &*self.ctx.progress,
        )
    }
}

impl LayoutDisplay for FatVol {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        self.boot_sector.display_layout(indent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::dir_entry::PartitionRef;

    fn ctx(index: usize) -> RecordContext {
        RecordContext {
            index,
            partition: PartitionRef(0),
        }
    }

    fn short_record(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut rec = [0u8; 32];
        rec[0..11].copy_from_slice(name);
        rec[11] = attr;
        rec[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        rec[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        rec[28..32].copy_from_slice(&size.to_le_bytes());
        rec
    }

    /// LFN record holding `text`, NUL-terminated and 0xFFFF-padded when shorter than 13 units.
    fn lfn_record(order: u8, text: &str) -> [u8; 32] {
        let mut units: Vec<u16> = text.encode_utf16().collect();
        if units.len() < 13 {
            units.push(0);
        }
        units.resize(13, 0xFFFF);

        let mut rec = [0u8; 32];
        rec[0] = order;
        rec[11] = 0x0F;
        let slots = (1..11).step_by(2).chain((14..26).step_by(2)).chain((28..32).step_by(2));
        for (unit, off) in units.iter().zip(slots) {
            rec[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        rec
    }

    fn decode_all(decoder: &mut FatDecoder, records: &[[u8; 32]]) -> (Vec<DirEntry>, Step) {
        let mut out = VecDeque::new();
        let mut last = Step::Continue;
        for (i, rec) in records.iter().enumerate() {
            last = decoder.decode(rec, ctx(i + 1), &mut out).unwrap();
            if last == Step::EndOfDirectory {
                break;
            }
        }
        decoder.finish();
        (out.into(), last)
    }

    #[test]
    fn single_fragment_long_name() {
        let records = [
            lfn_record(0x41, "REPORT.TXT"),
            short_record(b"REPORT  TXT", 0x20, 5, 1234),
        ];
        let (entries, _) = decode_all(&mut FatDecoder::new(false), &records);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].full_name(), "REPORT.TXT");
        assert_eq!(entries[0].start_cluster(), 5);
        assert_eq!(entries[0].file_size(), 1234);
        assert_eq!(entries[0].index(), 2);
    }

    #[test]
    fn fragments_are_prepended() {
        // On disk the last fragment comes first.
        let records = [
            lfn_record(0x43, "TXT"),
            lfn_record(0x02, "."),
            lfn_record(0x01, "REPORT"),
            short_record(b"REPORT~1TXT", 0x20, 7, 10),
        ];
        let (entries, _) = decode_all(&mut FatDecoder::new(false), &records);

        assert_eq!(entries[0].full_name(), "REPORT.TXT");
    }

    #[test]
    fn multi_fragment_name_spanning_full_records() {
        let name = "quarterly financial report.xlsx";
        let units: Vec<char> = name.chars().collect();
        let part = |i: usize| units[i * 13..((i + 1) * 13).min(units.len())].iter().collect::<String>();

        let records = [
            lfn_record(0x43, &part(2)),
            lfn_record(0x02, &part(1)),
            lfn_record(0x01, &part(0)),
            short_record(b"QUARTE~1XLS", 0x20, 9, 10),
        ];
        let (entries, _) = decode_all(&mut FatDecoder::new(false), &records);

        assert_eq!(entries[0].full_name(), name);
        assert_eq!(entries[0].short_name().unwrap().name, *b"QUARTE~1");
    }

    #[test]
    fn deleted_entries_are_optional() {
        let mut deleted = short_record(b"XOST    DAT", 0x20, 3, 100);
        deleted[0] = DELETED_MARK;
        let records = [
            short_record(b"KEPT    TXT", 0x20, 4, 1),
            deleted,
            short_record(b"DOCS       ", 0x10, 6, 0),
        ];

        let (entries, _) = decode_all(&mut FatDecoder::new(false), &records);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.deleted()));
        assert_eq!(entries[1].index(), 3);

        let (entries, _) = decode_all(&mut FatDecoder::new(true), &records);
        assert_eq!(entries.len(), 3);
        assert!(entries[1].deleted());
        assert_eq!(entries[1].short_name().unwrap().name[0], 0xE5);
        assert_eq!(entries[1].entry_type(), 0xE5);
    }

    #[test]
    fn null_record_ends_the_directory() {
        let records = [
            short_record(b"A       TXT", 0x20, 3, 1),
            [0u8; 32],
            short_record(b"B       TXT", 0x20, 4, 1),
        ];
        let (entries, last) = decode_all(&mut FatDecoder::new(true), &records);

        assert_eq!(entries.len(), 1);
        assert_eq!(last, Step::EndOfDirectory);
    }

    #[test]
    fn cluster_high_word_is_combined() {
        let (entries, _) = decode_all(
            &mut FatDecoder::new(false),
            &[short_record(b"BIG     BIN", 0x21, 0x0003_0010, 0)],
        );

        assert_eq!(entries[0].start_cluster(), 0x0003_0010);
        // Read-only archive: the extension is glued to the name.
        assert_eq!(entries[0].full_name(), "BIGBIN");
    }
}
