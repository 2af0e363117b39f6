//! exFAT volume.
//!
//! Directories hold 32-byte records grouped in entry sets: a primary File
//! record (0x85) followed by its Stream Extension (0xC0) and File Name (0xC1)
//! records. Allocation bitmap, up-case table and volume label records stand alone.

use binread::{BinRead, BinReaderExt};
use log::{debug, info, trace, warn};
use std::cell::OnceCell;
use std::collections::VecDeque;
use std::io::{Cursor, Write};

use super::boot_sector::BootSector;
use super::chain::{ClusterRun, FatTable};
use super::dir_entry::{DirEntry, DosTimestamp, Timestamps, attributes};
use super::entries::{Decoder, Entries, RecordContext, Source, Step};
use super::fs_error::FsError;
use super::fs_type::FsType;
use super::{DirRef, FileSystem, ScanOptions, VolumeContext, file_data};
use crate::constants::DIR_HOP_LIMIT;
use crate::device::BlockDevice;
use crate::traits::LayoutDisplay;

/// Clear bit 7 of an entry type: the record is not in use.
const IN_USE: u8 = 0x80;

pub const END_OF_DIRECTORY: u8 = 0x00;
pub const ALLOCATION_BITMAP: u8 = 0x81;
pub const UP_CASE_TABLE: u8 = 0x82;
pub const VOLUME_LABEL: u8 = 0x83;
pub const FILE: u8 = 0x85;
pub const STREAM_EXTENSION: u8 = 0xC0;
pub const FILE_NAME: u8 = 0xC1;

/// Stream flag: the data is contiguous and has no FAT chain.
const NO_FAT_CHAIN: u8 = 0x02;
/// Characters of a volume label.
const LABEL_MAX_CHARS: usize = 11;

/// Allocation bitmap and up-case table records share this layout.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct SystemRecord {
    _entry_type: u8,
    _flags: u8,
    _reserved: [u8; 2],
    _table_checksum: u32,
    _reserved2: [u8; 12],
    first_cluster: u32,
    data_length: u64,
}

#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct LabelRecord {
    _entry_type: u8,
    char_count: u8,
    label: [u16; LABEL_MAX_CHARS],
}

#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct FileRecord {
    _entry_type: u8,
    secondary_count: u8,
    _set_checksum: u16,
    file_attributes: u16,
    _reserved: u16,
    create: u32,
    modify: u32,
    access: u32,
}

#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct StreamRecord {
    _entry_type: u8,
    flags: u8,
    _reserved: u8,
    name_length: u8,
    _name_hash: u16,
    _reserved2: u16,
    valid_data_length: u64,
    _reserved3: u32,
    first_cluster: u32,
    data_length: u64,
}

#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct NameRecord {
    _entry_type: u8,
    _flags: u8,
    name: [u16; 15],
}

/// Entry set being assembled from its primary record.
#[derive(Debug)]
struct PendingSet {
    entry: DirEntry,
    declared: u8,
    consumed: u8,
    /// Declared by the stream extension, `None` until one is seen.
    name_length: Option<usize>,
    name: Vec<u16>,
}

impl PendingSet {
    fn complete(mut self) -> DirEntry {
        if let Some(len) = self.name_length {
            self.name.truncate(len);
        }
        self.entry.long_name = Some(String::from_utf16_lossy(&self.name));
        self.entry
    }
}

/// Decoder of exFAT directory records.
#[derive(Debug)]
pub struct ExFatDecoder {
    include_deleted: bool,
    pending: Option<PendingSet>,
}

impl ExFatDecoder {
    pub fn new(include_deleted: bool) -> Self {
        Self {
            include_deleted,
            pending: None,
        }
    }

    pub fn decode(
        &mut self,
        record: &[u8],
        ctx: RecordContext,
        out: &mut VecDeque<DirEntry>,
    ) -> Result<Step, FsError> {
        let raw_type = record[0];
        if raw_type == END_OF_DIRECTORY {
            trace!("{:03} => end of cluster", ctx.index);
            return Ok(Step::EndOfCluster);
        }

        let (entry_type, deleted) = match raw_type {
            0x05 | 0x40 | 0x41 if self.include_deleted => (raw_type | IN_USE, true),
            t => (t, false),
        };
        let mut reader = Cursor::new(record);

        match entry_type {
            ALLOCATION_BITMAP | UP_CASE_TABLE => {
                let rec: SystemRecord = reader.read_le()?;
                let name = if entry_type == ALLOCATION_BITMAP {
                    "AllocationBitmap"
                } else {
                    "UpCaseTable"
                };
                trace!("{:03} => {name}: cluster {}", ctx.index, rec.first_cluster);
                self.standalone(
                    standalone_entry(entry_type, name, rec.first_cluster, rec.data_length, ctx),
                    out,
                );
            }
            VOLUME_LABEL => {
                let rec: LabelRecord = reader.read_le()?;
                let len = usize::from(rec.char_count).min(LABEL_MAX_CHARS);
                let label = String::from_utf16_lossy(&rec.label[..len]);
                trace!("{:03} => volume label {label:?}", ctx.index);
                let mut entry = standalone_entry(entry_type, &label, 0, 0, ctx);
                entry.attributes = attributes::VOLUME_ID;
                self.standalone(entry, out);
            }
            FILE => {
                let rec: FileRecord = reader.read_le()?;
                if let Some(old) = self.pending.take() {
                    warn!(
                        "{:03} => entry set at record {} abandoned after {} of {} secondaries",
                        ctx.index,
                        old.entry.index,
                        old.consumed,
                        old.declared
                    );
                }

                let entry = DirEntry {
                    entry_type: raw_type,
                    short_name: None,
                    long_name: None,
                    attributes: rec.file_attributes,
                    timestamps: Timestamps {
                        created: DosTimestamp::from_exfat(rec.create),
                        modified: DosTimestamp::from_exfat(rec.modify),
                        accessed: DosTimestamp::from_exfat(rec.access),
                    },
                    start_cluster: 0,
                    file_size: 0,
                    partition: ctx.partition,
                    index: ctx.index,
                    deleted,
                    contiguous: false,
                };
                let set = PendingSet {
                    entry,
                    declared: rec.secondary_count,
                    consumed: 0,
                    name_length: None,
                    name: Vec::new(),
                };
                trace!(
                    "{:03} => file entry, {} secondaries",
                    ctx.index, rec.secondary_count
                );

                if rec.secondary_count == 0 {
                    out.push_back(set.complete());
                } else {
                    self.pending = Some(set);
                }
            }
            STREAM_EXTENSION => {
                let rec: StreamRecord = reader.read_le()?;
                let Some(set) = self.pending.as_mut() else {
                    warn!("{:03} => stream extension without file entry, ignored", ctx.index);
                    return Ok(Step::Continue);
                };
                set.entry.start_cluster = rec.first_cluster;
                set.entry.file_size = rec.data_length;
                set.entry.contiguous = rec.flags & NO_FAT_CHAIN != 0;
                set.name_length = Some(usize::from(rec.name_length));
                trace!(
                    "{:03} => stream: cluster {}, size {}, valid {}, contiguous {}",
                    ctx.index,
                    rec.first_cluster,
                    rec.data_length,
                    rec.valid_data_length,
                    set.entry.contiguous
                );
                self.consume(out);
            }
            FILE_NAME => {
                let rec: NameRecord = reader.read_le()?;
                let Some(set) = self.pending.as_mut() else {
                    warn!("{:03} => file name without file entry, ignored", ctx.index);
                    return Ok(Step::Continue);
                };
                set.name.extend_from_slice(&rec.name);
                self.consume(out);
            }
            other => {
                trace!("{:03} => entry type 0x{other:02X} skipped", ctx.index);
                if self.pending.is_some() {
                    self.consume(out);
                }
            }
        }

        Ok(Step::Continue)
    }

    /// Counts one secondary record against the pending set, emitting it when complete.
    fn consume(&mut self, out: &mut VecDeque<DirEntry>) {
        let Some(set) = self.pending.as_mut() else {
            return;
        };
        set.consumed += 1;
        if set.consumed >= set.declared {
            if let Some(set) = self.pending.take() {
                out.push_back(set.complete());
            }
        }
    }

    /// Standalone records are emitted immediately and count as a secondary of any pending set.
    fn standalone(&mut self, entry: DirEntry, out: &mut VecDeque<DirEntry>) {
        out.push_back(entry);
        self.consume(out);
    }

    pub fn finish(&mut self) {
        if let Some(set) = self.pending.take() {
            warn!(
                "Entry set at record {} incomplete: {} of {} secondaries, dropped",
                set.entry.index, set.consumed, set.declared
            );
        }
    }
}

fn standalone_entry(
    entry_type: u8,
    name: &str,
    cluster: u32,
    size: u64,
    ctx: RecordContext,
) -> DirEntry {
    DirEntry {
        entry_type,
        short_name: None,
        long_name: Some(name.to_string()),
        attributes: attributes::SYSTEM,
        timestamps: Timestamps::default(),
        start_cluster: cluster,
        file_size: size,
        partition: ctx.partition,
        index: ctx.index,
        deleted: false,
        contiguous: false,
    }
}

/// An exFAT volume.
#[derive(Debug)]
pub struct ExFatVol {
    boot_sector: BootSector,
    ctx: VolumeContext,
    table: OnceCell<FatTable>,
}

impl ExFatVol {
    /// # Errors
    /// - `FsError::UnknownFileSystem` if the boot sector is not an exFAT one.
    pub fn new(boot_sector: BootSector, ctx: VolumeContext) -> Result<Self, FsError> {
        if boot_sector.fs_type() != FsType::ExFAT {
            return Err(FsError::UnknownFileSystem);
        }

        Ok(Self {
            boot_sector,
            ctx,
            table: OnceCell::new(),
        })
    }

    pub fn table(&self, device: &mut dyn BlockDevice) -> Result<&FatTable, FsError> {
        FatTable::cached(&self.table, device, &self.boot_sector)
    }

    pub fn fat_dump(&self, device: &mut dyn BlockDevice) -> Result<Vec<u32>, FsError> {
        Ok(self.table(device)?.entries())
    }

    /// Clusters of `entry`: a contiguous run or its FAT chain.
    fn run_of<'a>(
        &'a self,
        device: &mut dyn BlockDevice,
        entry: &DirEntry,
        hop_limit: Option<usize>,
    ) -> Result<ClusterRun<'a>, FsError> {
        if entry.contiguous() {
            debug!(
                "Contiguous allocation from cluster {}, {} bytes",
                entry.start_cluster(),
                entry.file_size()
            );
            return Ok(ClusterRun::contiguous(
                entry.start_cluster(),
                entry.file_size(),
                self.boot_sector.geometry().cluster_size(),
            ));
        }

        let table = self.table(device)?;
        Ok(ClusterRun::Chain(table.chain(
            entry.start_cluster(),
            hop_limit,
            self.ctx.options.bad_cluster_policy,
        )))
    }

    /// Lists the directory described by `entry`, honouring its contiguous flag.
    pub fn list_entry<'a>(
        &'a self,
        device: &'a mut dyn BlockDevice,
        entry: &DirEntry,
    ) -> Result<Entries<'a>, FsError> {
        if !entry.contiguous() {
            return self.list_dir(device, DirRef::from(entry));
        }

        self.ctx.progress.update(0);
        let run = self.run_of(&mut *device, entry, Some(DIR_HOP_LIMIT))?;
        self.ctx.progress.update(40);
        Ok(self.entries(device, run))
    }

    fn entries<'a>(&'a self, device: &'a mut dyn BlockDevice, run: ClusterRun<'a>) -> Entries<'a> {
        let geometry = self.boot_sector.geometry();
        Entries::new(
            device,
            Source::Clusters { run, geometry },
            Decoder::ExFat(ExFatDecoder::new(self.ctx.options.include_deleted)),
            self.ctx.partition,
            geometry.cluster_size(),
            self.ctx.progress.clone(),
        )
    }
}

impl FileSystem for ExFatVol {
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
        self.ctx.progress.update(0);
        info!("Listing {dir} of partition {} (exFAT)", self.ctx.partition);

        let start = match dir {
            DirRef::Cluster(cluster) => cluster,
            DirRef::Root => self
                .boot_sector
                .root_cluster()
                .ok_or_else(|| FsError::InvalidGeometry(String::from("exFAT volume without root cluster")))?,
        };
        let table = self.table(&mut *device)?;
        let run = ClusterRun::Chain(table.chain(
            start,
            Some(DIR_HOP_LIMIT),
            self.ctx.options.bad_cluster_policy,
        ));
        self.ctx.progress.update(40);

        Ok(self.entries(device, run))
    }

    fn read_file(
        &self,
        device: &mut dyn BlockDevice,
        entry: &DirEntry,
        sink: &mut dyn Write,
    ) -> Result<u64, FsError> {
        info!(
            "Reading {:?}: cluster {}, {} bytes{}",
            entry.full_name(),
            entry.start_cluster(),
            entry.file_size(),
            if entry.contiguous() { ", contiguous" } else { "" }
        );
        if entry.file_size() == 0 {
            return Ok(0);
        }

        let mut run = self.run_of(&mut *device, entry, None)?;
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

impl LayoutDisplay for ExFatVol {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        self.boot_sector.display_layout(indent)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::filesystem::dir_entry::PartitionRef;

    fn ctx(index: usize) -> RecordContext {
        RecordContext {
            index,
            partition: PartitionRef(0),
        }
    }

    pub(crate) fn file_record(secondaries: u8, attr: u16) -> [u8; 32] {
        let mut rec = [0u8; 32];
        rec[0] = FILE;
        rec[1] = secondaries;
        rec[4..6].copy_from_slice(&attr.to_le_bytes());
        rec
    }

    pub(crate) fn stream_record(flags: u8, name_len: u8, cluster: u32, size: u64) -> [u8; 32] {
        let mut rec = [0u8; 32];
        rec[0] = STREAM_EXTENSION;
        rec[1] = flags;
        rec[3] = name_len;
        rec[8..16].copy_from_slice(&size.to_le_bytes());
        rec[20..24].copy_from_slice(&cluster.to_le_bytes());
        rec[24..32].copy_from_slice(&size.to_le_bytes());
        rec
    }

    pub(crate) fn name_record(part: &str) -> [u8; 32] {
        let mut rec = [0u8; 32];
        rec[0] = FILE_NAME;
        for (i, unit) in part.encode_utf16().take(15).enumerate() {
            rec[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        rec
    }

    pub(crate) fn label_record(label: &str) -> [u8; 32] {
        let mut rec = [0u8; 32];
        rec[0] = VOLUME_LABEL;
        let units: Vec<u16> = label.encode_utf16().collect();
        rec[1] = units.len() as u8;
        for (i, unit) in units.iter().take(11).enumerate() {
            rec[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        rec
    }

    fn decode_all(decoder: &mut ExFatDecoder, records: &[[u8; 32]]) -> Vec<DirEntry> {
        let mut out = VecDeque::new();
        for (i, rec) in records.iter().enumerate() {
            if decoder.decode(rec, ctx(i + 1), &mut out).unwrap() != Step::Continue {
                break;
            }
        }
        decoder.finish();
        out.into()
    }

    #[test]
    fn complete_entry_set() {
        let records = [
            file_record(2, 0x20),
            stream_record(0, 8, 10, 4096),
            name_record("DATA.BIN"),
        ];
        let entries = decode_all(&mut ExFatDecoder::new(false), &records);

        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.full_name(), "DATA.BIN");
        assert_eq!(e.start_cluster(), 10);
        assert_eq!(e.file_size(), 4096);
        assert_eq!(e.index(), 1);
        assert!(!e.contiguous());
    }

    #[test]
    fn set_without_stream_extension_keeps_its_name() {
        let records = [file_record(1, 0x20), name_record("NOSTREAM.TXT")];
        let entries = decode_all(&mut ExFatDecoder::new(false), &records);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].full_name(), "NOSTREAM.TXT");
        assert_eq!(entries[0].start_cluster(), 0);
    }

    #[test]
    fn name_spanning_records() {
        let name = "a rather long exFAT file name.txt";
        let records = [
            file_record(4, 0x20),
            stream_record(NO_FAT_CHAIN, name.len() as u8, 7, 100),
            name_record(&name[..15]),
            name_record(&name[15..30]),
            name_record(&name[30..]),
        ];
        let entries = decode_all(&mut ExFatDecoder::new(false), &records);

        assert_eq!(entries[0].full_name(), name);
        assert!(entries[0].contiguous());
    }

    #[test]
    fn standalone_records() {
        let mut bitmap = [0u8; 32];
        bitmap[0] = ALLOCATION_BITMAP;
        bitmap[20..24].copy_from_slice(&2u32.to_le_bytes());
        bitmap[24..32].copy_from_slice(&640u64.to_le_bytes());
        let mut upcase = [0u8; 32];
        upcase[0] = UP_CASE_TABLE;
        upcase[20..24].copy_from_slice(&3u32.to_le_bytes());

        let entries = decode_all(
            &mut ExFatDecoder::new(false),
            &[label_record("USBSTICK"), bitmap, upcase],
        );

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].full_name(), "USBSTICK");
        assert!(entries[0].is_volume_label());
        assert_eq!(entries[1].full_name(), "AllocationBitmap");
        assert_eq!(entries[1].start_cluster(), 2);
        assert_eq!(entries[1].file_size(), 640);
        assert_eq!(entries[2].full_name(), "UpCaseTable");
    }

    #[test]
    fn label_is_cut_to_its_count() {
        let mut rec = label_record("LABEL");
        rec[1] = 3;
        let entries = decode_all(&mut ExFatDecoder::new(false), &[rec]);
        assert_eq!(entries[0].full_name(), "LAB");
    }

    #[test]
    fn incomplete_set_is_dropped() {
        let entries = decode_all(
            &mut ExFatDecoder::new(false),
            &[file_record(2, 0x20), stream_record(0, 4, 5, 10)],
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn new_primary_replaces_pending_set() {
        let records = [
            file_record(2, 0x20),
            stream_record(0, 3, 5, 10),
            file_record(2, 0x20),
            stream_record(0, 3, 6, 20),
            name_record("TWO"),
        ];
        let entries = decode_all(&mut ExFatDecoder::new(false), &records);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].full_name(), "TWO");
        assert_eq!(entries[0].index(), 3);
    }

    #[test]
    fn orphan_secondaries_are_ignored() {
        let entries = decode_all(
            &mut ExFatDecoder::new(false),
            &[stream_record(0, 3, 5, 10), name_record("ABC")],
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn deleted_sets_need_the_option() {
        let mut primary = file_record(2, 0x20);
        primary[0] = 0x05;
        let mut stream = stream_record(0, 3, 9, 42);
        stream[0] = 0x40;
        let mut name = name_record("OLD");
        name[0] = 0x41;
        let records = [primary, stream, name];

        assert!(decode_all(&mut ExFatDecoder::new(false), &records).is_empty());

        let entries = decode_all(&mut ExFatDecoder::new(true), &records);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].deleted());
        assert_eq!(entries[0].full_name(), "OLD");
        assert_eq!(entries[0].entry_type(), 0x05);
    }

    #[test]
    fn null_type_ends_the_cluster() {
        let mut out = VecDeque::new();
        let step = ExFatDecoder::new(false)
            .decode(&[0u8; 32], ctx(1), &mut out)
            .unwrap();
        assert_eq!(step, Step::EndOfCluster);
    }
}
