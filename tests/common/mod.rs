//! Builders of small synthetic disk images.

#![allow(dead_code)]

use disk_forensics::DiskImage;
use std::io::Cursor;

pub const SECTOR: usize = 512;
/// First sector of the single partition of every image.
pub const START: u32 = 1;

pub type MemImage = DiskImage<Cursor<Vec<u8>>>;

/// Byte pattern used as file content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

pub fn put(image: &mut [u8], offset: usize, bytes: &[u8]) {
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Image of `len` bytes whose MBR holds the given `(type, start, count)` entries.
pub fn with_mbr(len: usize, entries: &[(u8, u32, u32)]) -> Vec<u8> {
    let mut image = vec![0u8; len];
    for (i, (pt_type, start, count)) in entries.iter().enumerate() {
        let off = 446 + i * 16;
        image[off + 4] = *pt_type;
        put(&mut image, off + 8, &start.to_le_bytes());
        put(&mut image, off + 12, &count.to_le_bytes());
    }
    image[510] = 0x55;
    image[511] = 0xAA;
    image
}

/// Common BPB fields, bytes 0 to 35, plus the 0x55AA signature.
pub fn bpb(oem: &[u8; 8], bps: u16, spc: u8, rsvd: u16, nfats: u8) -> Vec<u8> {
    let mut bs = vec![0u8; SECTOR];
    bs[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    bs[3..11].copy_from_slice(oem);
    bs[11..13].copy_from_slice(&bps.to_le_bytes());
    bs[13] = spc;
    bs[14..16].copy_from_slice(&rsvd.to_le_bytes());
    bs[16] = nfats;
    bs[21] = 0xF8;
    bs[510] = 0x55;
    bs[511] = 0xAA;
    bs
}

/// 32-byte FAT short entry.
pub fn short_entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut rec = [0u8; 32];
    rec[0..11].copy_from_slice(name);
    rec[11] = attr;
    rec[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    rec[22..24].copy_from_slice(&0x6000u16.to_le_bytes());
    rec[24..26].copy_from_slice(&0x596Fu16.to_le_bytes());
    rec[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    rec[28..32].copy_from_slice(&size.to_le_bytes());
    rec
}

/// LFN records spelling `name`, in on-disk order (last fragment first).
pub fn lfn_entries(name: &str) -> Vec<[u8; 32]> {
    let mut units: Vec<u16> = name.encode_utf16().collect();
    let count = units.len().div_ceil(13);
    if units.len() % 13 != 0 {
        units.push(0);
    }
    units.resize(count * 13, 0xFFFF);

    (0..count)
        .rev()
        .map(|i| {
            let mut rec = [0u8; 32];
            rec[0] = (i + 1) as u8 | if i + 1 == count { 0x40 } else { 0 };
            rec[11] = 0x0F;
            let slots = (1..11)
                .step_by(2)
                .chain((14..26).step_by(2))
                .chain((28..32).step_by(2));
            for (unit, off) in units[i * 13..(i + 1) * 13].iter().zip(slots) {
                rec[off..off + 2].copy_from_slice(&unit.to_le_bytes());
            }
            rec
        })
        .collect()
}

/// Packs FAT12 entries, two per three bytes.
pub fn fat12(entries: &[u16]) -> Vec<u8> {
    entries
        .chunks(2)
        .flat_map(|pair| {
            let a = pair[0];
            let b = pair.get(1).copied().unwrap_or(0);
            [
                (a & 0xFF) as u8,
                ((a >> 8) as u8 & 0x0F) | ((b & 0x0F) as u8) << 4,
                (b >> 4) as u8,
            ]
        })
        .collect()
}

pub fn fat16(entries: &[u16]) -> Vec<u8> {
    entries.iter().flat_map(|e| e.to_le_bytes()).collect()
}

pub fn fat32(entries: &[u32]) -> Vec<u8> {
    entries.iter().flat_map(|e| e.to_le_bytes()).collect()
}

/// Geometry of the FAT16 image.
pub mod fat16_layout {
    pub const CLUSTER: usize = 2048;
    pub const FAT: usize = (super::START as usize + 4) * 512;
    pub const ROOT: usize = FAT + 20 * 2 * 512;
    pub const DATA: usize = ROOT + 512 * 32;

    pub fn cluster(n: usize) -> usize {
        DATA + (n - 2) * CLUSTER
    }
}

pub const REPORT_NAME: &str = "Quarterly report 2024.txt";
pub const REPORT_SIZE: usize = 5000;
pub const NOTES: &[u8] = b"hello notes";

/// FAT16 volume:
/// - root: label, a long-named file over clusters 3-4-5, directory DOCS (6), a deleted file
/// - DOCS: ".", "..", NOTES.TXT (7)
pub fn fat16_image() -> Vec<u8> {
    use fat16_layout::*;
    let mut image = with_mbr(cluster(12), &[(0x06, START, 20000)]);

    let mut bs = bpb(b"MSWIN4.1", 512, 4, 4, 2);
    bs[17..19].copy_from_slice(&512u16.to_le_bytes());
    bs[19..21].copy_from_slice(&20000u16.to_le_bytes());
    bs[22..24].copy_from_slice(&20u16.to_le_bytes());
    bs[38] = 0x29;
    bs[39..43].copy_from_slice(&0x1234_ABCDu32.to_le_bytes());
    bs[43..54].copy_from_slice(b"TESTVOL    ");
    bs[54..62].copy_from_slice(b"FAT16   ");
    put(&mut image, START as usize * SECTOR, &bs);

    let table = fat16(&[0xFFF8, 0xFFFF, 0, 4, 5, 0xFFFF, 0xFFFF, 0xFFFF]);
    put(&mut image, FAT, &table);
    put(&mut image, FAT + 20 * 512, &table);

    let mut root = vec![short_entry(b"TESTVOL    ", 0x08, 0, 0)];
    root.extend(lfn_entries(REPORT_NAME));
    root.push(short_entry(b"QUARTE~1TXT", 0x20, 3, REPORT_SIZE as u32));
    root.push(short_entry(b"DOCS       ", 0x10, 6, 0));
    let mut deleted = short_entry(b"GHOST   TXT", 0x20, 8, 10);
    deleted[0] = 0xE5;
    root.push(deleted);
    for (i, rec) in root.iter().enumerate() {
        put(&mut image, ROOT + i * 32, rec);
    }

    let docs = [
        short_entry(b".          ", 0x10, 6, 0),
        short_entry(b"..         ", 0x10, 0, 0),
        short_entry(b"NOTES   TXT", 0x20, 7, NOTES.len() as u32),
    ];
    for (i, rec) in docs.iter().enumerate() {
        put(&mut image, cluster(6) + i * 32, rec);
    }

    put(&mut image, cluster(3), &pattern(REPORT_SIZE, 0));
    put(&mut image, cluster(7), NOTES);
    image
}

/// Geometry of the FAT32 image: 512-byte clusters.
pub mod fat32_layout {
    pub const FAT: usize = (super::START as usize + 32) * 512;
    pub const DATA: usize = FAT + 8 * 2 * 512;

    pub fn cluster(n: usize) -> usize {
        DATA + (n - 2) * 512
    }
}

/// FAT32 volume whose root spans clusters 2 and 3.
///
/// With `cycle`, cluster 3 links back to 2 and both clusters are full.
pub fn fat32_image(cycle: bool) -> Vec<u8> {
    use fat32_layout::*;
    let mut image = with_mbr(cluster(8), &[(0x0C, START, 600_000)]);

    let mut bs = bpb(b"MSWIN4.1", 512, 1, 32, 2);
    bs[32..36].copy_from_slice(&600_000u32.to_le_bytes());
    bs[36..40].copy_from_slice(&8u32.to_le_bytes());
    bs[44..48].copy_from_slice(&2u32.to_le_bytes());
    bs[66] = 0x29;
    bs[71..82].copy_from_slice(b"BIGVOL     ");
    bs[82..90].copy_from_slice(b"FAT32   ");
    put(&mut image, START as usize * SECTOR, &bs);

    let next = if cycle { 2 } else { 0x0FFF_FFFF };
    let table = fat32(&[0x0FFF_FFF8, 0xFFFF_FFFF, 3, next, 0x0FFF_FFFF]);
    put(&mut image, FAT, &table);

    for i in 0..16 {
        let name = format!("FILE{i:02}  BIN");
        let rec = short_entry(name.as_bytes().try_into().unwrap(), 0x20, 4, 1);
        put(&mut image, cluster(2) + i * 32, &rec);
    }
    let last = if cycle { 16 } else { 1 };
    for i in 0..last {
        let name = format!("LAST{i:02}  TXT");
        let rec = short_entry(name.as_bytes().try_into().unwrap(), 0x20, 4, 1);
        put(&mut image, cluster(3) + i * 32, &rec);
    }
    put(&mut image, cluster(4), b"x");
    image
}

/// FAT12 volume occupying the whole device, without partition table.
pub fn fat12_unpartitioned() -> Vec<u8> {
    let mut image = bpb(b"MSDOS5.0", 512, 1, 1, 2);
    image[17..19].copy_from_slice(&16u16.to_le_bytes());
    image[19..21].copy_from_slice(&100u16.to_le_bytes());
    image[22..24].copy_from_slice(&1u16.to_le_bytes());
    image[54..62].copy_from_slice(b"FAT12   ");
    image.resize(100 * SECTOR, 0);

    put(&mut image, 512, &fat12(&[0xFF8, 0xFFF, 3, 0xFFF]));
    put(&mut image, 1536, &short_entry(b"A       TXT", 0x20, 2, 600));
    put(&mut image, 2048, &pattern(600, 7));
    image
}

/// Geometry of the exFAT image: 512-byte clusters.
pub mod exfat_layout {
    pub const FAT: usize = (super::START as usize + 8) * 512;
    pub const DATA: usize = (super::START as usize + 16) * 512;

    pub fn cluster(n: usize) -> usize {
        DATA + (n - 2) * 512
    }
}

pub fn exfat_file(secondaries: u8, attr: u16) -> [u8; 32] {
    let mut rec = [0u8; 32];
    rec[0] = 0x85;
    rec[1] = secondaries;
    rec[4..6].copy_from_slice(&attr.to_le_bytes());
    rec
}

pub fn exfat_stream(flags: u8, name_len: u8, cluster: u32, size: u64) -> [u8; 32] {
    let mut rec = [0u8; 32];
    rec[0] = 0xC0;
    rec[1] = flags;
    rec[3] = name_len;
    rec[8..16].copy_from_slice(&size.to_le_bytes());
    rec[20..24].copy_from_slice(&cluster.to_le_bytes());
    rec[24..32].copy_from_slice(&size.to_le_bytes());
    rec
}

pub fn exfat_name(part: &str) -> [u8; 32] {
    let mut rec = [0u8; 32];
    rec[0] = 0xC1;
    for (i, unit) in part.encode_utf16().take(15).enumerate() {
        rec[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    rec
}

/// Records of a complete File / Stream / Name entry set.
pub fn exfat_set(name: &str, attr: u16, flags: u8, cluster: u32, size: u64) -> Vec<[u8; 32]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let names: Vec<[u8; 32]> = units
        .chunks(15)
        .map(|chunk| exfat_name(&String::from_utf16_lossy(chunk)))
        .collect();

    let mut set = vec![exfat_file(1 + names.len() as u8, attr)];
    set.push(exfat_stream(flags, units.len() as u8, cluster, size));
    set.extend(names);
    set
}

pub const DATA_SIZE: usize = 1000;
pub const CONTIG_SIZE: usize = 700;
pub const INNER: &[u8] = b"inner";

/// exFAT volume:
/// - root (cluster 4): label, bitmap, up-case table, DATA.BIN chained over 5-6,
///   CONTIG.DAT contiguous over 7-8, contiguous directory SUB (9)
/// - SUB: INNER.TXT (10)
pub fn exfat_image() -> Vec<u8> {
    use exfat_layout::*;
    let mut image = with_mbr(cluster(12), &[(0x07, START, 200)]);

    let mut bs = vec![0u8; SECTOR];
    bs[0..3].copy_from_slice(&[0xEB, 0x76, 0x90]);
    bs[3..11].copy_from_slice(b"EXFAT   ");
    bs[64..72].copy_from_slice(&u64::from(START).to_le_bytes());
    bs[72..80].copy_from_slice(&200u64.to_le_bytes());
    bs[80..84].copy_from_slice(&8u32.to_le_bytes());
    bs[84..88].copy_from_slice(&1u32.to_le_bytes());
    bs[88..92].copy_from_slice(&16u32.to_le_bytes());
    bs[92..96].copy_from_slice(&100u32.to_le_bytes());
    bs[96..100].copy_from_slice(&4u32.to_le_bytes());
    bs[100..104].copy_from_slice(&0xCAFE_F00Du32.to_le_bytes());
    bs[108] = 9;
    bs[109] = 0;
    bs[110] = 1;
    bs[510] = 0x55;
    bs[511] = 0xAA;
    put(&mut image, START as usize * SECTOR, &bs);

    let eof = 0xFFFF_FFFF;
    // Clusters 7 to 10 are contiguous allocations without FAT entries.
    let table = fat32(&[0xFFFF_FFF8, eof, eof, eof, eof, 6, eof, 0, 0, 0, 0]);
    put(&mut image, FAT, &table);

    let mut label = [0u8; 32];
    label[0] = 0x83;
    label[1] = 6;
    for (i, unit) in "USBKEY".encode_utf16().enumerate() {
        label[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    let mut bitmap = [0u8; 32];
    bitmap[0] = 0x81;
    bitmap[20..24].copy_from_slice(&2u32.to_le_bytes());
    bitmap[24..32].copy_from_slice(&13u64.to_le_bytes());
    let mut upcase = [0u8; 32];
    upcase[0] = 0x82;
    upcase[20..24].copy_from_slice(&3u32.to_le_bytes());
    upcase[24..32].copy_from_slice(&128u64.to_le_bytes());

    let mut root = vec![label, bitmap, upcase];
    root.extend(exfat_set("DATA.BIN", 0x20, 0x01, 5, DATA_SIZE as u64));
    root.extend(exfat_set("CONTIG.DAT", 0x20, 0x03, 7, CONTIG_SIZE as u64));
    root.extend(exfat_set("SUB", 0x10, 0x03, 9, 512));
    for (i, rec) in root.iter().enumerate() {
        put(&mut image, cluster(4) + i * 32, rec);
    }

    for (i, rec) in exfat_set("INNER.TXT", 0x20, 0x03, 10, INNER.len() as u64)
        .iter()
        .enumerate()
    {
        put(&mut image, cluster(9) + i * 32, rec);
    }

    put(&mut image, cluster(5), &pattern(DATA_SIZE, 1));
    put(&mut image, cluster(7), &pattern(CONTIG_SIZE, 2));
    put(&mut image, cluster(10), INNER);
    image
}

/// Byte offset of the NTFS MFT: cluster 4 of the partition, one sector per cluster.
pub const MFT: usize = (START as usize + 4) * SECTOR;

pub fn mft_record(signature: &[u8; 4], flags: u16, sequence: u16) -> Vec<u8> {
    let mut rec = vec![0u8; 1024];
    rec[0..4].copy_from_slice(signature);
    rec[4..6].copy_from_slice(&48u16.to_le_bytes());
    rec[6..8].copy_from_slice(&3u16.to_le_bytes());
    rec[16..18].copy_from_slice(&sequence.to_le_bytes());
    rec[18..20].copy_from_slice(&1u16.to_le_bytes());
    rec[20..22].copy_from_slice(&56u16.to_le_bytes());
    rec[22..24].copy_from_slice(&flags.to_le_bytes());
    rec[24..28].copy_from_slice(&400u32.to_le_bytes());
    rec[28..32].copy_from_slice(&1024u32.to_le_bytes());
    rec
}

/// NTFS volume: MFT at cluster 4, mirror at cluster 2, record 5 is a directory
/// and record 8 is marked BAAD.
pub fn ntfs_image() -> Vec<u8> {
    let mut image = with_mbr(MFT + 16 * 1024 + SECTOR, &[(0x07, START, 1000)]);

    let mut bs = bpb(b"NTFS    ", 512, 1, 0, 0);
    bs[40..48].copy_from_slice(&999u64.to_le_bytes());
    bs[48..56].copy_from_slice(&2u64.to_le_bytes());
    bs[56..64].copy_from_slice(&4u64.to_le_bytes());
    bs[64..68].copy_from_slice(&0xF6u32.to_le_bytes());
    bs[68] = 1;
    bs[72..80].copy_from_slice(&0x0011_2233_4455_6677u64.to_le_bytes());
    put(&mut image, START as usize * SECTOR, &bs);

    for i in 0..16 {
        let rec = match i {
            5 => mft_record(b"FILE", 0x0003, 5),
            8 => mft_record(b"BAAD", 0x0001, 8),
            12..=15 => mft_record(b"FILE", 0x0000, i as u16),
            _ => mft_record(b"FILE", 0x0001, i as u16),
        };
        put(&mut image, MFT + i * 1024, &rec);
    }
    image
}

pub fn mem(image: Vec<u8>) -> MemImage {
    DiskImage::new(Cursor::new(image))
}
