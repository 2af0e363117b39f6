//! Streams file content cluster by cluster into a writer.

use log::{debug, warn};
use std::io::Write;

use super::boot_sector::Geometry;
use super::chain::ClusterRun;
use super::fs_error::FsError;
use crate::device::BlockDevice;
use crate::traits::ProgressSink;

/// Copies `size` bytes from the clusters of `run` into `sink`.
///
/// Each cluster is read whole; the last write is cut to the remaining byte count.
///
/// # Errors
/// - `FsError::ShortRead` if the run ends before `size` bytes were delivered.
/// - `FsError::Io` on device or sink failure.
pub fn read_clusters(
    device: &mut dyn BlockDevice,
    geometry: &Geometry,
    run: &mut ClusterRun<'_>,
    size: u64,
    sink: &mut dyn Write,
    progress: &dyn ProgressSink,
) -> Result<u64, FsError> {
    let cluster_size = geometry.cluster_size();
    let mut buffer = vec![0; cluster_size as usize];
    let mut remaining = size;
    progress.update(0);

    while remaining > 0 {
        let Some(cluster) = run.next() else {
            break;
        };
        device.read_at(geometry.cluster_location(cluster)?, &mut buffer)?;

        let block = remaining.min(cluster_size);
        sink.write_all(&buffer[..block as usize])?;
        remaining -= block;

        debug!("Cluster 0x{cluster:08X} read, {remaining} bytes remaining");
        progress.update(((size - remaining) * 100 / size) as u8);
    }

    finish(size, remaining, progress, || {
        run.stop()
            .map(|stop| stop.to_string())
            .unwrap_or_else(|| String::from("chain ended"))
    })
}

/// Copies `size` bytes starting at byte `offset` into `sink`, in `chunk_size` blocks.
pub fn read_contiguous(
    device: &mut dyn BlockDevice,
    offset: u64,
    size: u64,
    chunk_size: u64,
    sink: &mut dyn Write,
    progress: &dyn ProgressSink,
) -> Result<u64, FsError> {
    let chunk_size = chunk_size.max(1);
    let mut buffer = vec![0; size.min(chunk_size) as usize];
    let mut remaining = size;
    progress.update(0);

    device.seek(offset)?;
    while remaining > 0 {
        let block = remaining.min(chunk_size) as usize;
        device.read_exact(&mut buffer[..block])?;
        sink.write_all(&buffer[..block])?;
        remaining -= block as u64;
        progress.update(((size - remaining) * 100 / size) as u8);
    }

    finish(size, remaining, progress, String::new)
}

fn finish(
    size: u64,
    remaining: u64,
    progress: &dyn ProgressSink,
    reason: impl FnOnce() -> String,
) -> Result<u64, FsError> {
    progress.update(100);
    let delivered = size - remaining;

    if remaining > 0 {
        warn!("File read stopped after {delivered} of {size} bytes: {}", reason());
        return Err(FsError::ShortRead {
            expected: size,
            delivered,
        });
    }

    debug!("File read completed: {delivered} bytes");
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DiskImage;
    use crate::filesystem::chain::{BadClusterPolicy, FatTable};
    use crate::filesystem::fs_type::ClusterConstants;
    use crate::traits::NoProgress;
    use std::io::{self, Cursor};

    /// Sink recording the length of every write.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<usize>,
        data: Vec<u8>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.len());
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn geometry_2k() -> Geometry {
        // Data region at 0, 2048-byte clusters.
        let mut buf = crate::filesystem::boot_sector::tests::bpb(b"MSDOS5.0", 512, 4, 0, 0);
        buf[19..21].copy_from_slice(&40000u16.to_le_bytes());
        let part = crate::filesystem::boot_sector::tests::partition(0, 40000);
        crate::filesystem::boot_sector::BootSector::parse(&part, &buf)
            .unwrap()
            .geometry()
    }

    fn image() -> DiskImage<Cursor<Vec<u8>>> {
        let data: Vec<u8> = (0..5 * 2048).map(|i| (i / 2048) as u8).collect();
        DiskImage::new(Cursor::new(data))
    }

    #[test]
    fn writes_are_cut_to_cluster_size() {
        let table = FatTable::new(
            [0xFFF8u16, 0xFFFF, 3, 4, 0xFFFF]
                .iter()
                .flat_map(|e| e.to_le_bytes())
                .collect(),
            ClusterConstants::FAT16,
        );
        let mut run = ClusterRun::Chain(table.chain(2, None, BadClusterPolicy::Warn));
        let mut sink = Recorder::default();

        let n = read_clusters(&mut image(), &geometry_2k(), &mut run, 5000, &mut sink, &NoProgress)
            .unwrap();

        assert_eq!(n, 5000);
        assert_eq!(sink.writes, vec![2048, 2048, 904]);
        assert_eq!(sink.data[0], 0);
        assert_eq!(sink.data[2048], 1);
        assert_eq!(sink.data[4999], 2);
    }

    #[test]
    fn early_chain_end_is_a_short_read() {
        let table = FatTable::new(
            [0xFFF8u16, 0xFFFF, 0xFFFF]
                .iter()
                .flat_map(|e| e.to_le_bytes())
                .collect(),
            ClusterConstants::FAT16,
        );
        let mut run = ClusterRun::Chain(table.chain(2, None, BadClusterPolicy::Warn));
        let mut sink = Recorder::default();

        let err = read_clusters(&mut image(), &geometry_2k(), &mut run, 5000, &mut sink, &NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            FsError::ShortRead {
                expected: 5000,
                delivered: 2048
            }
        ));
    }

    #[test]
    fn contiguous_read_in_chunks() {
        let mut sink = Recorder::default();
        let n = read_contiguous(&mut image(), 2048, 2000, 1024, &mut sink, &NoProgress).unwrap();

        assert_eq!(n, 2000);
        assert_eq!(sink.writes, vec![1024, 976]);
        assert!(sink.data.iter().all(|b| *b == 1));
    }
}
