//! Lazy directory listing.
//!
//! [`Entries`] reads a directory one cluster at a time and feeds each 32-byte
//! record to a per-filesystem decoder. The decoder state (pending long name,
//! pending exFAT entry-set) lives in the iterator and dies with it.

use log::{info, trace, warn};
use std::collections::VecDeque;
use std::rc::Rc;

use super::chain::ClusterRun;
use super::dir_entry::{DirEntry, PartitionRef};
use super::exfat::ExFatDecoder;
use super::fat::FatDecoder;
use super::fs_error::{ChainStop, FsError};
use super::boot_sector::Geometry;
use crate::constants::DIR_ENTRY_SIZE;
use crate::device::BlockDevice;
use crate::traits::ProgressSink;

/// What the scan does after a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Skip the rest of the current cluster.
    EndOfCluster,
    /// No valid record follows, stop the scan.
    EndOfDirectory,
}

/// Position of a record within its scan.
#[derive(Debug, Clone, Copy)]
pub struct RecordContext {
    pub index: usize,
    pub partition: PartitionRef,
}

/// Per-filesystem record decoder.
#[derive(Debug)]
pub enum Decoder {
    Fat(FatDecoder),
    ExFat(ExFatDecoder),
}

impl Decoder {
    fn decode(
        &mut self,
        record: &[u8],
        ctx: RecordContext,
        out: &mut VecDeque<DirEntry>,
    ) -> Result<Step, FsError> {
        match self {
            Decoder::Fat(decoder) => decoder.decode(record, ctx, out),
            Decoder::ExFat(decoder) => decoder.decode(record, ctx, out),
        }
    }

    fn finish(&mut self) {
        match self {
            Decoder::Fat(decoder) => decoder.finish(),
            Decoder::ExFat(decoder) => decoder.finish(),
        }
    }
}

/// Where directory records are read from.
#[derive(Debug)]
pub enum Source<'a> {
    /// Fixed FAT12/16 root directory region.
    Region { offset: u64, remaining: u64 },
    /// Clusters of a chain or of a contiguous run.
    Clusters {
        run: ClusterRun<'a>,
        geometry: Geometry,
    },
    /// Entries known up front.
    Empty,
}

/// Lazy iterator over the entries of one directory.
pub struct Entries<'a> {
    device: &'a mut dyn BlockDevice,
    source: Source<'a>,
    decoder: Option<Decoder>,
    partition: PartitionRef,
    chunk_size: usize,
    chunk: Vec<u8>,
    offset: usize,
    index: usize,
    ready: VecDeque<DirEntry>,
    emitted: usize,
    chunks_read: u32,
    done: bool,
    truncation: Option<ChainStop>,
    progress: Rc<dyn ProgressSink>,
}

impl<'a> Entries<'a> {
    pub fn new(
        device: &'a mut dyn BlockDevice,
        source: Source<'a>,
        decoder: Decoder,
        partition: PartitionRef,
        chunk_size: u64,
        progress: Rc<dyn ProgressSink>,
    ) -> Self {
        Self {
            device,
            source,
            decoder: Some(decoder),
            partition,
            chunk_size: chunk_size as usize,
            chunk: vec![],
            offset: 0,
            index: 0,
            ready: VecDeque::new(),
            emitted: 0,
            chunks_read: 0,
            done: false,
            truncation: None,
            progress,
        }
    }

    /// Listing of entries decoded beforehand.
    pub fn prefilled(
        device: &'a mut dyn BlockDevice,
        entries: Vec<DirEntry>,
        partition: PartitionRef,
        progress: Rc<dyn ProgressSink>,
    ) -> Self {
        let mut listing = Self {
            device,
            source: Source::Empty,
            decoder: None,
            partition,
            chunk_size: 0,
            chunk: vec![],
            offset: 0,
            index: entries.len(),
            ready: entries.into(),
            emitted: 0,
            chunks_read: 0,
            done: false,
            truncation: None,
            progress,
        };
        listing.finish();
        listing
    }

    /// Why the scan ended early, if the directory chain was corrupt.
    pub fn truncation(&self) -> Option<ChainStop> {
        self.truncation
    }

    /// Number of records examined so far.
    pub fn records_read(&self) -> usize {
        self.index
    }

    /// Loads the next cluster-sized chunk. Returns `false` once the source is exhausted.
    fn next_chunk(&mut self) -> Result<bool, FsError> {
        match &mut self.source {
            Source::Region { offset, remaining } => {
                if *remaining == 0 {
                    return Ok(false);
                }
                let len = (*remaining).min(self.chunk_size as u64);
                self.chunk.resize(len as usize, 0);
                self.device.read_at(*offset, &mut self.chunk)?;
                trace!("Reading root region at offset 0x{:X}", *offset);
                *offset += len;
                *remaining -= len;
            }
            Source::Clusters { run, geometry } => {
                let Some(cluster) = run.next() else {
                    return Ok(false);
                };
                let location = geometry.cluster_location(cluster)?;
                trace!("Reading directory cluster 0x{cluster:08X} at offset 0x{location:X}");
                self.chunk.resize(self.chunk_size, 0);
                self.device.read_at(location, &mut self.chunk)?;
            }
            Source::Empty => return Ok(false),
        }

        self.offset = 0;
        self.chunks_read += 1;
        self.progress
            .update((40 + (self.chunks_read * 10) % 60) as u8);
        Ok(true)
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        if let Some(decoder) = self.decoder.as_mut() {
            decoder.finish();
        }

        let stop = match &self.source {
            Source::Clusters { run, .. } => run.stop(),
            _ => None,
        };
        if let Some(stop) = stop.filter(ChainStop::is_truncation) {
            warn!("Directory listing of partition {} truncated: {stop}", self.partition);
            self.truncation = Some(stop);
        }

        self.progress.update(100);
        info!(
            "{} entries found in {} records",
            self.emitted + self.ready.len(),
            self.index
        );
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<DirEntry, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.ready.pop_front() {
                self.emitted += 1;
                return Some(Ok(entry));
            }
            if self.done {
                return None;
            }

            if self.offset + DIR_ENTRY_SIZE > self.chunk.len() {
                match self.next_chunk() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.finish();
                        continue;
                    }
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }

            let Some(decoder) = self.decoder.as_mut() else {
                self.finish();
                continue;
            };

            self.index += 1;
            let ctx = RecordContext {
                index: self.index,
                partition: self.partition,
            };
            let record = &self.chunk[self.offset..self.offset + DIR_ENTRY_SIZE];
            self.offset += DIR_ENTRY_SIZE;

            match decoder.decode(record, ctx, &mut self.ready) {
                Ok(Step::Continue) => {}
                Ok(Step::EndOfCluster) => self.offset = self.chunk.len(),
                Ok(Step::EndOfDirectory) => self.finish(),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
