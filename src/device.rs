//! Block-device access.
//!
//! Every parser reads through [`BlockDevice`], an offset-addressed byte source.
//! Two transports are provided:
//! - [`DiskImage`]: any seekable stream (image file, in-memory buffer), arbitrary offsets
//! - [`PhysicalDrive`]: raw media, offsets and lengths must be sector multiples, read-only

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::constants::SECTOR_SIZE;

/// Byte-addressed, blocking access to raw storage.
pub trait BlockDevice {
    /// Moves the read/write cursor to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Fills `buf` entirely from the current position.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `buf` at the current position.
    fn write_exact(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Total size of the device in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Seeks to `offset` and fills `buf`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(offset)?;
        self.read_exact(buf)
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact(buf)
    }

    fn write_exact(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_exact(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        (**self).len()
    }
}

/// A disk image backed by any seekable stream.
pub struct DiskImage<T> {
    inner: T,
}

impl<T: Read + Write + Seek> DiskImage<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl DiskImage<File> {
    /// Opens an image file read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<T: Read + Write + Seek> BlockDevice for DiskImage<T> {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)
    }

    fn write_exact(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        let pos = self.inner.stream_position()?;
        let len = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(len)
    }
}

/// Raw physical media. Seeks and reads must be aligned on the sector size,
/// writes are refused.
pub struct PhysicalDrive<T> {
    inner: T,
    sector_size: usize,
}

impl<T: Read + Seek> PhysicalDrive<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            sector_size: SECTOR_SIZE,
        }
    }

    fn check_aligned(&self, what: &str, value: u64) -> io::Result<()> {
        if value % self.sector_size as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{what} error: {value} should be a multiple of the media sector size {}",
                    self.sector_size
                ),
            ));
        }
        Ok(())
    }
}

impl PhysicalDrive<File> {
    /// Opens a device node read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<T: Read + Seek> BlockDevice for PhysicalDrive<T> {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.check_aligned("Seek", offset)?;
        self.inner.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.check_aligned("Read", buf.len() as u64)?;
        self.inner.read_exact(buf)
    }

    fn write_exact(&mut self, _buf: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Writing to physical media is not supported",
        ))
    }

    fn len(&mut self) -> io::Result<u64> {
        let pos = self.inner.stream_position()?;
        let len = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(len)
    }
}
