//! The file I/O primitive (component 4.1): positioned reads/writes over a
//! single OS file handle, plus sync/truncate/size. This layer knows
//! nothing about pages, trees, or free-lists — it is the thinnest
//! possible wrapper the pager builds on.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::PAGE_SIZE;

/// Byte-level random-access file abstraction. Positioned I/O is atomic
/// against its own calls (serialized by the inner lock); concurrent
/// readers/writers above this layer are the caller's responsibility.
pub trait DiskFile: Send + Sync {
    /// Read exactly `PAGE_SIZE` bytes at `page_index * PAGE_SIZE`.
    fn read(&self, page_index: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Write exactly `PAGE_SIZE` bytes at `page_index * PAGE_SIZE`.
    fn write(&self, page_index: u32, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Flush all written data to stable storage.
    fn sync(&self) -> Result<()>;

    /// Grow or shrink the file to exactly `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Current length of the file in bytes.
    fn size(&self) -> Result<u64>;
}

/// A [`DiskFile`] backed by a real OS file handle.
pub struct OsDiskFile {
    file: Mutex<File>,
}

impl OsDiskFile {
    /// Open an existing file for read/write, creating it if absent.
    pub fn open_read_write(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Open a file for create-truncating: any existing contents are
    /// discarded.
    pub fn create_truncating(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl DiskFile for OsDiskFile {
    fn read(&self, page_index: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_index as u64 * PAGE_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, page_index: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_index as u64 * PAGE_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.lock();
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_reads_back_a_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.db");
        let f = OsDiskFile::create_truncating(&path)?;
        f.truncate(PAGE_SIZE as u64 * 3)?;

        let mut page = [0u8; PAGE_SIZE];
        page[..5].copy_from_slice(b"hello");
        f.write(1, &page)?;
        f.sync()?;

        let mut out = [0u8; PAGE_SIZE];
        f.read(1, &mut out)?;
        assert_eq!(&out[..5], b"hello");
        Ok(())
    }

    #[test]
    fn size_reflects_truncate() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.db");
        let f = OsDiskFile::create_truncating(&path)?;
        f.truncate(PAGE_SIZE as u64 * 5)?;
        assert_eq!(f.size()?, PAGE_SIZE as u64 * 5);
        Ok(())
    }
}
