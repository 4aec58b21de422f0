//! The file header: page 0 of the database file.
//!
//! Layout (spec §6):
//! ```text
//! Offset  Size  Description
//! 0       24    version tag, ASCII, null-padded ("NifflerDB 0.1")
//! 24      2     page_size: u16
//! 26      4     num_pages: u32
//! 30      4     last_free_list_page: u32 (0 => none)
//! 34      4     num_free_list_pages: u32
//! 38      4     CRC32 checksum of the bytes above
//! ```
//! The checksum is not named in spec prose but is carried as ambient
//! corruption detection, the same way the teacher guarded its header.

use crate::error::{Result, StorageError};
use crate::types::{PageId, PAGE_SIZE};

/// Version tag stamped into every new file.
pub const VERSION_TAG: &[u8] = b"NifflerDB 0.1";

const VERSION_FIELD_SIZE: usize = 24;
const CHECKSUMMED_SIZE: usize = VERSION_FIELD_SIZE + 2 + 4 + 4 + 4;
const ON_DISK_SIZE: usize = CHECKSUMMED_SIZE + 4;

/// In-memory view of the file header.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub page_size: u16,
    /// Total number of pages in the file, including pages 0 and 1.
    pub num_pages: u32,
    /// Head of the free-list chain (the tail page, since entries are
    /// popped from the tail); `PageId::NONE` if the free-list is empty.
    pub last_free_list_page: PageId,
    pub num_free_list_pages: u32,
}

impl FileHeader {
    /// A fresh header for a newly created file: header page, tree-header
    /// page, no free-list yet.
    pub fn new() -> Self {
        Self {
            page_size: PAGE_SIZE as u16,
            num_pages: 2,
            last_free_list_page: PageId::NONE,
            num_free_list_pages: 0,
        }
    }

    pub fn read(bytes: &[u8; PAGE_SIZE]) -> Result<Self> {
        if &bytes[..VERSION_FIELD_SIZE.min(VERSION_TAG.len())] != VERSION_TAG {
            let found = String::from_utf8_lossy(&bytes[..VERSION_FIELD_SIZE])
                .trim_end_matches('\0')
                .to_string();
            return Err(StorageError::VersionMismatch { found });
        }

        let stored_checksum = u32::from_le_bytes(
            bytes[CHECKSUMMED_SIZE..ON_DISK_SIZE].try_into().unwrap(),
        );
        let computed = crc32fast::hash(&bytes[..CHECKSUMMED_SIZE]);
        if stored_checksum != computed {
            return Err(StorageError::corruption("file header checksum mismatch"));
        }

        let mut off = VERSION_FIELD_SIZE;
        let page_size = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap());
        off += 2;
        let num_pages = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let last_free_list_page =
            PageId::new(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        off += 4;
        let num_free_list_pages = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());

        if page_size as usize != PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "page size {} in file does not match compiled PAGE_SIZE {}",
                page_size, PAGE_SIZE
            )));
        }

        Ok(Self {
            page_size,
            num_pages,
            last_free_list_page,
            num_free_list_pages,
        })
    }

    pub fn write(&self, bytes: &mut [u8; PAGE_SIZE]) {
        bytes.fill(0);
        bytes[..VERSION_TAG.len()].copy_from_slice(VERSION_TAG);

        let mut off = VERSION_FIELD_SIZE;
        bytes[off..off + 2].copy_from_slice(&self.page_size.to_le_bytes());
        off += 2;
        bytes[off..off + 4].copy_from_slice(&self.num_pages.to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.last_free_list_page.value().to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.num_free_list_pages.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..CHECKSUMMED_SIZE]);
        bytes[CHECKSUMMED_SIZE..ON_DISK_SIZE].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Reserve the next page index and bump `num_pages`. Does not touch
    /// the underlying file; the caller is responsible for extending it.
    pub fn reserve_next_page(&mut self) -> PageId {
        let id = PageId::new(self.num_pages);
        self.num_pages += 1;
        id
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = FileHeader {
            page_size: PAGE_SIZE as u16,
            num_pages: 100,
            last_free_list_page: PageId::new(50),
            num_free_list_pages: 5,
        };

        let mut bytes = [0u8; PAGE_SIZE];
        header.write(&mut bytes);

        let restored = FileHeader::read(&bytes).unwrap();
        assert_eq!(restored.page_size, header.page_size);
        assert_eq!(restored.num_pages, header.num_pages);
        assert_eq!(restored.last_free_list_page, header.last_free_list_page);
        assert_eq!(restored.num_free_list_pages, header.num_free_list_pages);
    }

    #[test]
    fn rejects_bad_version_tag() {
        let mut bytes = [0u8; PAGE_SIZE];
        bytes[..13].copy_from_slice(b"NotNifflerDB!");
        assert!(matches!(
            FileHeader::read(&bytes),
            Err(StorageError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn detects_checksum_corruption() {
        let header = FileHeader::new();
        let mut bytes = [0u8; PAGE_SIZE];
        header.write(&mut bytes);
        bytes[26] ^= 0xFF;
        assert!(matches!(
            FileHeader::read(&bytes),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn reserve_next_page_increments() {
        let mut header = FileHeader::new();
        assert_eq!(header.num_pages, 2);
        let p = header.reserve_next_page();
        assert_eq!(p, PageId::new(2));
        assert_eq!(header.num_pages, 3);
    }
}
