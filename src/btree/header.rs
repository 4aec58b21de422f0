//! The tree header: page 1 of the database file.
//!
//! Layout (spec §6):
//! ```text
//! Offset  Size  Description
//! 0       4     order: u32 (max fan-out of an internal node)
//! 4       4     key_size: u32
//! 8       4     num_internal_nodes: u32
//! 12      4     num_leaf_nodes: u32
//! 16      4     height: u32
//! 20      4     root_page: u32
//! 24      4     leaf_page: u32 (first/leftmost leaf, for a future range scan)
//! 28      4     CRC32 checksum of the bytes above
//! ```
//! Carried the same way the file header is: a checksum guards this page
//! too, since it is as much a single point of failure as page 0.

use crate::error::{Result, StorageError};
use crate::types::{PageId, ORDER, PAGE_SIZE};

const CHECKSUMMED_SIZE: usize = 4 * 7;
const ON_DISK_SIZE: usize = CHECKSUMMED_SIZE + 4;

/// In-memory view of the tree header.
#[derive(Debug, Clone, Copy)]
pub struct TreeHeader {
    pub order: u32,
    pub key_size: u32,
    pub num_internal_nodes: u32,
    pub num_leaf_nodes: u32,
    pub height: u32,
    pub root_page: PageId,
    pub leaf_page: PageId,
}

impl TreeHeader {
    /// A fresh header for a brand-new, empty tree: one internal root with
    /// one leaf child, height 1.
    pub fn new(root_page: PageId, leaf_page: PageId) -> Self {
        Self {
            order: ORDER as u32,
            key_size: crate::types::KEY_SIZE as u32,
            num_internal_nodes: 1,
            num_leaf_nodes: 1,
            height: 1,
            root_page,
            leaf_page,
        }
    }

    pub fn read(bytes: &[u8; PAGE_SIZE]) -> Result<Self> {
        let stored_checksum =
            u32::from_le_bytes(bytes[CHECKSUMMED_SIZE..ON_DISK_SIZE].try_into().unwrap());
        let computed = crc32fast::hash(&bytes[..CHECKSUMMED_SIZE]);
        if stored_checksum != computed {
            return Err(StorageError::corruption("tree header checksum mismatch"));
        }

        let mut off = 0;
        let order = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let key_size = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let num_internal_nodes = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let num_leaf_nodes = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let height = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let root_page = PageId::new(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        off += 4;
        let leaf_page = PageId::new(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));

        if order as usize != ORDER {
            return Err(StorageError::corruption(format!(
                "tree order {order} in file does not match compiled order {ORDER}"
            )));
        }
        if key_size as usize != crate::types::KEY_SIZE {
            return Err(StorageError::corruption(format!(
                "key size {key_size} in file does not match compiled key size {}",
                crate::types::KEY_SIZE
            )));
        }

        Ok(Self {
            order,
            key_size,
            num_internal_nodes,
            num_leaf_nodes,
            height,
            root_page,
            leaf_page,
        })
    }

    pub fn write(&self, bytes: &mut [u8; PAGE_SIZE]) {
        bytes.fill(0);
        let mut off = 0;
        bytes[off..off + 4].copy_from_slice(&self.order.to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.key_size.to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.num_internal_nodes.to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.num_leaf_nodes.to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.height.to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.root_page.value().to_le_bytes());
        off += 4;
        bytes[off..off + 4].copy_from_slice(&self.leaf_page.value().to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..CHECKSUMMED_SIZE]);
        bytes[CHECKSUMMED_SIZE..ON_DISK_SIZE].copy_from_slice(&checksum.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = TreeHeader::new(PageId::new(2), PageId::new(3));
        let mut bytes = [0u8; PAGE_SIZE];
        header.write(&mut bytes);
        let restored = TreeHeader::read(&bytes).unwrap();
        assert_eq!(restored.root_page, PageId::new(2));
        assert_eq!(restored.leaf_page, PageId::new(3));
        assert_eq!(restored.height, 1);
        assert_eq!(restored.num_internal_nodes, 1);
        assert_eq!(restored.num_leaf_nodes, 1);
    }

    #[test]
    fn detects_checksum_corruption() {
        let header = TreeHeader::new(PageId::new(2), PageId::new(3));
        let mut bytes = [0u8; PAGE_SIZE];
        header.write(&mut bytes);
        bytes[0] ^= 0xFF;
        assert!(TreeHeader::read(&bytes).is_err());
    }

    #[test]
    fn rejects_order_mismatch() {
        let header = TreeHeader::new(PageId::new(2), PageId::new(3));
        let mut bytes = [0u8; PAGE_SIZE];
        header.write(&mut bytes);
        bytes[0..4].copy_from_slice(&((ORDER as u32) + 1).to_le_bytes());
        let checksum = crc32fast::hash(&bytes[..CHECKSUMMED_SIZE]);
        bytes[CHECKSUMMED_SIZE..ON_DISK_SIZE].copy_from_slice(&checksum.to_le_bytes());
        assert!(matches!(
            TreeHeader::read(&bytes),
            Err(StorageError::Corruption(_))
        ));
    }
}
