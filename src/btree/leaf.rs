//! Leaf page format and the inline-or-overflow value encoding.
//!
//! A leaf record stores a key plus enough to reconstruct its value:
//! `size` (total value length), `inline_len` (how many bytes live in the
//! record itself), `overflow_head` (first page of the overflow chain, or
//! `PageId::NONE` if the value fits entirely inline), and the inline
//! bytes themselves. Values over `INLINE_VALUE_CAP` spill the remainder
//! into a singly-linked chain of overflow pages, each `next: u32 || len:
//! u16 || payload`.

use crate::error::Result;
use crate::pager::Pager;
use crate::types::{
    Key, PageId, INLINE_VALUE_CAP, KEY_SIZE, LEAF_ENTRY_SIZE, NODE_HEADER_SIZE,
    OVERFLOW_HEADER_SIZE, OVERFLOW_PAGE_CAPACITY, ORDER, PAGE_SIZE,
};

/// One `(key, value-descriptor)` record of a leaf.
#[derive(Debug, Clone)]
pub struct LeafRecord {
    pub key: Key,
    pub size: u32,
    pub inline_len: u16,
    pub overflow_head: PageId,
    pub inline: [u8; INLINE_VALUE_CAP],
}

/// In-memory view of a leaf page.
#[derive(Debug, Clone)]
pub struct LeafNode {
    pub parent: PageId,
    pub prev: PageId,
    pub next: PageId,
    pub records: Vec<LeafRecord>,
}

impl LeafNode {
    pub fn empty(parent: PageId) -> Self {
        Self {
            parent,
            prev: PageId::NONE,
            next: PageId::NONE,
            records: Vec::new(),
        }
    }

    pub fn num_children(&self) -> usize {
        self.records.len()
    }

    pub fn decode(bytes: &[u8; PAGE_SIZE]) -> Result<Self> {
        let parent = PageId::new(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        let prev = PageId::new(u32::from_le_bytes(bytes[4..8].try_into().unwrap()));
        let next = PageId::new(u32::from_le_bytes(bytes[8..12].try_into().unwrap()));
        let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            let off = NODE_HEADER_SIZE + i * LEAF_ENTRY_SIZE;
            let mut raw = [0u8; KEY_SIZE];
            raw.copy_from_slice(&bytes[off..off + KEY_SIZE]);
            let key = Key::from_raw(raw);
            let mut cur = off + KEY_SIZE;
            let size = u32::from_le_bytes(bytes[cur..cur + 4].try_into().unwrap());
            cur += 4;
            let inline_len = u16::from_le_bytes(bytes[cur..cur + 2].try_into().unwrap());
            cur += 2;
            let overflow_head =
                PageId::new(u32::from_le_bytes(bytes[cur..cur + 4].try_into().unwrap()));
            cur += 4;
            let mut inline = [0u8; INLINE_VALUE_CAP];
            inline.copy_from_slice(&bytes[cur..cur + INLINE_VALUE_CAP]);

            records.push(LeafRecord {
                key,
                size,
                inline_len,
                overflow_head,
                inline,
            });
        }

        Ok(Self {
            parent,
            prev,
            next,
            records,
        })
    }

    pub fn encode(&self, bytes: &mut [u8; PAGE_SIZE]) {
        debug_assert!(self.records.len() <= ORDER);
        bytes.fill(0);
        bytes[0..4].copy_from_slice(&self.parent.value().to_le_bytes());
        bytes[4..8].copy_from_slice(&self.prev.value().to_le_bytes());
        bytes[8..12].copy_from_slice(&self.next.value().to_le_bytes());
        bytes[12..16].copy_from_slice(&(self.records.len() as u32).to_le_bytes());

        for (i, record) in self.records.iter().enumerate() {
            let off = NODE_HEADER_SIZE + i * LEAF_ENTRY_SIZE;
            bytes[off..off + KEY_SIZE].copy_from_slice(record.key.as_raw());
            let mut cur = off + KEY_SIZE;
            bytes[cur..cur + 4].copy_from_slice(&record.size.to_le_bytes());
            cur += 4;
            bytes[cur..cur + 2].copy_from_slice(&record.inline_len.to_le_bytes());
            cur += 2;
            bytes[cur..cur + 4].copy_from_slice(&record.overflow_head.value().to_le_bytes());
            cur += 4;
            bytes[cur..cur + INLINE_VALUE_CAP].copy_from_slice(&record.inline);
        }
    }

    /// Binary search for `key`; `Ok(index)` if present, `Err(insert_index)`
    /// if not (spec's `binary_search_record` plus `find_insert_index`
    /// collapsed into the standard slice idiom).
    pub fn search(&self, key: &Key) -> std::result::Result<usize, usize> {
        self.records.binary_search_by(|r| r.key.cmp(key))
    }

    pub fn insert_at(&mut self, index: usize, record: LeafRecord) {
        self.records.insert(index, record);
    }

    pub fn remove_at(&mut self, index: usize) -> LeafRecord {
        self.records.remove(index)
    }

    pub fn transfer_to(&mut self, target: &mut LeafNode, from_index: usize) {
        target.records.extend(self.records.drain(from_index..));
    }

    pub fn absorb(&mut self, other: &mut LeafNode) {
        self.records.append(&mut other.records);
    }
}

/// In-memory view of one overflow page in a value's spill chain.
struct OverflowPage {
    next: PageId,
    payload: Vec<u8>,
}

impl OverflowPage {
    fn decode(bytes: &[u8; PAGE_SIZE]) -> Self {
        let next = PageId::new(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        let len = u16::from_le_bytes(bytes[4..6].try_into().unwrap()) as usize;
        let payload = bytes[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + len].to_vec();
        Self { next, payload }
    }

    fn encode(&self) -> [u8; PAGE_SIZE] {
        debug_assert!(self.payload.len() <= OVERFLOW_PAGE_CAPACITY);
        let mut bytes = [0u8; PAGE_SIZE];
        bytes[0..4].copy_from_slice(&self.next.value().to_le_bytes());
        bytes[4..6].copy_from_slice(&(self.payload.len() as u16).to_le_bytes());
        bytes[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + self.payload.len()]
            .copy_from_slice(&self.payload);
        bytes
    }
}

/// Split `value` into a leaf-record descriptor, writing any overflow
/// pages through `pager`.
pub fn encode_value(value: &[u8], pager: &Pager) -> Result<(u32, u16, PageId, [u8; INLINE_VALUE_CAP])> {
    let size = value.len() as u32;
    let mut inline = [0u8; INLINE_VALUE_CAP];

    if value.len() <= INLINE_VALUE_CAP {
        inline[..value.len()].copy_from_slice(value);
        return Ok((size, value.len() as u16, PageId::NONE, inline));
    }

    inline.copy_from_slice(&value[..INLINE_VALUE_CAP]);
    let remainder = &value[INLINE_VALUE_CAP..];

    let mut head = PageId::NONE;
    let mut prev_page: Option<PageId> = None;
    for chunk in remainder.chunks(OVERFLOW_PAGE_CAPACITY).rev() {
        let page_id = pager.alloc_page()?;
        let page = OverflowPage {
            next: prev_page.unwrap_or(PageId::NONE),
            payload: chunk.to_vec(),
        };
        pager.write_page(page_id, page.encode())?;
        prev_page = Some(page_id);
        head = page_id;
    }

    Ok((size, INLINE_VALUE_CAP as u16, head, inline))
}

/// Reconstruct the full value for `record` by walking its overflow chain.
pub fn materialize_value(record: &LeafRecord, pager: &Pager) -> Result<Vec<u8>> {
    if !record.overflow_head.is_valid() {
        return Ok(record.inline[..record.inline_len as usize].to_vec());
    }

    let mut value = Vec::with_capacity(record.size as usize);
    value.extend_from_slice(&record.inline[..record.inline_len as usize]);

    let mut next = record.overflow_head;
    while next.is_valid() {
        let bytes = pager.get_page(next)?;
        let page = OverflowPage::decode(&bytes);
        value.extend_from_slice(&page.payload);
        next = page.next;
    }

    Ok(value)
}

/// Free every page in a value's overflow chain (a no-op if it has none).
pub fn free_overflow_chain(head: PageId, pager: &Pager) -> Result<()> {
    let mut next = head;
    while next.is_valid() {
        let bytes = pager.get_page(next)?;
        let page = OverflowPage::decode(&bytes);
        let to_free = next;
        next = page.next;
        pager.free_page(to_free)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use tempfile::tempdir;

    fn temp_pager() -> (Pager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leaf_test.db");
        let pager = Pager::open(&path, true).unwrap();
        (pager, dir)
    }

    fn k(s: &str) -> Key {
        Key::new(s).unwrap()
    }

    #[test]
    fn roundtrip_leaf() {
        let mut leaf = LeafNode::empty(PageId::new(1));
        leaf.insert_at(
            0,
            LeafRecord {
                key: k("a"),
                size: 3,
                inline_len: 3,
                overflow_head: PageId::NONE,
                inline: {
                    let mut b = [0u8; INLINE_VALUE_CAP];
                    b[..3].copy_from_slice(b"abc");
                    b
                },
            },
        );

        let mut bytes = [0u8; PAGE_SIZE];
        leaf.encode(&mut bytes);
        let restored = LeafNode::decode(&bytes).unwrap();
        assert_eq!(restored.records.len(), 1);
        assert_eq!(restored.records[0].key, k("a"));
        assert_eq!(&restored.records[0].inline[..3], b"abc");
    }

    #[test]
    fn inline_value_roundtrips_without_overflow() {
        let (pager, _dir) = temp_pager();
        let (size, inline_len, overflow_head, inline) = encode_value(b"hello", &pager).unwrap();
        assert_eq!(overflow_head, PageId::NONE);
        let record = LeafRecord {
            key: k("a"),
            size,
            inline_len,
            overflow_head,
            inline,
        };
        assert_eq!(materialize_value(&record, &pager).unwrap(), b"hello");
    }

    #[test]
    fn oversized_value_spills_to_overflow_chain() {
        let (pager, _dir) = temp_pager();
        let value = vec![7u8; INLINE_VALUE_CAP + OVERFLOW_PAGE_CAPACITY + 50];
        let (size, inline_len, overflow_head, inline) = encode_value(&value, &pager).unwrap();
        assert!(overflow_head.is_valid());
        let record = LeafRecord {
            key: k("a"),
            size,
            inline_len,
            overflow_head,
            inline,
        };
        let restored = materialize_value(&record, &pager).unwrap();
        assert_eq!(restored, value);

        free_overflow_chain(record.overflow_head, &pager).unwrap();
        let realloc = pager.alloc_page().unwrap();
        assert!(realloc.is_valid());
    }

    #[test]
    fn search_finds_present_and_absent_keys() {
        let mut leaf = LeafNode::empty(PageId::NONE);
        for s in ["a", "c", "e"] {
            let idx = leaf.search(&k(s)).unwrap_err();
            leaf.insert_at(
                idx,
                LeafRecord {
                    key: k(s),
                    size: 0,
                    inline_len: 0,
                    overflow_head: PageId::NONE,
                    inline: [0u8; INLINE_VALUE_CAP],
                },
            );
        }
        assert_eq!(leaf.search(&k("c")), Ok(1));
        assert_eq!(leaf.search(&k("b")), Err(1));
    }
}
