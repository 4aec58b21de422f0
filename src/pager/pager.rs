//! The pager: owns the file handle, the page cache, and the persisted
//! free-list. Grounded directly on `pager.cpp`'s `alloc_page`/
//! `get_free_page`/`free_page`/`sync` from the original source this
//! engine is modeled on.
//!
//! The file header (page 0) is not routed through the page cache: it is
//! read once at open and persisted directly to page 0 every time it
//! changes, the same way the original writes it out eagerly from
//! `save_header()` rather than waiting for the next `sync()`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StorageError};
use crate::pager::cache::LruCache;
use crate::storage::{DiskFile, FileHeader, FreeListPage, OsDiskFile};
use crate::types::{PageId, PAGE_SIZE};

struct CacheEntry {
    data: Box<[u8; PAGE_SIZE]>,
    dirty: bool,
}

/// Paged file manager: allocation, freeing, caching, and flushing.
pub struct Pager {
    file: Arc<dyn DiskFile>,
    header: RwLock<FileHeader>,
    pages: RwLock<HashMap<u32, CacheEntry>>,
    lru: RwLock<LruCache>,
    capacity: Option<usize>,
}

impl Pager {
    /// Open (or create) a pager backed by a real file on disk.
    pub fn open(path: &Path, create_new: bool) -> Result<Self> {
        if create_new {
            let file = OsDiskFile::create_truncating(path)?;
            Self::bootstrap(Arc::new(file))
        } else {
            let file = OsDiskFile::open_read_write(path)?;
            Self::load(Arc::new(file))
        }
    }

    /// Build a pager over any [`DiskFile`], stamping a fresh header.
    pub fn bootstrap(file: Arc<dyn DiskFile>) -> Result<Self> {
        file.truncate(PAGE_SIZE as u64 * 2)?;
        let header = FileHeader::new();
        let pager = Self {
            file,
            header: RwLock::new(header),
            pages: RwLock::new(HashMap::new()),
            lru: RwLock::new(LruCache::new(0)),
            capacity: None,
        };
        pager.persist_header(&header)?;
        log::debug!("pager: created new file, num_pages={}", header.num_pages);
        Ok(pager)
    }

    /// Build a pager over any [`DiskFile`], reading its existing header.
    pub fn load(file: Arc<dyn DiskFile>) -> Result<Self> {
        let mut bytes = [0u8; PAGE_SIZE];
        file.read(PageId::FILE_HEADER.value(), &mut bytes)?;
        let header = FileHeader::read(&bytes)?;
        log::debug!("pager: loaded file, num_pages={}", header.num_pages);
        Ok(Self {
            file,
            header: RwLock::new(header),
            pages: RwLock::new(HashMap::new()),
            lru: RwLock::new(LruCache::new(0)),
            capacity: None,
        })
    }

    /// Bound the in-memory page cache, evicting clean pages LRU-first
    /// once it fills. Unset (the default) means unbounded.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn header(&self) -> FileHeader {
        *self.header.read()
    }

    /// Total page count, including the file header and tree header.
    pub fn page_count(&self) -> u32 {
        self.header.read().num_pages
    }

    /// Read a page, loading it from disk into the cache if necessary.
    pub fn get_page(&self, id: PageId) -> Result<[u8; PAGE_SIZE]> {
        self.ensure_loaded(id.value())?;
        let pages = self.pages.read();
        Ok(*pages[&id.value()].data)
    }

    /// Overwrite a page's contents in the cache and mark it dirty.
    pub fn write_page(&self, id: PageId, data: [u8; PAGE_SIZE]) -> Result<()> {
        {
            let mut pages = self.pages.write();
            pages.insert(
                id.value(),
                CacheEntry {
                    data: Box::new(data),
                    dirty: true,
                },
            );
        }
        self.lru.write().access(id.value());
        self.evict_if_over_capacity()?;
        Ok(())
    }

    /// Mark an already-cached page dirty without changing its contents.
    pub fn mark_dirty(&self, id: PageId) {
        if let Some(entry) = self.pages.write().get_mut(&id.value()) {
            entry.dirty = true;
        }
    }

    /// Allocate a page: reuse a free-list entry if one exists, otherwise
    /// extend the file by one page. The returned page is zeroed and
    /// already cached dirty.
    pub fn alloc_page(&self) -> Result<PageId> {
        let last_free = self.header.read().last_free_list_page;

        if last_free.is_valid() {
            let bytes = self.get_page(last_free)?;
            let mut free_list = FreeListPage::decode(&bytes)?;

            if let Some(reclaimed) = free_list.pop() {
                let mut encoded = [0u8; PAGE_SIZE];
                free_list.encode(&mut encoded);
                self.write_page(last_free, encoded)?;
                self.write_page(reclaimed, [0u8; PAGE_SIZE])?;
                log::debug!("pager: reused free page {reclaimed}");
                return Ok(reclaimed);
            }
            // Tail free-list page is empty (count was already zero); the
            // original does not unlink it or truncate the file here —
            // Open Question 2 treats that as an optimization, not a
            // correctness requirement. Fall through and extend the file.
        }

        let new_id = {
            let mut header = self.header.write();
            let id = header.reserve_next_page();
            let snapshot = *header;
            drop(header);
            self.persist_header(&snapshot)?;
            id
        };
        self.write_page(new_id, [0u8; PAGE_SIZE])?;
        log::debug!("pager: extended file, new page {new_id}");
        Ok(new_id)
    }

    /// Free a page: append it to the tail free-list page, allocating a
    /// new tail (via file extension, never recursively through the
    /// free-list) if none exists or the current tail is full.
    pub fn free_page(&self, id: PageId) -> Result<()> {
        let last_free = self.header.read().last_free_list_page;

        if !last_free.is_valid() {
            self.start_free_list(id)?;
            return Ok(());
        }

        let bytes = self.get_page(last_free)?;
        let mut free_list = FreeListPage::decode(&bytes)?;

        if !free_list.is_full() {
            free_list.push(id);
            let mut encoded = [0u8; PAGE_SIZE];
            free_list.encode(&mut encoded);
            self.write_page(last_free, encoded)?;
            log::debug!("pager: freed page {id} onto tail free-list page {last_free}");
            return Ok(());
        }

        self.append_free_list_tail(id, last_free)
    }

    fn start_free_list(&self, id: PageId) -> Result<()> {
        let new_fl_id = {
            let mut header = self.header.write();
            header.reserve_next_page()
        };

        let mut free_list = FreeListPage::empty(PageId::NONE);
        free_list.push(id);
        let mut encoded = [0u8; PAGE_SIZE];
        free_list.encode(&mut encoded);
        self.write_page(new_fl_id, encoded)?;

        let snapshot = {
            let mut header = self.header.write();
            header.last_free_list_page = new_fl_id;
            header.num_free_list_pages += 1;
            *header
        };
        self.persist_header(&snapshot)?;
        log::debug!("pager: started free-list at page {new_fl_id}");
        Ok(())
    }

    fn append_free_list_tail(&self, id: PageId, prev_tail: PageId) -> Result<()> {
        let new_fl_id = {
            let mut header = self.header.write();
            header.reserve_next_page()
        };

        let mut free_list = FreeListPage::empty(prev_tail);
        free_list.push(id);
        let mut encoded = [0u8; PAGE_SIZE];
        free_list.encode(&mut encoded);
        self.write_page(new_fl_id, encoded)?;

        let snapshot = {
            let mut header = self.header.write();
            header.last_free_list_page = new_fl_id;
            header.num_free_list_pages += 1;
            *header
        };
        self.persist_header(&snapshot)?;
        log::debug!("pager: free-list tail {prev_tail} full, appended new tail {new_fl_id}");
        Ok(())
    }

    /// Flush every dirty page to disk, then fsync. On failure, dirty
    /// flags remain set on whatever was not yet written.
    pub fn sync(&self) -> Result<()> {
        let dirty_ids: Vec<u32> = {
            let pages = self.pages.read();
            pages
                .iter()
                .filter(|(_, e)| e.dirty)
                .map(|(id, _)| *id)
                .collect()
        };

        for id in &dirty_ids {
            let data = {
                let pages = self.pages.read();
                *pages[id].data
            };
            self.file.write(*id, &data)?;
            if let Some(entry) = self.pages.write().get_mut(id) {
                entry.dirty = false;
            }
        }

        self.file.sync()?;
        log::debug!("pager: synced {} dirty pages", dirty_ids.len());
        Ok(())
    }

    /// Discard every dirty page from the cache without writing it back,
    /// so the next read reloads from disk (Open Question 3).
    pub fn discard_dirty(&self) {
        let mut pages = self.pages.write();
        pages.retain(|_, entry| !entry.dirty);
        log::debug!("pager: discarded dirty pages after failed operation");
    }

    fn ensure_loaded(&self, index: u32) -> Result<()> {
        {
            let pages = self.pages.read();
            if pages.contains_key(&index) {
                drop(pages);
                self.lru.write().access(index);
                return Ok(());
            }
        }

        let mut buf = [0u8; PAGE_SIZE];
        self.file.read(index, &mut buf)?;
        self.pages.write().insert(
            index,
            CacheEntry {
                data: Box::new(buf),
                dirty: false,
            },
        );
        self.lru.write().access(index);
        self.evict_if_over_capacity()?;
        Ok(())
    }

    fn evict_if_over_capacity(&self) -> Result<()> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };

        loop {
            if self.pages.read().len() <= capacity {
                return Ok(());
            }
            let Some(victim) = self.lru.write().pop_lru() else {
                return Ok(());
            };
            let mut pages = self.pages.write();
            match pages.get(&victim) {
                Some(entry) if entry.dirty => {
                    // Dirty pages are never evicted before sync; try the
                    // next-least-recently-used instead.
                    drop(pages);
                    continue;
                }
                Some(_) => {
                    pages.remove(&victim);
                }
                None => {}
            }
        }
    }

    fn persist_header(&self, header: &FileHeader) -> Result<()> {
        let mut bytes = [0u8; PAGE_SIZE];
        header.write(&mut bytes);
        self.file.write(PageId::FILE_HEADER.value(), &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_pager(dir: &tempfile::TempDir) -> Pager {
        let path = dir.path().join("test.db");
        Pager::open(&path, true).unwrap()
    }

    #[test]
    fn fresh_pager_has_two_pages() {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir);
        assert_eq!(pager.page_count(), 2);
    }

    #[test]
    fn alloc_extends_file_and_writes_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir);

        let id = pager.alloc_page()?;
        assert_eq!(id, PageId::new(2));
        assert_eq!(pager.page_count(), 3);

        let mut data = [0u8; PAGE_SIZE];
        data[..5].copy_from_slice(b"hello");
        pager.write_page(id, data)?;
        pager.sync()?;

        let read_back = pager.get_page(id)?;
        assert_eq!(&read_back[..5], b"hello");
        Ok(())
    }

    #[test]
    fn free_then_alloc_reuses_page_before_extending() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir);

        let a = pager.alloc_page()?;
        let b = pager.alloc_page()?;
        pager.free_page(a)?;

        let reused = pager.alloc_page()?;
        assert_eq!(reused, a);
        assert_ne!(reused, b);
        // num_pages grew for a, b, and the free-list page itself, but not
        // again for the reused allocation.
        assert_eq!(pager.page_count(), 4);
        Ok(())
    }

    #[test]
    fn free_list_overflow_allocates_new_tail() -> Result<()> {
        use crate::storage::MAX_FREE_LIST_ENTRIES;

        let dir = tempdir().unwrap();
        let pager = open_pager(&dir);

        let mut allocated = Vec::new();
        for _ in 0..(MAX_FREE_LIST_ENTRIES + 5) {
            allocated.push(pager.alloc_page()?);
        }
        for id in &allocated {
            pager.free_page(*id)?;
        }

        assert!(pager.header().num_free_list_pages >= 2);
        Ok(())
    }

    #[test]
    fn discard_dirty_forces_reload_from_disk() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir);

        let id = pager.alloc_page()?;
        pager.sync()?;

        let mut dirty = [0u8; PAGE_SIZE];
        dirty[0] = 0xFF;
        pager.write_page(id, dirty)?;
        pager.discard_dirty();

        let reloaded = pager.get_page(id)?;
        assert_eq!(reloaded[0], 0);
        Ok(())
    }

    #[test]
    fn reopen_preserves_header_state() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        {
            let pager = Pager::open(&path, true)?;
            let a = pager.alloc_page()?;
            let b = pager.alloc_page()?;
            pager.free_page(a)?;
            pager.free_page(b)?;
            pager.sync()?;
        }
        let pager = Pager::open(&path, false)?;
        assert_eq!(pager.header().num_free_list_pages, 1);
        Ok(())
    }

    #[test]
    fn bounded_cache_evicts_clean_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bounded.db");
        let pager = Pager::open(&path, true)?.with_capacity(2);

        let a = pager.alloc_page()?;
        pager.sync()?;
        let b = pager.alloc_page()?;
        pager.sync()?;
        let c = pager.alloc_page()?;
        pager.sync()?;

        // All three pages must still be readable even though the cache
        // capacity is smaller than the working set.
        for id in [a, b, c] {
            pager.get_page(id)?;
        }
        Ok(())
    }
}
