//! LRU tracker for the pager's page cache.
//!
//! The pager itself owns the page buffers; this only tracks access
//! order so clean pages can be evicted in least-recently-used order
//! when the optional capacity bound is configured. Dirty pages are
//! never handed to this structure for eviction — the pager checks
//! dirtiness before evicting the id this returns.

use std::collections::HashMap;

pub struct LruCache {
    positions: HashMap<u32, usize>,
    order: Vec<LruNode>,
    head: Option<usize>,
    tail: Option<usize>,
    free_slots: Vec<usize>,
}

#[derive(Clone, Copy)]
struct LruNode {
    page_id: u32,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_slots: Vec::new(),
        }
    }

    pub fn access(&mut self, page_id: u32) {
        if let Some(&pos) = self.positions.get(&page_id) {
            self.move_to_front(pos);
        } else {
            self.insert(page_id);
        }
    }

    pub fn remove(&mut self, page_id: u32) {
        if let Some(pos) = self.positions.remove(&page_id) {
            self.unlink(pos);
            self.free_slots.push(pos);
        }
    }

    /// Least-recently-used page, without removing it.
    pub fn lru(&self) -> Option<u32> {
        self.tail.map(|pos| self.order[pos].page_id)
    }

    pub fn pop_lru(&mut self) -> Option<u32> {
        let page_id = self.lru()?;
        self.remove(page_id);
        Some(page_id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    fn insert(&mut self, page_id: u32) {
        let pos = if let Some(pos) = self.free_slots.pop() {
            self.order[pos] = LruNode {
                page_id,
                prev: None,
                next: self.head,
            };
            pos
        } else {
            let pos = self.order.len();
            self.order.push(LruNode {
                page_id,
                prev: None,
                next: self.head,
            });
            pos
        };

        if let Some(old_head) = self.head {
            self.order[old_head].prev = Some(pos);
        }
        self.head = Some(pos);

        if self.tail.is_none() {
            self.tail = Some(pos);
        }

        self.positions.insert(page_id, pos);
    }

    fn move_to_front(&mut self, pos: usize) {
        if self.head == Some(pos) {
            return;
        }
        self.unlink(pos);
        self.order[pos].prev = None;
        self.order[pos].next = self.head;

        if let Some(old_head) = self.head {
            self.order[old_head].prev = Some(pos);
        }
        self.head = Some(pos);

        if self.tail.is_none() {
            self.tail = Some(pos);
        }
    }

    fn unlink(&mut self, pos: usize) {
        let node = self.order[pos];

        if let Some(prev) = node.prev {
            self.order[prev].next = node.next;
        } else if self.head == Some(pos) {
            self.head = node.next;
        }

        if let Some(next) = node.next {
            self.order[next].prev = node.prev;
        } else if self.tail == Some(pos) {
            self.tail = node.prev;
        }
    }
}
