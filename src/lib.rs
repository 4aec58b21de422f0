//! # niffler-btree
//!
//! A disk-backed B+ tree storage engine with fixed-width keys.
//!
//! ## Architecture
//!
//! The engine is composed of modular, swappable layers:
//!
//! - **Storage layer** (`storage`): raw file I/O, the file header, and the
//!   on-disk free-list page format.
//! - **Pager** (`pager`): page cache and allocation on top of the storage
//!   layer.
//! - **B+ tree** (`btree`): search, propagating splits, and
//!   borrow/merge rebalancing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use niffler_btree::{Db, Config};
//!
//! let config = Config::new("my_database.db");
//! let db = Db::open(config)?;
//!
//! db.insert(b"hello", b"world")?;
//! let value = db.find(b"hello")?;
//! db.remove(b"hello")?;
//! ```

pub mod btree;
pub mod error;
pub mod pager;
pub mod storage;
pub mod types;

pub use btree::{BTree, TreeNode};
pub use error::{Result, StorageError};
pub use types::{Key, PageId, PAGE_SIZE};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file.
    pub path: PathBuf,
    /// Bound the in-memory page cache to this many pages. `None` (the
    /// default) leaves it unbounded.
    pub page_cache_capacity: Option<usize>,
}

impl Config {
    /// Create a new configuration with default settings.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            page_cache_capacity: None,
        }
    }

    /// Bound the in-memory page cache.
    pub fn page_cache_capacity(mut self, capacity: usize) -> Self {
        self.page_cache_capacity = Some(capacity);
        self
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Total number of pages in the file, including the file and tree
    /// headers.
    pub page_count: u32,
    /// Height of the B+ tree (1 for a root that points directly at leaves).
    pub tree_height: u32,
    pub num_internal_nodes: u32,
    pub num_leaf_nodes: u32,
}

/// Main database handle providing key-value storage backed by a B+ tree.
///
/// A thin, lock-guarded wrapper around [`BTree`]: readers take a shared
/// lock, writers (`insert`/`remove`) an exclusive one. The tree itself
/// requires `&mut self` only because of its small in-memory header; the
/// underlying pager already has its own interior locking.
pub struct Db {
    tree: Arc<RwLock<BTree>>,
}

impl Db {
    /// Open (or create) a database at the path named by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let exists = config.path.exists();
        let mut pager = pager::Pager::open(&config.path, !exists)?;
        if let Some(capacity) = config.page_cache_capacity {
            pager = pager.with_capacity(capacity);
        }

        let tree = if exists {
            BTree::load(pager)?
        } else {
            BTree::create(pager)?
        };

        log::info!("db: opened {}", config.path.display());
        Ok(Self {
            tree: Arc::new(RwLock::new(tree)),
        })
    }

    /// Look up `key`. Returns `None` if it is absent.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.tree.read();
        tree.find(&Key::from_bytes(key)?)
    }

    /// Returns whether `key` is present.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        let tree = self.tree.read();
        tree.exists(&Key::from_bytes(key)?)
    }

    /// Insert or update `key -> value`. Returns `false` if `key` was
    /// already present and the tree was left unchanged.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut tree = self.tree.write();
        tree.insert(&Key::from_bytes(key)?, value)
    }

    /// Remove `key`. Returns `false` if it was absent.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        let mut tree = self.tree.write();
        tree.remove(&Key::from_bytes(key)?)
    }

    /// Flush all dirty pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.tree.read().sync()
    }

    /// A flat, level-order textual dump of the tree, for debugging.
    pub fn print(&self) -> Result<String> {
        self.tree.read().print()
    }

    /// A structured export of the tree, suitable for JSON-serializing to
    /// a visualization tool.
    pub fn export_tree(&self) -> Result<TreeNode> {
        self.tree.read().export_tree()
    }

    /// Get statistics about the database.
    pub fn stats(&self) -> DbStats {
        let tree = self.tree.read();
        DbStats {
            page_count: tree.pager().page_count(),
            tree_height: tree.height(),
            num_internal_nodes: tree.num_internal_nodes(),
            num_leaf_nodes: tree.num_leaf_nodes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        assert!(db.insert(b"key1", b"value1")?);
        assert_eq!(db.find(b"key1")?, Some(b"value1".to_vec()));

        // Re-inserting an existing key is a no-op, not an update.
        assert!(!db.insert(b"key1", b"value2")?);
        assert_eq!(db.find(b"key1")?, Some(b"value1".to_vec()));

        assert!(db.remove(b"key1")?);
        assert_eq!(db.find(b"key1")?, None);

        assert_eq!(db.find(b"nonexistent")?, None);
        assert!(!db.remove(b"nonexistent")?);

        Ok(())
    }

    #[test]
    fn test_non_utf8_keys_do_not_collide() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binary.db");
        let db = Db::open(Config::new(&path))?;

        let a: &[u8] = &[0xFF, 0x01];
        let b: &[u8] = &[0xFF, 0x02];
        assert!(db.insert(a, b"a")?);
        assert!(db.insert(b, b"b")?);
        assert_eq!(db.find(a)?, Some(b"a".to_vec()));
        assert_eq!(db.find(b)?, Some(b"b".to_vec()));

        Ok(())
    }

    #[test]
    fn test_reopen_preserves_data() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        {
            let db = Db::open(Config::new(&path))?;
            db.insert(b"apple", b"1")?;
            db.insert(b"banana", b"2")?;
        }
        {
            let db = Db::open(Config::new(&path))?;
            assert_eq!(db.find(b"apple")?, Some(b"1".to_vec()));
            assert_eq!(db.find(b"banana")?, Some(b"2".to_vec()));
        }
        Ok(())
    }

    #[test]
    fn test_stats_reflect_inserts() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.db");
        let db = Db::open(Config::new(&path))?;
        for i in 0..200 {
            db.insert(format!("k{i:04}").as_bytes(), b"v")?;
        }
        let stats = db.stats();
        assert!(stats.page_count > 2);
        assert!(stats.tree_height >= 1);
        Ok(())
    }
}
