//! Index file: paged, typed access to the single file backing a tree.
//!
//! File layout:
//!
//! ```text
//! +---------------------+ 0
//! | Header block (512)  |
//! +---------------------+ 512
//! | dead slot (page 0)  |   page id 0 means "no page"; its slot is
//! +---------------------+ 4608   never written
//! | page 1              |
//! +---------------------+
//! | page 2 ...          |
//! +---------------------+
//! ```
//!
//! Header block (little-endian):
//! - bytes 0..4: magic
//! - bytes 4..8: format version
//! - bytes 8..12: root page id (0 = empty tree)
//! - bytes 12..16: tree order
//! - bytes 16..20: head of the free-page list (0 = none)
//! - bytes 20..512: reserved, zero-filled
//!
//! Every data page is a 1-byte tombstone flag followed by the node
//! codec payload. Free pages carry tombstone = 1 and the next free page
//! id at bytes 1..5, forming a LIFO list rooted at the header.

use crate::index::codec;
use crate::index::node::Node;
use larch_common::error::{LarchError, Result};
use larch_common::page::{
    PageId, INDEX_FORMAT_VERSION, INDEX_HEADER_SIZE, INDEX_MAGIC, PAGE_SIZE,
};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

/// Configuration for an index file.
#[derive(Debug, Clone)]
pub struct IndexFileConfig {
    /// Sync the file after every header rewrite.
    pub fsync_headers: bool,
}

impl Default for IndexFileConfig {
    fn default() -> Self {
        Self {
            fsync_headers: true,
        }
    }
}

/// File handle plus the header fields mirrored in memory.
#[derive(Debug)]
struct IndexInner {
    file: File,
    root: PageId,
    order: u32,
    free_head: PageId,
}

/// Paged access to a single index file backing one B+ tree.
#[derive(Debug)]
pub struct IndexFile {
    inner: Mutex<IndexInner>,
    config: IndexFileConfig,
}

impl IndexFile {
    /// Creates a new index file, truncating any existing file at `path`.
    ///
    /// Fails with `InvalidOrder` if `order` < 3.
    pub fn create(path: impl AsRef<Path>, order: u32) -> Result<Self> {
        Self::create_with(path, order, IndexFileConfig::default())
    }

    /// Creates a new index file with an explicit configuration.
    pub fn create_with(
        path: impl AsRef<Path>,
        order: u32,
        config: IndexFileConfig,
    ) -> Result<Self> {
        if order < 3 {
            return Err(LarchError::InvalidOrder(order));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let index = Self {
            inner: Mutex::new(IndexInner {
                file,
                root: PageId::NONE,
                order,
                free_head: PageId::NONE,
            }),
            config,
        };

        let mut inner = index.inner.lock();
        Self::write_header(&mut inner, index.config.fsync_headers)?;
        drop(inner);

        Ok(index)
    }

    /// Opens an existing index file, validating magic and version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, IndexFileConfig::default())
    }

    /// Opens an existing index file with an explicit configuration.
    pub fn open_with(path: impl AsRef<Path>, config: IndexFileConfig) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut buf = [0u8; INDEX_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != INDEX_MAGIC {
            return Err(LarchError::BadMagic {
                expected: INDEX_MAGIC,
                found: magic,
            });
        }

        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != INDEX_FORMAT_VERSION {
            return Err(LarchError::UnsupportedVersion(version));
        }

        let root = PageId::new(u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]));
        let order = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        if order < 3 {
            return Err(LarchError::Corrupted(format!(
                "invalid tree order {} in header",
                order
            )));
        }
        let free_head = PageId::new(u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]));

        Ok(Self {
            inner: Mutex::new(IndexInner {
                file,
                root,
                order,
                free_head,
            }),
            config,
        })
    }

    /// Rewrites the header and syncs the file.
    pub fn close(self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::write_header(&mut inner, true)?;
        Ok(())
    }

    /// Returns the current root page id (`PageId::NONE` for an empty tree).
    pub fn root(&self) -> PageId {
        self.inner.lock().root
    }

    /// Updates the root page id and persists the header.
    pub fn set_root(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.root = id;
        debug!(root = id.as_u32(), "root page changed");
        Self::write_header(&mut inner, self.config.fsync_headers)
    }

    /// Returns the tree order stored in the header.
    pub fn order(&self) -> u32 {
        self.inner.lock().order
    }

    /// Returns the head of the free-page list.
    pub fn free_list_head(&self) -> PageId {
        self.inner.lock().free_head
    }

    /// Returns a usable page id: the free-list head if one exists,
    /// otherwise a fresh page appended at the tail of the file.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if !inner.free_head.is_none() {
            let id = inner.free_head;
            let mut buf = [0u8; 5];
            inner.file.seek(SeekFrom::Start(id.file_offset()))?;
            inner.file.read_exact(&mut buf)?;
            if buf[0] != 1 {
                return Err(LarchError::Corrupted(format!(
                    "expected free page at {}, found flag {}",
                    id, buf[0]
                )));
            }
            inner.free_head = PageId::new(u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]));
            Self::write_header(&mut inner, self.config.fsync_headers)?;
            trace!(page = id.as_u32(), "reused page from free list");
            return Ok(id);
        }

        // Tail extension. Page id 0 is reserved, so the first allocation
        // on a fresh file must return 1 even though no slot precedes it.
        let len = inner.file.metadata()?.len();
        let slots = len.saturating_sub(INDEX_HEADER_SIZE as u64) / PAGE_SIZE as u64;
        let id = PageId::new(slots.max(1) as u32);

        inner.file.seek(SeekFrom::Start(id.file_offset()))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        trace!(page = id.as_u32(), "extended file with new page");
        Ok(id)
    }

    /// Pushes a page onto the free list and persists the header.
    pub fn free_page(&self, id: PageId) -> Result<()> {
        if id.is_none() {
            return Err(LarchError::Corrupted(
                "cannot free the reserved page id 0".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = 1;
        buf[1..5].copy_from_slice(&inner.free_head.as_u32().to_le_bytes());
        inner.file.seek(SeekFrom::Start(id.file_offset()))?;
        inner.file.write_all(&buf)?;

        inner.free_head = id;
        trace!(page = id.as_u32(), "pushed page onto free list");
        Self::write_header(&mut inner, self.config.fsync_headers)
    }

    /// Reads and decodes the node stored at `id`.
    ///
    /// Fails with `PageDeleted` if the page's tombstone flag is set.
    pub fn read_node(&self, id: PageId) -> Result<Node> {
        let mut inner = self.inner.lock();
        let mut buf = [0u8; PAGE_SIZE];
        inner.file.seek(SeekFrom::Start(id.file_offset()))?;
        inner.file.read_exact(&mut buf)?;
        drop(inner);

        if buf[0] != 0 {
            return Err(LarchError::PageDeleted {
                page_id: id.as_u32(),
            });
        }
        codec::decode(&buf[1..])
    }

    /// Encodes `node` and writes it to the page at `id`.
    pub fn write_node(&self, node: &Node, id: PageId) -> Result<()> {
        let encoded = codec::encode(node)?;

        let mut buf = [0u8; PAGE_SIZE];
        buf[1..1 + encoded.len()].copy_from_slice(&encoded);

        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(id.file_offset()))?;
        inner.file.write_all(&buf)?;
        Ok(())
    }

    /// Number of page slots the file currently spans, including the dead
    /// id-0 slot. The file never shrinks.
    pub fn page_count(&self) -> Result<u32> {
        let inner = self.inner.lock();
        let len = inner.file.metadata()?.len();
        Ok((len.saturating_sub(INDEX_HEADER_SIZE as u64) / PAGE_SIZE as u64) as u32)
    }

    fn write_header(inner: &mut IndexInner, fsync: bool) -> Result<()> {
        let mut buf = [0u8; INDEX_HEADER_SIZE];
        buf[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&inner.root.as_u32().to_le_bytes());
        buf[12..16].copy_from_slice(&inner.order.to_le_bytes());
        buf[16..20].copy_from_slice(&inner.free_head.as_u32().to_le_bytes());

        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        if fsync {
            inner.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let _ = Self::write_header(&mut inner, self.config.fsync_headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::node::{LeafNode, LeafPair, Node};
    use larch_common::types::Key;
    use tempfile::tempdir;

    fn test_config() -> IndexFileConfig {
        IndexFileConfig {
            fsync_headers: false,
        }
    }

    fn sample_leaf() -> Node {
        Node::Leaf(LeafNode {
            pairs: vec![LeafPair::new(Key::Int(1), "one".parse().unwrap())],
            next: PageId::NONE,
            prev: PageId::NONE,
        })
    }

    #[test]
    fn test_create_rejects_small_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");

        let err = IndexFile::create(&path, 2).unwrap_err();
        assert!(matches!(err, LarchError::InvalidOrder(2)));

        assert!(IndexFile::create(&path, 3).is_ok());
    }

    #[test]
    fn test_create_then_open_preserves_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");

        {
            let index = IndexFile::create_with(&path, 5, test_config()).unwrap();
            index.set_root(PageId::new(9)).unwrap();
        }

        let index = IndexFile::open(&path).unwrap();
        assert_eq!(index.order(), 5);
        assert_eq!(index.root(), PageId::new(9));
        assert!(index.free_list_head().is_none());
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.idx");
        std::fs::write(&path, vec![0xAAu8; INDEX_HEADER_SIZE]).unwrap();

        let err = IndexFile::open(&path).unwrap_err();
        assert!(matches!(err, LarchError::BadMagic { .. }));
    }

    #[test]
    fn test_open_rejects_unsupported_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.idx");

        let mut buf = vec![0u8; INDEX_HEADER_SIZE];
        buf[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&1u32.to_le_bytes());
        buf[12..16].copy_from_slice(&3u32.to_le_bytes());
        std::fs::write(&path, buf).unwrap();

        let err = IndexFile::open(&path).unwrap_err();
        assert!(matches!(err, LarchError::UnsupportedVersion(1)));
    }

    #[test]
    fn test_first_allocation_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        let index = IndexFile::create_with(&path, 3, test_config()).unwrap();

        // The first real page is id 1 at byte offset 512 + 4096; the file
        // grows past it, leaving the id-0 slot as a hole.
        let first = index.allocate_page().unwrap();
        assert_eq!(first, PageId::new(1));
        assert_eq!(first.file_offset(), (INDEX_HEADER_SIZE + PAGE_SIZE) as u64);

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, (INDEX_HEADER_SIZE + 2 * PAGE_SIZE) as u64);

        let second = index.allocate_page().unwrap();
        assert_eq!(second, PageId::new(2));
        let third = index.allocate_page().unwrap();
        assert_eq!(third, PageId::new(3));

        assert_eq!(index.page_count().unwrap(), 4);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let dir = tempdir().unwrap();
        let index =
            IndexFile::create_with(dir.path().join("t.idx"), 3, test_config()).unwrap();

        let a = index.allocate_page().unwrap();
        let b = index.allocate_page().unwrap();
        let c = index.allocate_page().unwrap();

        index.free_page(a).unwrap();
        index.free_page(c).unwrap();
        assert_eq!(index.free_list_head(), c);

        assert_eq!(index.allocate_page().unwrap(), c);
        assert_eq!(index.allocate_page().unwrap(), a);
        assert!(index.free_list_head().is_none());

        // Free list exhausted, back to tail extension.
        let d = index.allocate_page().unwrap();
        assert_eq!(d, PageId::new(b.as_u32() + 2));
    }

    #[test]
    fn test_free_list_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        let freed;

        {
            let index = IndexFile::create_with(&path, 3, test_config()).unwrap();
            index.allocate_page().unwrap();
            freed = index.allocate_page().unwrap();
            index.free_page(freed).unwrap();
        }

        let index = IndexFile::open(&path).unwrap();
        assert_eq!(index.free_list_head(), freed);
        assert_eq!(index.allocate_page().unwrap(), freed);
    }

    #[test]
    fn test_free_page_rejects_none() {
        let dir = tempdir().unwrap();
        let index =
            IndexFile::create_with(dir.path().join("t.idx"), 3, test_config()).unwrap();
        assert!(index.free_page(PageId::NONE).is_err());
    }

    #[test]
    fn test_write_read_node_roundtrip() {
        let dir = tempdir().unwrap();
        let index =
            IndexFile::create_with(dir.path().join("t.idx"), 3, test_config()).unwrap();

        let id = index.allocate_page().unwrap();
        let node = sample_leaf();
        index.write_node(&node, id).unwrap();

        assert_eq!(index.read_node(id).unwrap(), node);
    }

    #[test]
    fn test_read_freed_page_is_deleted() {
        let dir = tempdir().unwrap();
        let index =
            IndexFile::create_with(dir.path().join("t.idx"), 3, test_config()).unwrap();

        let id = index.allocate_page().unwrap();
        index.write_node(&sample_leaf(), id).unwrap();
        index.free_page(id).unwrap();

        let err = index.read_node(id).unwrap_err();
        assert!(matches!(err, LarchError::PageDeleted { page_id } if page_id == id.as_u32()));
    }

    #[test]
    fn test_close_persists_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");

        let index = IndexFile::create_with(&path, 4, test_config()).unwrap();
        let root = index.allocate_page().unwrap();
        index.set_root(root).unwrap();
        index.close().unwrap();

        let reopened = IndexFile::open(&path).unwrap();
        assert_eq!(reopened.root(), root);
        assert_eq!(reopened.order(), 4);
    }
}
