//! Page constants and identifiers for Larch storage files.

use serde::{Deserialize, Serialize};

/// Fixed size of every on-disk page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of the index file header block at the start of the file.
pub const INDEX_HEADER_SIZE: usize = 512;

/// Size of the row file header block at the start of the file.
pub const ROW_HEADER_SIZE: usize = 4096;

/// Magic number identifying an index file ("BPLU").
pub const INDEX_MAGIC: u32 = 0x42504C55;

/// Current on-disk format version of the index file.
///
/// Version 2 stores live 32-bit page ids in the low four bytes of each
/// 8-byte sibling/child pointer slot; version-1 files left those slots
/// zeroed and are rejected on open.
pub const INDEX_FORMAT_VERSION: u32 = 2;

/// Bytes available to the node codec within one page.
///
/// Byte 0 of every data page is the tombstone flag owned by the index
/// file layer; the codec payload occupies the remaining bytes.
pub const NODE_PAYLOAD_SIZE: usize = PAGE_SIZE - 1;

/// Identifier of one fixed-size page within an index file.
///
/// Page id 0 is reserved to mean "no page"; the first allocated page
/// has id 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PageId(u32);

impl PageId {
    /// The reserved "no page" identifier.
    pub const NONE: PageId = PageId(0);

    /// Creates a new PageId.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw 32-bit identifier.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true if this is the reserved "no page" identifier.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this page within the index file.
    ///
    /// The header block occupies the first `INDEX_HEADER_SIZE` bytes and
    /// the slot for the reserved id 0 is a permanent dead hole, so page 1
    /// lands at `INDEX_HEADER_SIZE + PAGE_SIZE`.
    pub fn file_offset(self) -> u64 {
        INDEX_HEADER_SIZE as u64 + self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constants() {
        assert_eq!(PAGE_SIZE, 4096);
        assert_eq!(INDEX_HEADER_SIZE, 512);
        assert_eq!(ROW_HEADER_SIZE, 4096);
        assert_eq!(NODE_PAYLOAD_SIZE, 4095);
    }

    #[test]
    fn test_magic_number() {
        // "BPLU" as big-endian ASCII.
        assert_eq!(INDEX_MAGIC.to_be_bytes(), *b"BPLU");
    }

    #[test]
    fn test_page_id_none() {
        assert!(PageId::NONE.is_none());
        assert_eq!(PageId::NONE.as_u32(), 0);
        assert!(!PageId::new(1).is_none());
        assert_eq!(PageId::default(), PageId::NONE);
    }

    #[test]
    fn test_page_id_file_offset() {
        // The first real page sits one full page past the header block.
        assert_eq!(PageId::new(1).file_offset(), 512 + 4096);
        assert_eq!(PageId::new(2).file_offset(), 512 + 2 * 4096);
        assert_eq!(PageId::new(100).file_offset(), 512 + 100 * 4096);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new(5).to_string(), "5");
        assert_eq!(PageId::NONE.to_string(), "0");
    }

    #[test]
    fn test_page_id_ordering_and_hash() {
        use std::collections::HashSet;

        assert!(PageId::new(1) < PageId::new(2));

        let mut set = HashSet::new();
        set.insert(PageId::new(1));
        set.insert(PageId::new(2));
        set.insert(PageId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId::new(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
