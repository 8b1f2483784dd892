//! Error types for the Larch storage engine.

use thiserror::Error;

/// Result type alias using LarchError.
pub type Result<T> = std::result::Result<T, LarchError>;

/// Errors that can occur in Larch storage operations.
#[derive(Debug, Error)]
pub enum LarchError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Index file errors
    #[error("Invalid tree order: {0} (minimum is 3)")]
    InvalidOrder(u32),

    #[error("Bad magic number: expected {expected:#010x}, got {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Page {page_id} is deleted")]
    PageDeleted { page_id: u32 },

    // B+ tree errors
    #[error("Tree is empty")]
    TreeEmpty,

    #[error("Key not found")]
    KeyNotFound,

    #[error("Duplicate key")]
    DuplicateKey,

    // Codec errors
    #[error("Encoded node too large: {size} bytes (max {max})")]
    EncodeOverflow { size: usize, max: usize },

    #[error("Truncated data while decoding {0}")]
    DecodeTruncated(&'static str),

    #[error("Unknown tag byte while decoding: {0:#04x}")]
    DecodeUnknownTag(u8),

    #[error("Unsupported key kind: {0}")]
    UnsupportedKeyKind(String),

    #[error("Unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    // Row file errors
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Row payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Row at offset {offset} is deleted")]
    RowDeleted { offset: u64 },

    // Internal errors
    #[error("Corrupted storage: {0}")]
    Corrupted(String),
}
