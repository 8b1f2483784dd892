//! Key, value, and column types persisted by the Larch engine.

use crate::error::{LarchError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Maximum byte length of a string key, an opaque value, or a row payload.
///
/// All variable-length fields carry a little-endian `u16` length prefix
/// on disk, which bounds them to this size.
pub const MAX_INLINE_LEN: usize = u16::MAX as usize;

/// Wire codes for the supported row column types.
///
/// The codes are stored one byte per column in the row file header's
/// schema area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    /// 32-bit signed integer (4 bytes little-endian).
    Int = 1,
    /// 64-bit IEEE-754 float (8 bytes little-endian).
    Float = 2,
    /// Byte string (u16 length prefix + bytes).
    Str = 3,
}

impl ColumnType {
    /// Returns the on-disk type code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decodes a type code read from a row file header.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ColumnType::Int),
            2 => Some(ColumnType::Float),
            3 => Some(ColumnType::Str),
            _ => None,
        }
    }

    /// Parses a case-insensitive type name from a schema string.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INT" => Some(ColumnType::Int),
            "FLOAT" => Some(ColumnType::Float),
            "STRING" => Some(ColumnType::Str),
            _ => None,
        }
    }

    /// Returns the fixed encoded size for this type, or None for
    /// variable-length types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::Int => Some(4),
            ColumnType::Float => Some(8),
            ColumnType::Str => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Str => "string",
        };
        write!(f, "{}", name)
    }
}

/// One value in a row, matching a `ColumnType` in the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Int(i32),
    Float(f64),
    Str(String),
}

impl ColumnValue {
    /// Returns the column type this value encodes as.
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Int(_) => ColumnType::Int,
            ColumnValue::Float(_) => ColumnType::Float,
            ColumnValue::Str(_) => ColumnType::Str,
        }
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Str(v.to_string())
    }
}

/// A B+ tree key, drawn from a closed set of three kinds.
///
/// Ordering is defined within a kind only. Comparing keys of different
/// kinds is a programming error and panics; a tree instance always holds
/// keys of a single kind. Float comparisons involving NaN are undefined
/// and also panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Key {
    Int(i32),
    Float(f64),
    Str(String),
}

impl Key {
    /// Compares two keys of the same kind.
    ///
    /// # Panics
    ///
    /// Panics if the kinds differ, or if either float key is NaN.
    pub fn cmp_same_kind(&self, other: &Key) -> Ordering {
        self.partial_cmp(other)
            .expect("mismatched key kinds or NaN key")
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Key) -> Option<Ordering> {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => Some(a.cmp(b)),
            (Key::Float(a), Key::Float(b)) => a.partial_cmp(b),
            (Key::Str(a), Key::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v)
    }
}

impl From<f64> for Key {
    fn from(v: f64) -> Self {
        Key::Float(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_string())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Float(v) => write!(f, "{}", v),
            Key::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Opaque payload persisted with each leaf entry.
///
/// A bounded byte string; the length must fit in the u16 prefix used by
/// the node codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(Bytes);

impl Value {
    /// Creates a value, rejecting payloads longer than `MAX_INLINE_LEN`.
    pub fn new(bytes: Bytes) -> Result<Self> {
        if bytes.len() > MAX_INLINE_LEN {
            return Err(LarchError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_INLINE_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Returns the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the value, returning the underlying bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl std::str::FromStr for Value {
    type Err = LarchError;

    fn from_str(s: &str) -> Result<Self> {
        Value::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
