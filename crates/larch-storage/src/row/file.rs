//! Row file: header management, the first-fit free-list allocator, and
//! row-level read/write/free.
//!
//! File layout:
//!
//! ```text
//! +----------------------+ 0
//! | Header block (4096)  |
//! +----------------------+ 4096
//! | records ...          |   u16 payload length + payload bytes
//! +----------------------+
//! ```
//!
//! Header block (little-endian):
//! - bytes 0..2: column count
//! - bytes 2..10: free-list head byte offset (0 = none)
//! - bytes 10..1010: schema area, one type code per column
//! - remaining bytes: reserved, zero-filled
//!
//! A freed row keeps its slot; its length prefix becomes the free
//! marker and the slot stores the free-list metadata:
//!
//! ```text
//! [0..2]   u16 marker = 0xFFFF
//! [2..10]  u64 next free offset
//! [10..12] u16 original payload length
//! ```

use crate::row::codec;
use crate::row::{MAX_COLUMNS, ROW_FREE_MARKER};
use larch_common::error::{LarchError, Result};
use larch_common::page::ROW_HEADER_SIZE;
use larch_common::types::{ColumnType, ColumnValue};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::trace;

/// Start of the schema area within the header block.
const SCHEMA_AREA_OFFSET: usize = 10;

/// Configuration for a row file.
#[derive(Debug, Clone)]
pub struct RowFileConfig {
    /// Sync the file after every header rewrite.
    pub fsync_headers: bool,
}

impl Default for RowFileConfig {
    fn default() -> Self {
        Self {
            fsync_headers: true,
        }
    }
}

/// File handle plus the header fields mirrored in memory.
#[derive(Debug)]
struct RowInner {
    file: File,
    free_head: u64,
    schema: Vec<ColumnType>,
}

/// A file of variable-length rows sharing one fixed schema.
#[derive(Debug)]
pub struct RowFile {
    inner: Mutex<RowInner>,
    config: RowFileConfig,
}

impl RowFile {
    /// Creates a new row file for `schema` (e.g. `"int,string,float"`),
    /// truncating any existing file at `path`.
    pub fn create(path: impl AsRef<Path>, schema: &str) -> Result<Self> {
        Self::create_with(path, schema, RowFileConfig::default())
    }

    /// Creates a new row file with an explicit configuration.
    pub fn create_with(
        path: impl AsRef<Path>,
        schema: &str,
        config: RowFileConfig,
    ) -> Result<Self> {
        let schema = codec::parse_schema(schema)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let rows = Self {
            inner: Mutex::new(RowInner {
                file,
                free_head: 0,
                schema,
            }),
            config,
        };

        let mut inner = rows.inner.lock();
        Self::write_header(&mut inner, rows.config.fsync_headers)?;
        drop(inner);

        Ok(rows)
    }

    /// Opens an existing row file, reading the schema from its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, RowFileConfig::default())
    }

    /// Opens an existing row file with an explicit configuration.
    pub fn open_with(path: impl AsRef<Path>, config: RowFileConfig) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut header = [0u8; ROW_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let column_count = u16::from_le_bytes([header[0], header[1]]) as usize;
        if column_count > MAX_COLUMNS {
            return Err(LarchError::Corrupted(format!(
                "invalid column count {} in header (max {})",
                column_count, MAX_COLUMNS
            )));
        }
        let free_head = u64::from_le_bytes([
            header[2], header[3], header[4], header[5], header[6], header[7], header[8],
            header[9],
        ]);

        let mut schema = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let code = header[SCHEMA_AREA_OFFSET + i];
            let column = ColumnType::from_code(code).ok_or_else(|| {
                LarchError::UnsupportedValueKind(format!("type code {}", code))
            })?;
            schema.push(column);
        }

        Ok(Self {
            inner: Mutex::new(RowInner {
                file,
                free_head,
                schema,
            }),
            config,
        })
    }

    /// Rewrites the header and syncs the file.
    pub fn close(self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::write_header(&mut inner, true)
    }

    /// Number of columns in the schema.
    pub fn column_count(&self) -> u16 {
        self.inner.lock().schema.len() as u16
    }

    /// Returns the schema column types in order.
    pub fn schema(&self) -> Vec<ColumnType> {
        self.inner.lock().schema.clone()
    }

    /// Renders the schema in its comma-separated string form.
    pub fn schema_string(&self) -> String {
        codec::schema_string(&self.inner.lock().schema)
    }

    /// Byte offset of the most recently freed row (0 = none).
    pub fn free_list_head(&self) -> u64 {
        self.inner.lock().free_head
    }

    /// Encodes `values` against the schema and writes the row, reusing
    /// a freed slot when one is large enough. Returns the row's offset.
    pub fn write_row(&self, values: &[ColumnValue]) -> Result<u64> {
        let mut inner = self.inner.lock();
        let payload = codec::encode_row(&inner.schema, values)?;

        let needed = 2 + payload.len();
        let offset = self.allocate_slot(&mut inner, needed)?;

        let mut buf = Vec::with_capacity(needed);
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&payload);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buf)?;
        Ok(offset)
    }

    /// Reads the row stored at `offset`.
    ///
    /// Fails with `RowDeleted` if the slot carries the free marker.
    pub fn read_row_at(&self, offset: u64) -> Result<Vec<ColumnValue>> {
        let mut inner = self.inner.lock();

        let mut len_buf = [0u8; 2];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut len_buf)?;
        let payload_len = u16::from_le_bytes(len_buf);
        if payload_len == ROW_FREE_MARKER {
            return Err(LarchError::RowDeleted { offset });
        }

        let mut payload = vec![0u8; payload_len as usize];
        inner.file.read_exact(&mut payload)?;
        codec::decode_row(&inner.schema, &payload)
    }

    /// Marks the row at `offset` free and pushes its slot onto the free
    /// list. Freeing an already-freed row fails with `RowDeleted`.
    pub fn free_row_at(&self, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock();

        let mut len_buf = [0u8; 2];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut len_buf)?;
        let old_len = u16::from_le_bytes(len_buf);
        if old_len == ROW_FREE_MARKER {
            return Err(LarchError::RowDeleted { offset });
        }

        let mut meta = [0u8; 12];
        meta[0..2].copy_from_slice(&ROW_FREE_MARKER.to_le_bytes());
        meta[2..10].copy_from_slice(&inner.free_head.to_le_bytes());
        meta[10..12].copy_from_slice(&old_len.to_le_bytes());
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&meta)?;

        inner.free_head = offset;
        trace!(offset, "freed row");
        Self::write_header(&mut inner, self.config.fsync_headers)
    }

    /// Reads the free-list metadata of a known-free row: the next free
    /// offset and the slot's original payload length.
    pub fn read_free_row_at(&self, offset: u64) -> Result<(u64, u16)> {
        let mut inner = self.inner.lock();

        let mut meta = [0u8; 12];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut meta)?;

        let marker = u16::from_le_bytes([meta[0], meta[1]]);
        if marker != ROW_FREE_MARKER {
            return Err(LarchError::Corrupted(format!(
                "row at offset {} is not free (marker {:#06x})",
                offset, marker
            )));
        }

        let next = u64::from_le_bytes([
            meta[2], meta[3], meta[4], meta[5], meta[6], meta[7], meta[8], meta[9],
        ]);
        let original_len = u16::from_le_bytes([meta[10], meta[11]]);
        Ok((next, original_len))
    }

    /// First-fit scan of the free list. Unlinks and returns the first
    /// slot whose span (2 + original payload length) covers `needed`
    /// bytes; falls back to the end-of-file offset.
    fn allocate_slot(&self, inner: &mut RowInner, needed: usize) -> Result<u64> {
        let mut prev: u64 = 0;
        let mut current = inner.free_head;

        while current != 0 {
            let mut meta = [0u8; 12];
            inner.file.seek(SeekFrom::Start(current))?;
            inner.file.read_exact(&mut meta)?;

            let marker = u16::from_le_bytes([meta[0], meta[1]]);
            if marker != ROW_FREE_MARKER {
                return Err(LarchError::Corrupted(format!(
                    "free row at offset {} has marker {:#06x}",
                    current, marker
                )));
            }
            let next = u64::from_le_bytes([
                meta[2], meta[3], meta[4], meta[5], meta[6], meta[7], meta[8], meta[9],
            ]);
            let original_len = u16::from_le_bytes([meta[10], meta[11]]) as usize;

            if 2 + original_len >= needed {
                if prev == 0 {
                    inner.free_head = next;
                    Self::write_header(inner, self.config.fsync_headers)?;
                } else {
                    // Patch the predecessor's next pointer to skip this slot.
                    inner.file.seek(SeekFrom::Start(prev + 2))?;
                    inner.file.write_all(&next.to_le_bytes())?;
                }
                trace!(offset = current, "reused freed row slot");
                return Ok(current);
            }

            prev = current;
            current = next;
        }

        Ok(inner.file.metadata()?.len())
    }

    fn write_header(inner: &mut RowInner, fsync: bool) -> Result<()> {
        let mut buf = [0u8; ROW_HEADER_SIZE];
        buf[0..2].copy_from_slice(&(inner.schema.len() as u16).to_le_bytes());
        buf[2..10].copy_from_slice(&inner.free_head.to_le_bytes());
        for (i, column) in inner.schema.iter().enumerate() {
            buf[SCHEMA_AREA_OFFSET + i] = column.code();
        }

        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        if fsync {
            inner.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for RowFile {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let _ = Self::write_header(&mut inner, self.config.fsync_headers);
    }
}
